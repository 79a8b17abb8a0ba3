//! Read-only JSON API over the listing store.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use resagg_storage::{ListingStore, StoreError};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "resagg-web";

pub const LIVENESS_TEXT: &str = "Research Aggregator Backend Running";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ListingStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn ListingStore>) -> Self {
        Self { store }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/conferences", get(conferences_handler))
        .route("/api/opportunities", get(opportunities_handler))
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web api listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn index_handler() -> &'static str {
    LIVENESS_TEXT
}

async fn conferences_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.recent_conferences().await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err),
    }
}

async fn opportunities_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.recent_opportunities().await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: StoreError) -> Response {
    error!(error = %err, "store read failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::{NaiveDate, TimeZone, Utc};
    use http_body_util::BodyExt;
    use resagg_core::{ConferenceRecord, OpportunityRecord, SourceId};
    use resagg_storage::{MemoryListingStore, UpsertOutcome};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "application/json"
        );
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn conference(title: &str, hour: u32) -> ConferenceRecord {
        ConferenceRecord {
            title: title.into(),
            link: Some(format!("https://allconferencealert.net/event/{hour}")),
            source: SourceId::ConferenceAlert,
            scraped_at: Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0).unwrap(),
            date: "20th Oct 2026".into(),
            venue: "Rome, Italy".into(),
            topic: "Education".into(),
        }
    }

    #[tokio::test]
    async fn index_reports_liveness() {
        let app = app(AppState::new(Arc::new(MemoryListingStore::new())));
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), LIVENESS_TEXT);
    }

    #[tokio::test]
    async fn conferences_are_listed_most_recent_first() {
        let store = Arc::new(MemoryListingStore::new());
        store.upsert_conference(&conference("Older", 1)).await.unwrap();
        store.upsert_conference(&conference("Newer", 5)).await.unwrap();

        let (status, body) = get_json(app(AppState::new(store)), "/api/conferences").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], "Newer");
        assert_eq!(rows[0]["source"], "All Conference Alert");
        assert!(rows[0].get("scrapedAt").is_some());
    }

    #[tokio::test]
    async fn opportunities_use_the_wire_field_names() {
        let store = Arc::new(MemoryListingStore::new());
        store
            .upsert_opportunity(&OpportunityRecord {
                title: "Research Intern".into(),
                link: "https://careers.example/jobs/2".into(),
                source: SourceId::GoogleCareers,
                scraped_at: Utc::now(),
                organization: "Google".into(),
                kind: "Research Opportunity".into(),
            })
            .await
            .unwrap();

        let (status, body) = get_json(app(AppState::new(store)), "/api/opportunities").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["type"], "Research Opportunity");
        assert_eq!(body[0]["organization"], "Google");
    }

    struct BrokenStore;

    #[async_trait]
    impl ListingStore for BrokenStore {
        async fn upsert_conference(&self, _r: &ConferenceRecord) -> Result<UpsertOutcome, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn upsert_opportunity(&self, _r: &OpportunityRecord) -> Result<UpsertOutcome, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn recent_conferences(&self) -> Result<Vec<ConferenceRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn recent_opportunities(&self) -> Result<Vec<OpportunityRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn conferences_dated_between(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<ConferenceRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_is_a_json_500() {
        let (status, body) =
            get_json(app(AppState::new(Arc::new(BrokenStore))), "/api/conferences").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }
}
