use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use resagg_adapters::{AdapterContext, AdapterIssue, SourceAdapter};
use resagg_core::{ConferenceRecord, ListingRecord, OpportunityRecord, SourceId};
use serde::Serialize;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// What one adapter contributed to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterReport {
    pub source: SourceId,
    pub records: usize,
    pub issues: Vec<AdapterIssue>,
    /// Set when the adapter returned an error or panicked; its contribution is empty.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeBatch {
    pub conferences: Vec<ConferenceRecord>,
    pub opportunities: Vec<OpportunityRecord>,
    pub reports: Vec<AdapterReport>,
}

impl ScrapeBatch {
    pub fn failed_adapters(&self) -> usize {
        self.reports.iter().filter(|r| r.error.is_some()).count()
    }
}

/// Runs every registered adapter concurrently and splits their output by record type,
/// keeping registration order. Never writes.
pub struct ScrapeOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl ScrapeOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub async fn run(&self, run_id: Uuid) -> ScrapeBatch {
        let ctx = AdapterContext::new(run_id);
        let invocations = self
            .adapters
            .iter()
            .map(|adapter| {
                let source = adapter.source();
                let span =
                    tracing::info_span!("adapter", run_id = %run_id, source_id = source.slug());
                AssertUnwindSafe(adapter.scrape(&ctx))
                    .catch_unwind()
                    .map(move |outcome| (source, outcome))
                    .instrument(span)
                    .boxed()
            })
            .collect::<Vec<_>>();
        let outcomes = join_all(invocations).await;

        let mut batch = ScrapeBatch::default();
        for (source, outcome) in outcomes {
            let mut report = AdapterReport {
                source,
                records: 0,
                issues: Vec::new(),
                error: None,
            };
            match outcome {
                Ok(Ok(run)) => {
                    report.records = run.records.len();
                    report.issues = run.issues;
                    for record in run.records {
                        match record {
                            ListingRecord::Conference(c) => batch.conferences.push(c),
                            ListingRecord::Opportunity(o) => batch.opportunities.push(o),
                        }
                    }
                }
                Ok(Err(err)) => {
                    warn!(run_id = %run_id, source_id = source.slug(), error = %err, "adapter failed");
                    report.error = Some(err.to_string());
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(run_id = %run_id, source_id = source.slug(), panic = %message, "adapter panicked");
                    report.error = Some(format!("panicked: {message}"));
                }
            }
            batch.reports.push(report);
        }

        info!(
            run_id = %run_id,
            adapters = self.adapters.len(),
            failed = batch.failed_adapters(),
            conferences = batch.conferences.len(),
            opportunities = batch.opportunities.len(),
            "scrape finished"
        );
        batch
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use resagg_adapters::{AdapterError, AdapterRun};

    enum Behavior {
        Records(Vec<ListingRecord>),
        Fail,
        Panic,
    }

    struct FakeAdapter {
        source: SourceId,
        behavior: Behavior,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source(&self) -> SourceId {
            self.source
        }

        async fn scrape(&self, _ctx: &AdapterContext) -> Result<AdapterRun, AdapterError> {
            match &self.behavior {
                Behavior::Records(records) => Ok(AdapterRun {
                    records: records.clone(),
                    issues: vec![AdapterIssue {
                        scope: "Law".into(),
                        message: "http status 503".into(),
                    }],
                }),
                Behavior::Fail => Err(AdapterError::Parse("listing markup missing".into())),
                Behavior::Panic => panic!("selector table exploded"),
            }
        }
    }

    fn conference(title: &str) -> ListingRecord {
        ConferenceRecord {
            title: title.into(),
            link: None,
            source: SourceId::ConferenceAlert,
            scraped_at: Utc::now(),
            date: "20th Oct 2026".into(),
            venue: "Rome, Italy".into(),
            topic: "Education".into(),
        }
        .into()
    }

    fn opportunity(title: &str) -> ListingRecord {
        OpportunityRecord {
            title: title.into(),
            link: format!("https://careers.example/{title}"),
            source: SourceId::GoogleCareers,
            scraped_at: Utc::now(),
            organization: "Google".into(),
            kind: "Research Opportunity".into(),
        }
        .into()
    }

    fn adapter(source: SourceId, behavior: Behavior) -> Arc<dyn SourceAdapter> {
        Arc::new(FakeAdapter { source, behavior })
    }

    #[tokio::test]
    async fn splits_records_by_type_in_registration_order() {
        let orchestrator = ScrapeOrchestrator::new(vec![
            adapter(
                SourceId::ConferenceAlert,
                Behavior::Records(vec![conference("A"), conference("B")]),
            ),
            adapter(
                SourceId::GoogleCareers,
                Behavior::Records(vec![opportunity("Research Intern")]),
            ),
        ]);
        let batch = orchestrator.run(Uuid::new_v4()).await;
        let titles: Vec<_> = batch.conferences.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(batch.opportunities.len(), 1);
        assert_eq!(batch.reports[0].records, 2);
        assert_eq!(batch.reports[0].issues.len(), 1);
        assert_eq!(batch.failed_adapters(), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_adapters_contribute_nothing() {
        let orchestrator = ScrapeOrchestrator::new(vec![
            adapter(SourceId::GoogleCareers, Behavior::Panic),
            adapter(SourceId::ConferenceAlert, Behavior::Records(vec![conference("Kept")])),
            adapter(SourceId::GoogleCareers, Behavior::Fail),
        ]);
        let batch = orchestrator.run(Uuid::new_v4()).await;

        assert_eq!(batch.conferences.len(), 1);
        assert!(batch.opportunities.is_empty());
        assert_eq!(batch.failed_adapters(), 2);
        assert!(batch.reports[0]
            .error
            .as_deref()
            .unwrap()
            .contains("selector table exploded"));
        assert!(batch.reports[2].error.as_deref().unwrap().contains("listing markup missing"));
        assert_eq!(batch.reports[1].error, None);
    }

    #[tokio::test]
    async fn run_can_be_spawned_onto_the_runtime() {
        let orchestrator = Arc::new(ScrapeOrchestrator::new(vec![
            adapter(SourceId::ConferenceAlert, Behavior::Records(vec![conference("Spawned")])),
            adapter(SourceId::GoogleCareers, Behavior::Records(vec![opportunity("PhD Residency")])),
        ]));
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run(Uuid::new_v4()).await }
        });
        let batch = handle.await.unwrap();
        assert_eq!(batch.conferences[0].title, "Spawned");
        assert_eq!(batch.opportunities[0].title, "PhD Residency");
    }
}
