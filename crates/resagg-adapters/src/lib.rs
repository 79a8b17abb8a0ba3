//! Source adapter contracts + the conference-listing and careers-portal adapters.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resagg_core::{ScrapeResult, SourceId};
use resagg_storage::FetchError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod browser;
pub mod careers_portal;
pub mod conference_alert;

pub use browser::{
    auto_scroll, AutoScrollConfig, BrowserError, BrowserLauncher, BrowserSession, ScrollStats,
    ScrollStop, WebDriverLauncher,
};
pub use careers_portal::{filter_research_cards, CareersPortalAdapter, CareersPortalConfig, RawCard};
pub use conference_alert::{
    parse_topic_page, ConferenceAlertAdapter, ConferenceAlertConfig, FieldRule, TableRules, Topic,
    TopicCatalog,
};

pub const CRATE_NAME: &str = "resagg-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub scraped_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            scraped_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("browser failed: {0}")]
    Browser(#[from] BrowserError),
}

/// A degraded slice of an adapter run (one topic, or the whole source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterIssue {
    pub scope: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterRun {
    pub records: ScrapeResult,
    pub issues: Vec<AdapterIssue>,
}

/// One external source. Implementations absorb their own fetch/parse/browser failures
/// into `AdapterRun::issues`; an `Err` means the adapter could not run at all.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceId;

    async fn scrape(&self, ctx: &AdapterContext) -> Result<AdapterRun, AdapterError>;
}

/// Per-source settings loaded from `sources.yaml`. Missing sections fall back to the
/// built-in catalog and selectors.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub conference_alert: ConferenceAlertConfig,
    #[serde(default)]
    pub careers_portal: CareersPortalConfig,
}

pub fn load_source_registry(path: impl AsRef<Path>) -> Result<SourceRegistry> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "no source registry file; using built-in sources");
        return Ok(SourceRegistry::default());
    }
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
