//! Research openings from the careers portal. The listing is rendered client-side, so this
//! adapter drives a headless browser instead of fetching markup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resagg_core::{ListingRecord, OpportunityRecord, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn, Instrument};

use crate::browser::{auto_scroll, AutoScrollConfig, BrowserLauncher, BrowserSession};
use crate::{text_or_none, AdapterContext, AdapterError, AdapterIssue, AdapterRun, SourceAdapter};

const DEFAULT_SEARCH_URL: &str =
    "https://www.google.com/about/careers/applications/jobs/results/?company=Google&company=YouTube&q=research";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CareersPortalConfig {
    pub enabled: bool,
    pub search_url: String,
    pub card_selector: String,
    pub list_selector: String,
    /// Tried in order; the first one with text wins.
    pub title_selectors: Vec<String>,
    pub link_selector: String,
    pub keywords: Vec<String>,
    pub organization: String,
    pub kind: String,
    pub wait_timeout_secs: u64,
    pub scroll: AutoScrollConfig,
}

impl Default for CareersPortalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            card_selector: "gc-job-card".to_string(),
            list_selector: "gc-job-list".to_string(),
            title_selectors: vec!["h2".to_string(), ".gc-job-card__title".to_string()],
            link_selector: "a".to_string(),
            keywords: [
                "research",
                "research intern",
                "research scientist",
                "research assistant",
                "phd",
                "msc",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            organization: "Google".to_string(),
            kind: "Research Opportunity".to_string(),
            wait_timeout_secs: 20,
            scroll: AutoScrollConfig::default(),
        }
    }
}

/// One listing card as read from the rendered page, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCard {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

const CARDS_SCRIPT: &str = r#"
const [cardSelector, titleSelectors, linkSelector] = arguments;
return Array.from(document.querySelectorAll(cardSelector)).map(card => {
  let title = null;
  for (const sel of titleSelectors) {
    const text = card.querySelector(sel)?.innerText?.trim();
    if (text) { title = text; break; }
  }
  const link = card.querySelector(linkSelector)?.href ?? null;
  return { title, link };
});
"#;

/// Keep cards that have both a title and a link and whose title contains one of
/// `keywords`, ignoring case.
pub fn filter_research_cards(
    cards: Vec<RawCard>,
    keywords: &[String],
    organization: &str,
    kind: &str,
    scraped_at: DateTime<Utc>,
) -> Vec<OpportunityRecord> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    cards
        .into_iter()
        .filter_map(|card| {
            let title = card.title.and_then(text_or_none)?;
            let link = card.link.and_then(text_or_none)?;
            let lowered = title.to_lowercase();
            if !keywords.iter().any(|k| lowered.contains(k.as_str())) {
                return None;
            }
            Some(OpportunityRecord {
                title,
                link,
                source: SourceId::GoogleCareers,
                scraped_at,
                organization: organization.to_string(),
                kind: kind.to_string(),
            })
        })
        .collect()
}

pub struct CareersPortalAdapter {
    launcher: Arc<dyn BrowserLauncher>,
    config: CareersPortalConfig,
}

impl CareersPortalAdapter {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: CareersPortalConfig) -> Self {
        Self { launcher, config }
    }

    async fn collect(
        &self,
        session: &mut dyn BrowserSession,
        ctx: &AdapterContext,
    ) -> Result<Vec<OpportunityRecord>, AdapterError> {
        let cfg = &self.config;
        session.navigate(&cfg.search_url).await?;

        let timeout = Duration::from_secs(cfg.wait_timeout_secs);
        if !session.wait_for(&cfg.card_selector, timeout).await? {
            warn!(
                run_id = %ctx.run_id,
                selector = %cfg.card_selector,
                timeout_secs = cfg.wait_timeout_secs,
                "listing cards did not appear in time; extracting what is there"
            );
        }

        let scroll = auto_scroll(session, &cfg.list_selector, &cfg.scroll).await?;
        info!(
            run_id = %ctx.run_id,
            polls = scroll.polls,
            scrolled_px = scroll.scrolled_px,
            stop = ?scroll.stop,
            "listing scrolled"
        );

        let raw = session
            .evaluate(
                CARDS_SCRIPT,
                vec![
                    json!(cfg.card_selector),
                    json!(cfg.title_selectors),
                    json!(cfg.link_selector),
                ],
            )
            .await?;
        let cards: Vec<RawCard> = match raw {
            serde_json::Value::Null => Vec::new(),
            other => serde_json::from_value(other)
                .map_err(|e| AdapterError::Parse(format!("unexpected card payload: {e}")))?,
        };
        let total = cards.len();
        let records = filter_research_cards(
            cards,
            &cfg.keywords,
            &cfg.organization,
            &cfg.kind,
            ctx.scraped_at,
        );
        info!(run_id = %ctx.run_id, cards = total, kept = records.len(), "cards filtered");
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for CareersPortalAdapter {
    fn source(&self) -> SourceId {
        SourceId::GoogleCareers
    }

    async fn scrape(&self, ctx: &AdapterContext) -> Result<AdapterRun, AdapterError> {
        let span = tracing::info_span!("careers_portal", run_id = %ctx.run_id);
        async move {
            let mut run = AdapterRun::default();
            let mut session = match self.launcher.launch().await {
                Ok(session) => session,
                Err(err) => {
                    warn!(error = %err, "browser launch failed");
                    run.issues.push(AdapterIssue {
                        scope: SourceId::GoogleCareers.as_str().to_string(),
                        message: err.to_string(),
                    });
                    return Ok(run);
                }
            };

            let outcome = self.collect(session.as_mut(), ctx).await;
            if let Err(err) = session.close().await {
                warn!(error = %err, "browser session did not close cleanly");
            }

            match outcome {
                Ok(records) => run.records = records.into_iter().map(ListingRecord::from).collect(),
                Err(err) => {
                    warn!(error = %err, "careers portal scrape failed");
                    run.issues.push(AdapterIssue {
                        scope: SourceId::GoogleCareers.as_str().to_string(),
                        message: err.to_string(),
                    });
                }
            }
            Ok(run)
        }
        .instrument(span)
        .await
    }
}
