//! Topic-indexed conference listings (static HTML tables, one page per topic).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use resagg_core::{ConferenceRecord, ListingRecord, SourceId};
use resagg_storage::{PageFetcher, Url};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{text_or_none, AdapterContext, AdapterError, AdapterIssue, AdapterRun, SourceAdapter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub url: String,
}

impl Topic {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

const DEFAULT_TOPICS: [(&str, &str); 12] = [
    ("Business and Economics", "https://allconferencealert.net/business-and-economics.php"),
    ("Education", "https://allconferencealert.net/education.php"),
    ("Health and Medicine", "https://allconferencealert.net/health-and-medicine.php"),
    ("Interdisciplinary", "https://allconferencealert.net/interdisciplinary.php"),
    ("Law", "https://allconferencealert.net/law.php"),
    ("Engineering Topics", "https://allconferencealert.net/engineering.php"),
    ("Engineering and Technology", "https://allconferencealert.net/engineering-and-technology.php"),
    ("Mathematics and Statistics", "https://allconferencealert.net/mathematics-and-statistics.php"),
    ("Social Sciences and Humanities", "https://allconferencealert.net/social-sciences-and-humanities.php"),
    ("Regional Studies", "https://allconferencealert.net/regional-studies.php"),
    ("Physical and Life Sciences", "https://allconferencealert.net/physical-and-life-sciences.php"),
    ("Sports Science", "https://allconferencealert.net/topics/sport-science.php"),
];

/// Subject areas of the conference listing site, fetched as independent pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCatalog {
    topics: Vec<Topic>,
}

impl TopicCatalog {
    pub fn new(topics: Vec<Topic>) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl Default for TopicCatalog {
    fn default() -> Self {
        Self::new(
            DEFAULT_TOPICS
                .iter()
                .map(|(name, url)| Topic::new(*name, *url))
                .collect(),
        )
    }
}

/// Where one field lives inside a row: element text, or an attribute when `attr` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub selector: String,
    #[serde(default)]
    pub attr: Option<String>,
}

impl FieldRule {
    pub fn text(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: None,
        }
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
        }
    }
}

/// Declarative row extraction. Markup drift on the listing site is absorbed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRules {
    pub row: String,
    pub date: FieldRule,
    pub title: FieldRule,
    pub link: FieldRule,
    pub venue: FieldRule,
}

impl Default for TableRules {
    fn default() -> Self {
        Self {
            row: "table tr".to_string(),
            date: FieldRule::text("td:nth-child(1)"),
            title: FieldRule::text("td:nth-child(2) a"),
            link: FieldRule::attr("td:nth-child(2) a", "href"),
            venue: FieldRule::text("td:nth-child(3)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConferenceAlertConfig {
    pub enabled: bool,
    pub topics: Vec<Topic>,
    pub rules: TableRules,
}

impl Default for ConferenceAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topics: TopicCatalog::default().topics,
            rules: TableRules::default(),
        }
    }
}

#[derive(Debug)]
struct CompiledField {
    selector: Selector,
    attr: Option<String>,
}

impl CompiledField {
    fn compile(rule: &FieldRule) -> Result<Self, AdapterError> {
        let selector = Selector::parse(&rule.selector).map_err(|e| {
            AdapterError::Parse(format!("invalid selector `{}`: {e}", rule.selector))
        })?;
        Ok(Self {
            selector,
            attr: rule.attr.clone(),
        })
    }

    fn extract(&self, row: &ElementRef<'_>) -> Option<String> {
        let node = row.select(&self.selector).next()?;
        match &self.attr {
            Some(attr) => node.value().attr(attr).and_then(|v| text_or_none(v.to_string())),
            None => text_or_none(node.text().collect::<String>()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CompiledRules {
    row_source: String,
    row: Selector,
    date: CompiledField,
    title: CompiledField,
    link: CompiledField,
    venue: CompiledField,
}

impl CompiledRules {
    pub(crate) fn compile(rules: &TableRules) -> Result<Self, AdapterError> {
        let row = Selector::parse(&rules.row)
            .map_err(|e| AdapterError::Parse(format!("invalid selector `{}`: {e}", rules.row)))?;
        Ok(Self {
            row_source: rules.row.clone(),
            row,
            date: CompiledField::compile(&rules.date)?,
            title: CompiledField::compile(&rules.title)?,
            link: CompiledField::compile(&rules.link)?,
            venue: CompiledField::compile(&rules.venue)?,
        })
    }
}

fn resolve_link(base: Option<&Url>, href: String) -> String {
    match base.and_then(|b| b.join(&href).ok()) {
        Some(url) => url.to_string(),
        None => href,
    }
}

/// Parse one topic page into conference records. Rows without a title are skipped; a
/// page where the row selector matches nothing is a parse error.
pub fn parse_topic_page(
    html: &str,
    topic: &Topic,
    rules: &TableRules,
    scraped_at: DateTime<Utc>,
) -> Result<Vec<ConferenceRecord>, AdapterError> {
    let compiled = CompiledRules::compile(rules)?;
    parse_with(html, topic, &compiled, scraped_at)
}

fn parse_with(
    html: &str,
    topic: &Topic,
    rules: &CompiledRules,
    scraped_at: DateTime<Utc>,
) -> Result<Vec<ConferenceRecord>, AdapterError> {
    let document = Html::parse_document(html);
    let base = Url::parse(&topic.url).ok();
    let mut rows = document.select(&rules.row).peekable();
    if rows.peek().is_none() {
        return Err(AdapterError::Parse(format!(
            "no rows matched `{}` on {}",
            rules.row_source, topic.url
        )));
    }

    let mut records = Vec::new();
    for row in rows {
        let Some(title) = rules.title.extract(&row) else {
            continue;
        };
        records.push(ConferenceRecord {
            title,
            link: rules.link.extract(&row).map(|href| resolve_link(base.as_ref(), href)),
            source: SourceId::ConferenceAlert,
            scraped_at,
            date: rules.date.extract(&row).unwrap_or_default(),
            venue: rules.venue.extract(&row).unwrap_or_default(),
            topic: topic.name.clone(),
        });
    }
    Ok(records)
}

pub struct ConferenceAlertAdapter {
    fetcher: Arc<dyn PageFetcher>,
    catalog: TopicCatalog,
    rules: CompiledRules,
    concurrency: usize,
}

impl ConferenceAlertAdapter {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        catalog: TopicCatalog,
        rules: &TableRules,
        concurrency: usize,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            fetcher,
            catalog,
            rules: CompiledRules::compile(rules)?,
            concurrency: concurrency.max(1),
        })
    }

    pub fn from_config(
        fetcher: Arc<dyn PageFetcher>,
        config: &ConferenceAlertConfig,
        concurrency: usize,
    ) -> Result<Self, AdapterError> {
        Self::new(
            fetcher,
            TopicCatalog::new(config.topics.clone()),
            &config.rules,
            concurrency,
        )
    }

    pub fn catalog(&self) -> &TopicCatalog {
        &self.catalog
    }

    async fn scrape_topic<'a>(
        &'a self,
        ctx: &'a AdapterContext,
        topic: &'a Topic,
    ) -> (&'a Topic, Result<Vec<ConferenceRecord>, AdapterError>) {
        let outcome = match self
            .fetcher
            .fetch_text(ctx.run_id, SourceId::ConferenceAlert.slug(), &topic.url)
            .await
        {
            Ok(html) => parse_with(&html, topic, &self.rules, ctx.scraped_at),
            Err(err) => Err(err.into()),
        };
        (topic, outcome)
    }
}

#[async_trait]
impl SourceAdapter for ConferenceAlertAdapter {
    fn source(&self) -> SourceId {
        SourceId::ConferenceAlert
    }

    async fn scrape(&self, ctx: &AdapterContext) -> Result<AdapterRun, AdapterError> {
        // `buffered` keeps catalog order regardless of completion order.
        let fetches = self
            .catalog
            .topics()
            .iter()
            .map(|topic| self.scrape_topic(ctx, topic).boxed())
            .collect::<Vec<_>>();
        let outcomes = stream::iter(fetches)
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut run = AdapterRun::default();
        for (topic, outcome) in outcomes {
            match outcome {
                Ok(records) => {
                    info!(run_id = %ctx.run_id, topic = %topic.name, count = records.len(), "scraped topic");
                    run.records.extend(records.into_iter().map(ListingRecord::from));
                }
                Err(err) => {
                    warn!(run_id = %ctx.run_id, topic = %topic.name, error = %err, "topic scrape failed");
                    run.issues.push(AdapterIssue {
                        scope: topic.name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        info!(
            run_id = %ctx.run_id,
            topics = self.catalog.len(),
            failed = run.issues.len(),
            conferences = run.records.len(),
            "conference listings scraped"
        );
        Ok(run)
    }
}
