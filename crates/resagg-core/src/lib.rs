//! Core listing model, identity keys and text normalization for the research aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "resagg-core";

/// Known external sources. The serialized form is the display name persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceId {
    #[serde(rename = "All Conference Alert")]
    ConferenceAlert,
    #[serde(rename = "Google Careers")]
    GoogleCareers,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::ConferenceAlert => "All Conference Alert",
            SourceId::GoogleCareers => "Google Careers",
        }
    }

    /// Short slug used in log fields and fetcher concurrency buckets.
    pub fn slug(&self) -> &'static str {
        match self {
            SourceId::ConferenceAlert => "conference-alert",
            SourceId::GoogleCareers => "google-careers",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown listing source `{}`", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for SourceId {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "All Conference Alert" | "conference-alert" => Ok(SourceId::ConferenceAlert),
            "Google Careers" | "google-careers" => Ok(SourceId::GoogleCareers),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Canonical text used for identity comparison: whitespace runs (newlines included)
/// collapse to one space and the ends are trimmed.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deduplication key shared by both listing variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub title: String,
    pub source: SourceId,
}

impl IdentityKey {
    pub fn new(raw_title: &str, source: SourceId) -> Self {
        Self {
            title: normalize(raw_title),
            source,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.slug(), self.title)
    }
}

/// A conference row scraped from a topic listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceRecord {
    pub title: String,
    pub link: Option<String>,
    pub source: SourceId,
    pub scraped_at: DateTime<Utc>,
    /// Raw date text as shown by the source.
    pub date: String,
    pub venue: String,
    pub topic: String,
}

impl ConferenceRecord {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.title, self.source)
    }

    pub fn event_date(&self) -> Option<NaiveDate> {
        parse_listing_date(&self.date)
    }
}

/// A research opportunity card scraped from a careers portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityRecord {
    pub title: String,
    pub link: String,
    pub source: SourceId,
    pub scraped_at: DateTime<Utc>,
    pub organization: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl OpportunityRecord {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.title, self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListingRecord {
    Conference(ConferenceRecord),
    Opportunity(OpportunityRecord),
}

impl ListingRecord {
    pub fn identity_key(&self) -> IdentityKey {
        match self {
            ListingRecord::Conference(c) => c.identity_key(),
            ListingRecord::Opportunity(o) => o.identity_key(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ListingRecord::Conference(c) => &c.title,
            ListingRecord::Opportunity(o) => &o.title,
        }
    }
}

impl From<ConferenceRecord> for ListingRecord {
    fn from(value: ConferenceRecord) -> Self {
        ListingRecord::Conference(value)
    }
}

impl From<OpportunityRecord> for ListingRecord {
    fn from(value: OpportunityRecord) -> Self {
        ListingRecord::Opportunity(value)
    }
}

/// Ordered output of one adapter invocation.
pub type ScrapeResult = Vec<ListingRecord>;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%B %d %Y",
];

/// Parse the free-form date column of a listing. Ordinal suffixes are dropped and a
/// range (`20th-22nd Oct 2026`, `Oct 20-22, 2026`, `28 Oct - 2 Nov 2026`) resolves to
/// its first day.
pub fn parse_listing_date(raw: &str) -> Option<NaiveDate> {
    let text = normalize(&raw.replace(',', " "));
    if text.is_empty() {
        return None;
    }
    parse_single_date(&text).or_else(|| parse_range_start(&text))
}

fn parse_single_date(text: &str) -> Option<NaiveDate> {
    let cleaned = date_tokens(text).join(" ");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// The left side of the range must carry the day; month and year fall back to the
/// right side when the left one omits them.
fn parse_range_start(text: &str) -> Option<NaiveDate> {
    let (left, right) = text.split_once(|c: char| matches!(c, '-' | '\u{2013}' | '\u{2014}'))?;
    let left = date_tokens(left);
    let right = date_tokens(right);

    let day = left.iter().find(|t| is_day_token(t))?;
    let month = left
        .iter()
        .chain(right.iter())
        .find(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_alphabetic()))?;
    let year = left
        .iter()
        .find(|t| is_year_token(t))
        .or_else(|| right.iter().find(|t| is_year_token(t)))?;

    let candidate = format!("{day} {month} {year}");
    ["%d %b %Y", "%d %B %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&candidate, fmt).ok())
}

fn date_tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(strip_ordinal_suffix).collect()
}

fn is_day_token(token: &str) -> bool {
    (1..=2).contains(&token.len()) && token.chars().all(|c| c.is_ascii_digit())
}

fn is_year_token(token: &str) -> bool {
    token.len() == 4 && token.chars().all(|c| c.is_ascii_digit())
}

fn strip_ordinal_suffix(token: &str) -> String {
    let lower = token.to_ascii_lowercase();
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(digits) = lower.strip_suffix(suffix) {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return digits.to_string();
            }
        }
    }
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_collapses_whitespace_and_newlines() {
        assert_eq!(normalize("a  \n b"), "a b");
        assert_eq!(normalize("\t Intl.\r\nConference  on\u{a0}AI \n"), "Intl. Conference on AI");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\t "), "");
    }

    #[test]
    fn normalize_is_a_fixed_point() {
        for raw in [
            "plain",
            "  leading",
            "trailing\n\n",
            "mixed \t\n  runs   of\r\nspace",
            "\u{2003}em space\u{2003}",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn identity_key_ignores_whitespace_differences_only() {
        let a = IdentityKey::new("World  Congress\non Law", SourceId::ConferenceAlert);
        let b = IdentityKey::new(" World Congress on Law ", SourceId::ConferenceAlert);
        let c = IdentityKey::new("World Congress on Law", SourceId::GoogleCareers);
        let d = IdentityKey::new("world congress on law", SourceId::ConferenceAlert);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.to_string(), "conference-alert:World Congress on Law");
    }

    #[test]
    fn source_id_round_trips_through_display_name() {
        for source in [SourceId::ConferenceAlert, SourceId::GoogleCareers] {
            assert_eq!(source.as_str().parse::<SourceId>().unwrap(), source);
            assert_eq!(source.slug().parse::<SourceId>().unwrap(), source);
        }
        assert!("Indeed".parse::<SourceId>().is_err());
    }

    #[test]
    fn records_serialize_with_public_field_names() {
        let scraped_at = Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).single().unwrap();
        let opp = OpportunityRecord {
            title: "Research Intern".into(),
            link: "https://careers.example/jobs/1".into(),
            source: SourceId::GoogleCareers,
            scraped_at,
            organization: "Google".into(),
            kind: "Research Opportunity".into(),
        };
        let value = serde_json::to_value(&opp).unwrap();
        assert_eq!(value["type"], "Research Opportunity");
        assert_eq!(value["source"], "Google Careers");
        assert!(value.get("scrapedAt").is_some());
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn listing_dates_parse_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        for raw in [
            "2026-10-20",
            "20/10/2026",
            "20 Oct 2026",
            "20th October 2026",
            "20-22 Oct 2026",
            "Oct 20, 2026",
            "  20th\nOct 2026 ",
        ] {
            assert_eq!(parse_listing_date(raw), Some(expected), "input {raw:?}");
        }
        assert_eq!(parse_listing_date("TBA"), None);
        assert_eq!(parse_listing_date(""), None);
    }

    #[test]
    fn listing_date_ranges_resolve_to_first_day() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        for raw in [
            "20th-22nd Oct 2026",
            "20 - 22 Oct 2026",
            "20th \u{2013} 22nd October 2026",
            "Oct 20-22, 2026",
            "October 20th - 22nd, 2026",
            "20 Oct - 2 Nov 2026",
            "20th Oct 2026 - 2nd Nov 2026",
        ] {
            assert_eq!(parse_listing_date(raw), Some(expected), "input {raw:?}");
        }
        assert_eq!(
            parse_listing_date("28 Dec 2026 - 2 Jan 2027"),
            NaiveDate::from_ymd_opt(2026, 12, 28)
        );
        assert_eq!(parse_listing_date("Oct - Nov 2026"), None);
        assert_eq!(parse_listing_date("31-32 Feb 2026"), None);
    }

    #[test]
    fn conference_event_date_uses_raw_date_column() {
        let record = ConferenceRecord {
            title: "ICEE".into(),
            link: None,
            source: SourceId::ConferenceAlert,
            scraped_at: Utc::now(),
            date: "3rd Nov 2026".into(),
            venue: "Paris, France".into(),
            topic: "Education".into(),
        };
        assert_eq!(record.event_date(), NaiveDate::from_ymd_opt(2026, 11, 3));
    }
}
