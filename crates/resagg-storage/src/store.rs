//! Keyed listing store: Postgres for production, an in-memory table for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use resagg_core::{ConferenceRecord, IdentityKey, OpportunityRecord, SourceId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Pool exhaustion and connection loss surface as `Unavailable`; everything else the
/// driver reports stays a `Database` error.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ) {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Persistent listing store keyed by `(normalize(title), source)` per record type.
///
/// Upserts replace every non-key field of an existing record. Reads are ordered most
/// recently ingested first.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn upsert_conference(&self, record: &ConferenceRecord)
        -> Result<UpsertOutcome, StoreError>;

    async fn upsert_opportunity(
        &self,
        record: &OpportunityRecord,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn recent_conferences(&self) -> Result<Vec<ConferenceRecord>, StoreError>;

    async fn recent_opportunities(&self) -> Result<Vec<OpportunityRecord>, StoreError>;

    /// Conferences whose parsed date falls in `[from, to]`, earliest first.
    async fn conferences_dated_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ConferenceRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn outcome_from_row(row: &PgRow) -> Result<UpsertOutcome, StoreError> {
    let inserted: bool = row.try_get("inserted")?;
    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

fn source_from_row(row: &PgRow) -> Result<SourceId, StoreError> {
    let raw: String = row.try_get("source")?;
    raw.parse::<SourceId>()
        .map_err(|e| StoreError::CorruptRow(e.to_string()))
}

fn conference_from_row(row: &PgRow) -> Result<ConferenceRecord, StoreError> {
    Ok(ConferenceRecord {
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        source: source_from_row(row)?,
        scraped_at: row.try_get::<DateTime<Utc>, _>("scraped_at")?,
        date: row.try_get("date_text")?,
        venue: row.try_get("venue")?,
        topic: row.try_get("topic")?,
    })
}

fn opportunity_from_row(row: &PgRow) -> Result<OpportunityRecord, StoreError> {
    Ok(OpportunityRecord {
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        source: source_from_row(row)?,
        scraped_at: row.try_get::<DateTime<Utc>, _>("scraped_at")?,
        organization: row.try_get("organization")?,
        kind: row.try_get("kind")?,
    })
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn upsert_conference(
        &self,
        record: &ConferenceRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let key = record.identity_key();
        // xmax is zero only for a freshly inserted tuple.
        let row = sqlx::query(
            r#"
            INSERT INTO conferences
                (title_key, source, title, link, date_text, event_date, venue, topic, scraped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (title_key, source) DO UPDATE
               SET title      = EXCLUDED.title,
                   link       = EXCLUDED.link,
                   date_text  = EXCLUDED.date_text,
                   event_date = EXCLUDED.event_date,
                   venue      = EXCLUDED.venue,
                   topic      = EXCLUDED.topic,
                   scraped_at = EXCLUDED.scraped_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&key.title)
        .bind(key.source.as_str())
        .bind(&record.title)
        .bind(&record.link)
        .bind(&record.date)
        .bind(record.event_date())
        .bind(&record.venue)
        .bind(&record.topic)
        .bind(record.scraped_at)
        .fetch_one(&self.pool)
        .await?;
        outcome_from_row(&row)
    }

    async fn upsert_opportunity(
        &self,
        record: &OpportunityRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let key = record.identity_key();
        let row = sqlx::query(
            r#"
            INSERT INTO opportunities
                (title_key, source, title, link, organization, kind, scraped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (title_key, source) DO UPDATE
               SET title        = EXCLUDED.title,
                   link         = EXCLUDED.link,
                   organization = EXCLUDED.organization,
                   kind         = EXCLUDED.kind,
                   scraped_at   = EXCLUDED.scraped_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&key.title)
        .bind(key.source.as_str())
        .bind(&record.title)
        .bind(&record.link)
        .bind(&record.organization)
        .bind(&record.kind)
        .bind(record.scraped_at)
        .fetch_one(&self.pool)
        .await?;
        outcome_from_row(&row)
    }

    async fn recent_conferences(&self) -> Result<Vec<ConferenceRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT title, link, source, date_text, venue, topic, scraped_at
              FROM conferences
             ORDER BY scraped_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conference_from_row).collect()
    }

    async fn recent_opportunities(&self) -> Result<Vec<OpportunityRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT title, link, source, organization, kind, scraped_at
              FROM opportunities
             ORDER BY scraped_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(opportunity_from_row).collect()
    }

    async fn conferences_dated_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ConferenceRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT title, link, source, date_text, venue, topic, scraped_at
              FROM conferences
             WHERE event_date BETWEEN $1 AND $2
             ORDER BY event_date, title
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conference_from_row).collect()
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    seq: u64,
    record: T,
}

#[derive(Debug, Default)]
struct MemoryTables {
    next_seq: u64,
    conferences: HashMap<IdentityKey, Slot<ConferenceRecord>>,
    opportunities: HashMap<IdentityKey, Slot<OpportunityRecord>>,
}

/// In-process store with the same keying and ordering rules as the Postgres schema.
/// An updated record keeps its original insertion sequence, like a row keeps its id.
#[derive(Debug, Default)]
pub struct MemoryListingStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn conference_count(&self) -> usize {
        self.tables.read().await.conferences.len()
    }

    pub async fn opportunity_count(&self) -> usize {
        self.tables.read().await.opportunities.len()
    }
}

fn upsert_slot<T>(
    table: &mut HashMap<IdentityKey, Slot<T>>,
    next_seq: &mut u64,
    key: IdentityKey,
    record: T,
) -> UpsertOutcome {
    match table.get_mut(&key) {
        Some(slot) => {
            slot.record = record;
            UpsertOutcome::Updated
        }
        None => {
            *next_seq += 1;
            table.insert(
                key,
                Slot {
                    seq: *next_seq,
                    record,
                },
            );
            UpsertOutcome::Inserted
        }
    }
}

fn most_recent_first<T: Clone>(
    table: &HashMap<IdentityKey, Slot<T>>,
    scraped_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut slots = table.values().collect::<Vec<_>>();
    slots.sort_by(|a, b| {
        scraped_at(&b.record)
            .cmp(&scraped_at(&a.record))
            .then(b.seq.cmp(&a.seq))
    });
    slots.into_iter().map(|s| s.record.clone()).collect()
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn upsert_conference(
        &self,
        record: &ConferenceRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let MemoryTables {
            next_seq,
            conferences,
            ..
        } = &mut *tables;
        Ok(upsert_slot(
            conferences,
            next_seq,
            record.identity_key(),
            record.clone(),
        ))
    }

    async fn upsert_opportunity(
        &self,
        record: &OpportunityRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let MemoryTables {
            next_seq,
            opportunities,
            ..
        } = &mut *tables;
        Ok(upsert_slot(
            opportunities,
            next_seq,
            record.identity_key(),
            record.clone(),
        ))
    }

    async fn recent_conferences(&self) -> Result<Vec<ConferenceRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(most_recent_first(&tables.conferences, |c| c.scraped_at))
    }

    async fn recent_opportunities(&self) -> Result<Vec<OpportunityRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(most_recent_first(&tables.opportunities, |o| o.scraped_at))
    }

    async fn conferences_dated_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ConferenceRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut hits = tables
            .conferences
            .values()
            .filter_map(|slot| {
                let date = slot.record.event_date()?;
                (from <= date && date <= to).then(|| (date, slot.record.clone()))
            })
            .collect::<Vec<_>>();
        hits.sort_by(|(da, a), (db, b)| da.cmp(db).then_with(|| a.title.cmp(&b.title)));
        Ok(hits.into_iter().map(|(_, record)| record).collect())
    }
}
