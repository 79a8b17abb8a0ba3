use std::sync::Arc;

use resagg_core::{ConferenceRecord, IdentityKey, OpportunityRecord};
use resagg_storage::{ListingStore, StoreError, UpsertOutcome};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl WriteCounts {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// An upsert the store rejected. The rest of the run is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub key: IdentityKey,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub conferences: WriteCounts,
    pub opportunities: WriteCounts,
    pub failures: Vec<WriteFailure>,
}

impl WriteSummary {
    pub fn written(&self) -> usize {
        self.conferences.total() + self.opportunities.total()
    }
}

/// Applies scraped records to the store as keyed upserts, one statement per record, in
/// input order. A key repeated within one batch ends up holding its last occurrence.
pub struct IngestionWriter {
    store: Arc<dyn ListingStore>,
}

impl IngestionWriter {
    pub fn new(store: Arc<dyn ListingStore>) -> Self {
        Self { store }
    }

    pub async fn write(
        &self,
        run_id: Uuid,
        conferences: &[ConferenceRecord],
        opportunities: &[OpportunityRecord],
    ) -> WriteSummary {
        let mut summary = WriteSummary::default();

        for record in conferences {
            let outcome = self.store.upsert_conference(record).await;
            apply(&mut summary.conferences, &mut summary.failures, run_id, record.identity_key(), outcome);
        }
        for record in opportunities {
            let outcome = self.store.upsert_opportunity(record).await;
            apply(&mut summary.opportunities, &mut summary.failures, run_id, record.identity_key(), outcome);
        }

        info!(
            run_id = %run_id,
            conferences_inserted = summary.conferences.inserted,
            conferences_updated = summary.conferences.updated,
            opportunities_inserted = summary.opportunities.inserted,
            opportunities_updated = summary.opportunities.updated,
            failures = summary.failures.len(),
            "ingestion write finished"
        );
        summary
    }
}

fn apply(
    counts: &mut WriteCounts,
    failures: &mut Vec<WriteFailure>,
    run_id: Uuid,
    key: IdentityKey,
    outcome: Result<UpsertOutcome, StoreError>,
) {
    match outcome {
        Ok(outcome) => counts.record(outcome),
        Err(err) => {
            warn!(run_id = %run_id, key = %key, error = %err, "upsert failed");
            failures.push(WriteFailure {
                key,
                message: err.to_string(),
            });
        }
    }
}
