use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use resagg_core::ConferenceRecord;
use resagg_storage::{ListingStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConferenceReminder {
    pub title: String,
    pub date: NaiveDate,
    pub days_until: i64,
    pub venue: String,
    pub topic: String,
    pub link: Option<String>,
}

/// Where upcoming-conference reminders are delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, reminder: &ConferenceReminder) -> Result<()>;
}

/// Emits each reminder as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, reminder: &ConferenceReminder) -> Result<()> {
        info!(
            title = %reminder.title,
            date = %reminder.date,
            days_until = reminder.days_until,
            venue = %reminder.venue,
            topic = %reminder.topic,
            "upcoming conference"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub matched: usize,
    pub notified: usize,
}

/// Read-only scan for conferences starting within `window_days` of today (both ends
/// inclusive).
pub struct ReminderScanner {
    store: Arc<dyn ListingStore>,
    notifier: Arc<dyn Notifier>,
    window_days: i64,
}

/// Upper bound on the look-ahead; larger settings are clamped to it.
pub const MAX_REMINDER_WINDOW_DAYS: i64 = 366;

impl ReminderScanner {
    pub fn new(store: Arc<dyn ListingStore>, notifier: Arc<dyn Notifier>, window_days: i64) -> Self {
        Self {
            store,
            notifier,
            window_days: window_days.clamp(0, MAX_REMINDER_WINDOW_DAYS),
        }
    }

    pub async fn scan(&self, today: NaiveDate) -> Result<ReminderSummary, StoreError> {
        let until = today + Duration::days(self.window_days);
        let upcoming = self.store.conferences_dated_between(today, until).await?;

        let mut summary = ReminderSummary {
            window_start: Some(today),
            window_end: Some(until),
            matched: upcoming.len(),
            notified: 0,
        };
        for conference in &upcoming {
            let Some(reminder) = reminder_for(conference, today) else {
                continue;
            };
            match self.notifier.notify(&reminder).await {
                Ok(()) => summary.notified += 1,
                Err(err) => warn!(title = %reminder.title, error = %err, "reminder delivery failed"),
            }
        }
        info!(
            from = %today,
            to = %until,
            matched = summary.matched,
            notified = summary.notified,
            "reminder scan finished"
        );
        Ok(summary)
    }
}

fn reminder_for(conference: &ConferenceRecord, today: NaiveDate) -> Option<ConferenceReminder> {
    let date = conference.event_date()?;
    Some(ConferenceReminder {
        title: conference.title.clone(),
        date,
        days_until: (date - today).num_days(),
        venue: conference.venue.clone(),
        topic: conference.topic.clone(),
        link: conference.link.clone(),
    })
}
