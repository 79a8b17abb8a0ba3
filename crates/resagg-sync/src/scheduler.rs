//! Daily triggers: ingestion (scrape then write) and the read-only reminder scan.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::orchestrator::panic_message;
use crate::{IngestionPipeline, ReminderScanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiringOutcome {
    Completed,
    Failed(String),
    /// A previous firing of the same trigger was still running.
    Skipped,
}

/// Non-reentrant job runner. At most one firing per trigger runs at a time; errors and
/// panics end the firing and put the trigger back to idle.
#[derive(Debug)]
pub struct Trigger {
    name: &'static str,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Trigger {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TriggerState {
        if self.running.load(Ordering::Acquire) {
            TriggerState::Running
        } else {
            TriggerState::Idle
        }
    }

    pub async fn fire<F, Fut, T>(&self, job: F) -> FiringOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(trigger = self.name, "previous firing still running; skipping");
            return FiringOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let started = Utc::now();
        info!(trigger = self.name, "firing");
        match AssertUnwindSafe(job()).catch_unwind().await {
            Ok(Ok(_)) => {
                let elapsed_ms = (Utc::now() - started).num_milliseconds();
                info!(trigger = self.name, elapsed_ms, "firing completed");
                FiringOutcome::Completed
            }
            Ok(Err(err)) => {
                error!(trigger = self.name, error = %format!("{err:#}"), "firing failed");
                FiringOutcome::Failed(format!("{err:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(trigger = self.name, panic = %message, "firing panicked");
                FiringOutcome::Failed(format!("panicked: {message}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Six-field cron expressions (seconds first), evaluated in UTC.
    pub ingest_cron: String,
    pub reminder_cron: String,
}

struct Firings {
    pipeline: Arc<IngestionPipeline>,
    reminder: Arc<ReminderScanner>,
    ingestion: Trigger,
    reminders: Trigger,
}

impl Firings {
    async fn ingest(&self) -> FiringOutcome {
        self.ingestion.fire(|| self.pipeline.run_once()).await
    }

    async fn remind(&self) -> FiringOutcome {
        self.reminders
            .fire(|| async {
                let today = Utc::now().date_naive();
                self.reminder.scan(today).await.context("reminder scan")
            })
            .await
    }
}

/// Owns the cron scheduler and both triggers. Dropping it without `stop` leaves the
/// scheduler's background task to the runtime.
pub struct IngestScheduler {
    firings: Arc<Firings>,
    config: ScheduleConfig,
    scheduler: Option<JobScheduler>,
}

impl IngestScheduler {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        reminder: Arc<ReminderScanner>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            firings: Arc::new(Firings {
                pipeline,
                reminder,
                ingestion: Trigger::new("ingestion"),
                reminders: Trigger::new("reminder"),
            }),
            config,
            scheduler: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn ingestion_state(&self) -> TriggerState {
        self.firings.ingestion.state()
    }

    pub fn reminder_state(&self) -> TriggerState {
        self.firings.reminders.state()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let firings = self.firings.clone();
        let ingest = Job::new_async(self.config.ingest_cron.as_str(), move |_uuid, _l| {
            let firings = firings.clone();
            Box::pin(async move {
                firings.ingest().await;
            })
        })
        .with_context(|| format!("creating ingestion job for cron {}", self.config.ingest_cron))?;
        sched.add(ingest).await.context("adding ingestion job")?;

        let firings = self.firings.clone();
        let remind = Job::new_async(self.config.reminder_cron.as_str(), move |_uuid, _l| {
            let firings = firings.clone();
            Box::pin(async move {
                firings.remind().await;
            })
        })
        .with_context(|| format!("creating reminder job for cron {}", self.config.reminder_cron))?;
        sched.add(remind).await.context("adding reminder job")?;

        sched.start().await.context("starting scheduler")?;
        info!(
            ingest_cron = %self.config.ingest_cron,
            reminder_cron = %self.config.reminder_cron,
            "scheduler started"
        );
        self.scheduler = Some(sched);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut sched) = self.scheduler.take() {
            sched.shutdown().await.context("stopping scheduler")?;
            info!("scheduler stopped");
        }
        Ok(())
    }

    /// Run the ingestion trigger once, now.
    pub async fn fire_ingestion(&self) -> FiringOutcome {
        self.firings.ingest().await
    }

    pub async fn fire_reminder(&self) -> FiringOutcome {
        self.firings.remind().await
    }
}
