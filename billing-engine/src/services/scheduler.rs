//! Runs each sweep once per day at its configured time, recording a
//! run-history entry per (kind, date) so restarts and overlapping ticks do
//! not repeat a completed sweep.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::{SweepKind, SweepRun, SweepRunStatus};
use crate::services::metrics::record_sweep_run;
use crate::services::repository::SweepRunRepository;
use crate::services::sweeps::ScheduledReconciliation;
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct SweepScheduler {
    config: SchedulerConfig,
    sweeps: ScheduledReconciliation,
    runs: Arc<dyn SweepRunRepository>,
    clock: Arc<dyn Clock>,
    shutdown_token: CancellationToken,
}

impl SweepScheduler {
    pub fn new(
        config: SchedulerConfig,
        sweeps: ScheduledReconciliation,
        runs: Arc<dyn SweepRunRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sweeps,
            runs,
            clock,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    fn scheduled_at(&self, kind: SweepKind) -> NaiveTime {
        match kind {
            SweepKind::Renewal => self.config.renewal_at,
            SweepKind::DueSoon => self.config.due_soon_at,
            SweepKind::Overdue => self.config.overdue_at,
        }
    }

    /// Ticks until the shutdown token is cancelled.
    pub async fn start(self) {
        if !self.config.enabled {
            tracing::info!("Sweep scheduler disabled by configuration");
            return;
        }

        tracing::info!(
            tick_seconds = self.config.tick_seconds,
            renewal_at = %self.config.renewal_at,
            due_soon_at = %self.config.due_soon_at,
            overdue_at = %self.config.overdue_at,
            "Starting sweep scheduler"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.tick_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Sweep scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Runs every sweep whose time of day has arrived and that has not yet
    /// completed today.
    pub async fn tick(&self) -> Vec<SweepRun> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut finished = Vec::new();

        for kind in SweepKind::ALL {
            if now.time() < self.scheduled_at(kind) {
                continue;
            }
            match self.run_once(kind, today).await {
                Ok(Some(run)) => finished.push(run),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(kind = kind.as_str(), error = %e, "Sweep bookkeeping failed");
                }
            }
        }
        finished
    }

    /// Claims the (kind, date) slot and runs the sweep. `None` when the
    /// slot was already taken.
    pub async fn run_once(&self, kind: SweepKind, today: NaiveDate) -> Result<Option<SweepRun>> {
        let Some(mut run) = self.runs.try_begin(kind, today, self.clock.now()).await? else {
            tracing::debug!(kind = kind.as_str(), %today, "Sweep already ran today");
            return Ok(None);
        };

        let start = Instant::now();
        tracing::info!(kind = kind.as_str(), %today, "Sweep started");

        let result = match kind {
            SweepKind::Renewal => self.sweeps.run_renewals(today).await,
            SweepKind::DueSoon => self.sweeps.run_due_soon(today).await,
            SweepKind::Overdue => self.sweeps.run_overdue(today).await,
        };

        run.finished_utc = Some(self.clock.now());
        match result {
            Ok(report) => {
                run.status = SweepRunStatus::Completed;
                run.report = Some(report);
                record_sweep_run(kind.as_str(), "completed");
                ::metrics::histogram!("billing_sweep_duration", "kind" => kind.as_str())
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    kind = kind.as_str(),
                    scanned = report.scanned,
                    updated = report.updated,
                    notified = report.notified,
                    skipped = report.skipped,
                    failed = report.failed,
                    duration_ms = start.elapsed().as_millis(),
                    "Sweep completed"
                );
            }
            Err(e) => {
                run.status = SweepRunStatus::Failed;
                run.error_message = Some(e.to_string());
                record_sweep_run(kind.as_str(), "failed");
                tracing::error!(kind = kind.as_str(), error = %e, "Sweep failed");
            }
        }

        self.runs.finish(&run).await?;
        Ok(Some(run))
    }
}
