//! Single-flight periodic job scheduler
//!
//! Each job moves Idle -> Running -> {Succeeded, Failed} -> Idle. A trigger
//! that arrives while a job is Running is skipped, never queued. Ticks that
//! fire later than the grace window (e.g. after the host was suspended) are
//! dropped and the schedule resumes at the next interval boundary.

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::pipeline::JobReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Unit of scheduled work
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> Result<JobReport>;
}

/// Lifecycle state of the scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Idle)
                | (Failed, Idle)
        )
    }
}

/// Result of asking the scheduler to start a job
#[derive(Debug)]
pub enum Trigger {
    Started(JoinHandle<JobState>),
    Skipped,
}

/// What to do with a tick that fired at `now`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Fire,
    Drop,
}

/// Fire when the tick is at most `grace` late
pub fn tick_action(deadline: Instant, now: Instant, grace: Duration) -> TickAction {
    if now.saturating_duration_since(deadline) <= grace {
        TickAction::Fire
    } else {
        TickAction::Drop
    }
}

/// First interval boundary after `now`
pub fn next_deadline(deadline: Instant, now: Instant, interval: Duration) -> Instant {
    let mut next = deadline + interval;
    while next <= now {
        next += interval;
    }
    next
}

/// Counters kept across the scheduler's lifetime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub started: u64,
    pub skipped: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub missed_ticks: u64,
}

#[derive(Debug)]
struct Status {
    state: JobState,
    last_outcome: Option<JobState>,
    stats: SchedulerStats,
}

impl Status {
    fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

fn lock(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodic, single-flight runner for one job
pub struct Scheduler {
    job: Arc<dyn Job>,
    interval: Duration,
    grace: Duration,
    run_on_startup: bool,
    cancel: CancellationToken,
    status: Arc<Mutex<Status>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn Job>, config: &SchedulerConfig, cancel: CancellationToken) -> Self {
        Self::with_timing(
            job,
            config.interval(),
            config.grace(),
            config.run_on_startup,
            cancel,
        )
    }

    pub fn with_timing(
        job: Arc<dyn Job>,
        interval: Duration,
        grace: Duration,
        run_on_startup: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            interval: interval.max(Duration::from_secs(1)),
            grace,
            run_on_startup,
            cancel,
            status: Arc::new(Mutex::new(Status {
                state: JobState::Idle,
                last_outcome: None,
                stats: SchedulerStats::default(),
            })),
        }
    }

    pub fn state(&self) -> JobState {
        lock(&self.status).state
    }

    /// Terminal state of the most recent finished job
    pub fn last_outcome(&self) -> Option<JobState> {
        lock(&self.status).last_outcome
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.status).stats.clone()
    }

    /// Start a job unless one is already running
    pub fn trigger(&self) -> Trigger {
        {
            let mut status = lock(&self.status);
            if !status.state.can_transition_to(JobState::Running) {
                status.stats.skipped += 1;
                warn!("Previous job still running; skipping this trigger");
                return Trigger::Skipped;
            }
            status.transition(JobState::Running);
            status.stats.started += 1;
        }

        let job = Arc::clone(&self.job);
        let status = Arc::clone(&self.status);
        let cancel = self.cancel.clone();
        let job_id = Uuid::new_v4();

        Trigger::Started(tokio::spawn(async move {
            info!(job_id = %job_id, "Job started");
            let started = Instant::now();

            // Inner task so a panicking job still releases the single-flight slot
            let result = tokio::spawn(async move { job.run(job_id, cancel).await }).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(Ok(report)) => {
                    info!(
                        job_id = %job_id,
                        elapsed_ms,
                        rows_inserted = report.load.rows_inserted,
                        files_failed = report.consolidate.files_failed,
                        "Job succeeded"
                    );
                    JobState::Succeeded
                }
                Ok(Err(Error::Cancelled(stage))) => {
                    warn!(job_id = %job_id, stage, "Job cancelled before stage");
                    JobState::Failed
                }
                Ok(Err(e)) => {
                    error!(
                        job_id = %job_id,
                        stage = e.stage().unwrap_or("unknown"),
                        busy = e.is_busy(),
                        elapsed_ms,
                        "Job failed: {}",
                        e
                    );
                    JobState::Failed
                }
                Err(e) => {
                    error!(job_id = %job_id, "Job task aborted: {}", e);
                    JobState::Failed
                }
            };

            let mut status = lock(&status);
            status.transition(outcome);
            match outcome {
                JobState::Succeeded => status.stats.succeeded += 1,
                _ => status.stats.failed += 1,
            }
            status.last_outcome = Some(outcome);
            status.transition(JobState::Idle);
            outcome
        }))
    }

    /// Run until cancelled, then wait for the in-flight job
    pub async fn run(&self) -> Result<SchedulerStats> {
        info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.grace.as_secs(),
            "Scheduler started"
        );

        let mut in_flight: Option<JoinHandle<JobState>> = None;
        if self.run_on_startup {
            self.fire(&mut in_flight);
        }

        let mut deadline = Instant::now() + self.interval;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep_until(deadline) => {}
            }

            let now = Instant::now();
            match tick_action(deadline, now, self.grace) {
                TickAction::Fire => self.fire(&mut in_flight),
                TickAction::Drop => {
                    lock(&self.status).stats.missed_ticks += 1;
                    warn!(
                        late_secs = now.saturating_duration_since(deadline).as_secs(),
                        "Tick missed its grace window; waiting for the next one"
                    );
                }
            }
            deadline = next_deadline(deadline, now, self.interval);
        }

        info!("Shutdown requested");
        if let Some(handle) = in_flight.take() {
            if !handle.is_finished() {
                info!("Waiting for the running job to finish its current stage");
            }
            handle.await?;
        }

        let stats = self.stats();
        info!(
            started = stats.started,
            succeeded = stats.succeeded,
            failed = stats.failed,
            skipped = stats.skipped,
            "Scheduler stopped"
        );
        Ok(stats)
    }

    fn fire(&self, in_flight: &mut Option<JoinHandle<JobState>>) {
        if let Trigger::Started(handle) = self.trigger() {
            *in_flight = Some(handle);
        }
    }
}
