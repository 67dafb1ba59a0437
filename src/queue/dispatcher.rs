//! Durable job dispatcher.
//!
//! Workers poll the `jobs` table, claim the earliest due job with a single
//! conditional update, run `validate` then `execute`, and persist the
//! outcome:
//!
//! - success: `succeeded`, with follow-up jobs enqueued in the same
//!   transaction
//! - failure with attempts left and a retryable error: back to `pending`
//!   at `now + backoff(attempts)`
//! - anything else: `failed`
//!
//! Panics in job code are caught and treated like transient errors, and a
//! cancelled `execute` is recorded as [`Error::Cancelled`], so a worker only
//! ever stops when its cancellation token fires.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use pinmonl_common::{Error, JobState, Result};
use pinmonl_db::models::{JobRecord, NewJob};
use pinmonl_db::pool::{get_conn, DbPool};
use pinmonl_db::queries::jobs::{self, Enqueued, Failure};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::job::{Job, JobContext, JobRegistry};
use crate::config::QueueConfig;
use crate::events::{JobEvent, JobEventKind, Notifier};

/// Longest a retry is ever pushed out, whatever the configured cap.
const MAX_RETRY_DELAY_WEEKS: i64 = 52;

/// Writes of a failed outcome are attempted this many times.
const PERSIST_TRIES: u32 = 3;
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Runtime settings for a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    /// Default attempt budget for jobs that do not set their own.
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub backoff: Backoff,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for DispatcherConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            workers: config.workers,
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval(),
            backoff: Backoff::new(config.retry_base_delay(), config.retry_max_delay()),
        }
    }
}

/// Which hook a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validate,
    Execute,
}

#[derive(Debug)]
struct RunFailure {
    stage: Stage,
    error: Error,
}

impl RunFailure {
    fn validate(error: Error) -> Self {
        Self {
            stage: Stage::Validate,
            error,
        }
    }

    fn execute(error: Error) -> Self {
        Self {
            stage: Stage::Execute,
            error,
        }
    }

    /// Execute runs always count. A validation failure only counts when it
    /// is retryable, so that a flapping pre-check still exhausts the budget.
    fn counts_attempt(&self) -> bool {
        self.stage == Stage::Execute || self.error.is_retryable()
    }
}

pub struct Dispatcher {
    db: DbPool,
    jobs: Arc<JobRegistry>,
    ctx: JobContext,
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        db: DbPool,
        jobs: JobRegistry,
        ctx: JobContext,
        notifier: Arc<dyn Notifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            db,
            jobs: Arc::new(jobs),
            ctx,
            notifier,
            config,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Persist a job unless an active one with the same dedup key exists,
    /// in which case the existing job is returned with `created == false`.
    pub fn enqueue(&self, job: &dyn Job) -> Result<Enqueued> {
        let new_job = self.new_job(job);
        let conn = get_conn(&self.db)?;
        let enqueued = jobs::enqueue(&conn, &new_job)?;
        drop(conn);

        if enqueued.created {
            debug!(job_id = %enqueued.id, name = %new_job.name, target = %new_job.target, "Enqueued job");
            self.notify_enqueued(enqueued, &new_job);
        } else {
            debug!(
                job_id = %enqueued.id,
                dedup_key = %new_job.dedup_key,
                "Coalesced with active job"
            );
        }
        Ok(enqueued)
    }

    /// Return jobs left running by a previous process to pending.
    pub fn reset_orphaned(&self) -> Result<usize> {
        let conn = get_conn(&self.db)?;
        let n = jobs::reset_orphaned(&conn)?;
        if n > 0 {
            warn!(count = n, "Reset orphaned running jobs");
        }
        Ok(n)
    }

    /// Claim and run one due job.
    ///
    /// Returns the job's record after its outcome was persisted, or `None`
    /// if nothing was due.
    pub async fn process_next(
        &self,
        worker: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<JobRecord>> {
        let claimed = {
            let conn = get_conn(&self.db)?;
            jobs::claim_next(&conn, worker, Utc::now())?
        };
        let Some(record) = claimed else {
            return Ok(None);
        };

        info!(
            job_id = %record.id,
            name = %record.name,
            target = %record.target,
            attempt = record.attempts + 1,
            worker,
            "Processing job"
        );
        self.emit(JobEventKind::Started, &record, None, None);

        let updated = match self.run_job(&record, cancel).await {
            Ok(followups) => match self.complete(&record, followups) {
                Ok(updated) => updated,
                Err(e) => {
                    // The success transaction rolled back, so the row is
                    // still running and nothing it enqueued was kept.
                    warn!(job_id = %record.id, error = %e, "Could not record job success");
                    self.persist_failure(&record, RunFailure::execute(e)).await?
                }
            },
            Err(failure) => self.persist_failure(&record, failure).await?,
        };
        Ok(Some(updated))
    }

    async fn run_job(
        &self,
        record: &JobRecord,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Box<dyn Job>>, RunFailure> {
        let job = self.jobs.build(record).map_err(RunFailure::validate)?;
        let ctx = self.ctx.with_cancel(cancel.child_token());

        let validated = AssertUnwindSafe(job.validate(&ctx)).catch_unwind().await;
        match validated {
            Ok(result) => result.map_err(RunFailure::validate)?,
            Err(panic) => return Err(RunFailure::validate(panicked(panic))),
        }

        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = AssertUnwindSafe(job.execute(&ctx)).catch_unwind() => {
                result.unwrap_or_else(|panic| Err(panicked(panic)))
            }
        };
        executed.map_err(RunFailure::execute)
    }

    fn complete(&self, record: &JobRecord, followups: Vec<Box<dyn Job>>) -> Result<JobRecord> {
        let new_jobs: Vec<NewJob> = followups.iter().map(|j| self.new_job(j.as_ref())).collect();

        let mut conn = get_conn(&self.db)?;
        let outcomes = jobs::complete_with_followups(&mut conn, record.id, &new_jobs)?;
        let updated = jobs::get_job(&conn, record.id)?
            .ok_or_else(|| Error::not_found(format!("job {}", record.id)))?;
        drop(conn);

        info!(
            job_id = %record.id,
            name = %record.name,
            followups = new_jobs.len(),
            "Job succeeded"
        );
        self.emit(JobEventKind::Succeeded, &updated, None, None);

        for (enqueued, new_job) in outcomes.into_iter().zip(&new_jobs) {
            if enqueued.created {
                self.notify_enqueued(enqueued, new_job);
            }
        }
        Ok(updated)
    }

    /// [`Self::fail`] with a few short retries, so a busy database does not
    /// strand the row in `running` until the next restart.
    async fn persist_failure(&self, record: &JobRecord, failure: RunFailure) -> Result<JobRecord> {
        let mut tries = 1;
        loop {
            match self.fail(record, &failure) {
                Ok(updated) => return Ok(updated),
                Err(e @ Error::NotFound(_)) => return Err(e),
                Err(e) if tries >= PERSIST_TRIES => return Err(e),
                Err(e) => {
                    warn!(job_id = %record.id, attempt = tries, error = %e, "Could not record job failure, retrying");
                    tokio::time::sleep(PERSIST_RETRY_DELAY * tries).await;
                    tries += 1;
                }
            }
        }
    }

    fn fail(&self, record: &JobRecord, failure: &RunFailure) -> Result<JobRecord> {
        let count_attempt = failure.counts_attempt();
        let retryable = failure.error.is_retryable();
        let attempts = record.attempts + u32::from(count_attempt);
        let delay = chrono::Duration::from_std(self.config.backoff.delay(attempts))
            .unwrap_or_else(|_| chrono::Duration::weeks(MAX_RETRY_DELAY_WEEKS));
        let message = failure.error.to_string();

        let updated = {
            let conn = get_conn(&self.db)?;
            jobs::record_failure(
                &conn,
                record.id,
                Failure {
                    error: &message,
                    count_attempt,
                    retryable,
                    retry_at: Utc::now() + delay,
                },
            )?
        };
        let updated =
            updated.ok_or_else(|| Error::not_found(format!("running job {}", record.id)))?;

        if updated.state == JobState::Pending {
            warn!(
                job_id = %record.id,
                name = %record.name,
                attempts = updated.attempts,
                max_attempts = updated.max_attempts,
                retry_at = %updated.run_at,
                error = %message,
                "Job failed, scheduling retry"
            );
            self.emit(
                JobEventKind::Retrying,
                &updated,
                Some(message),
                Some(updated.run_at),
            );
        } else {
            error!(
                job_id = %record.id,
                name = %record.name,
                attempts = updated.attempts,
                stage = ?failure.stage,
                error = %message,
                "Job failed"
            );
            self.emit(JobEventKind::Failed, &updated, Some(message), None);
        }
        Ok(updated)
    }

    /// Worker loop: process jobs until `cancel` fires, sleeping for the poll
    /// interval whenever the queue has nothing due.
    pub async fn run_worker(&self, worker: String, cancel: CancellationToken) {
        debug!(worker = %worker, "Worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.process_next(&worker, &cancel).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker = %worker, error = %e, "Worker error"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        debug!(worker = %worker, "Worker stopped");
    }

    /// Spawn the configured number of workers and wait for all of them to
    /// stop after `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(workers = self.config.workers, "Dispatcher started");

        let handles: Vec<_> = (0..self.config.workers)
            .map(|n| {
                let dispatcher = Arc::clone(&self);
                let token = cancel.clone();
                tokio::spawn(async move {
                    dispatcher.run_worker(format!("worker-{n}"), token).await;
                })
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }

        info!("Dispatcher stopped");
    }

    fn new_job(&self, job: &dyn Job) -> NewJob {
        let (name, dedup_key) = job.identify();
        NewJob {
            name: name.to_string(),
            target: job.target(),
            dedup_key,
            run_at: job.scheduled_at(),
            max_attempts: job.max_attempts().unwrap_or(self.config.max_attempts),
        }
    }

    fn notify_enqueued(&self, enqueued: Enqueued, new_job: &NewJob) {
        self.notifier.notify(JobEvent {
            kind: JobEventKind::Enqueued,
            job_id: enqueued.id,
            job_name: new_job.name.clone(),
            target: new_job.target.clone(),
            state: JobState::Pending,
            attempts: 0,
            error: None,
            run_at: new_job.run_at,
            timestamp: Utc::now(),
        });
    }

    fn emit(
        &self,
        kind: JobEventKind,
        record: &JobRecord,
        error: Option<String>,
        run_at: Option<DateTime<Utc>>,
    ) {
        self.notifier.notify(JobEvent {
            kind,
            job_id: record.id,
            job_name: record.name.clone(),
            target: record.target.clone(),
            state: record.state,
            attempts: record.attempts,
            error,
            run_at,
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("jobs", &self.jobs)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    Error::internal(format!("job panicked: {message}"))
}
