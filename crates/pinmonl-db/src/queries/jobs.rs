//! Durable job queue operations.
//!
//! Every state transition is a single conditional statement (or one
//! immediate transaction) so that concurrent workers can share the table:
//!
//! - [`enqueue`] relies on the partial unique index over active dedup keys.
//! - [`claim_next`] moves exactly one due row from `pending` to `running`.
//! - [`complete_with_followups`] and [`record_failure`] only touch rows that
//!   are still `running`.

use chrono::{DateTime, Utc};
use pinmonl_common::{Error, JobId, JobState, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::models::{fmt_ts, JobRecord, NewJob};

const COLS: &str = "id, name, target_kind, target_id, dedup_key, state, run_at,
    attempts, max_attempts, last_error, claimed_by, started_at, finished_at,
    created_at, updated_at";

/// How many times [`enqueue`] retries when the conflicting active job
/// finished between the insert and the lookup.
const ENQUEUE_RACE_RETRIES: usize = 3;

/// Result of an [`enqueue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: JobId,
    /// `false` when an active job with the same dedup key already existed and
    /// `id` refers to it.
    pub created: bool,
}

/// Insert a job unless an active one with the same dedup key exists.
pub fn enqueue(conn: &Connection, job: &NewJob) -> Result<Enqueued> {
    for _ in 0..ENQUEUE_RACE_RETRIES {
        let id = JobId::new();
        let now = Utc::now();
        let run_at = job.run_at.unwrap_or(now);

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO jobs
                    (id, name, target_kind, target_id, dedup_key, state, run_at,
                     attempts, max_attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, 0, ?7, ?8, ?8)",
                params![
                    id.to_string(),
                    job.name,
                    job.target.kind.as_str(),
                    job.target.id,
                    job.dedup_key,
                    fmt_ts(run_at),
                    job.max_attempts,
                    fmt_ts(now),
                ],
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if inserted == 1 {
            return Ok(Enqueued { id, created: true });
        }

        if let Some(existing) = find_active(conn, &job.dedup_key)? {
            return Ok(Enqueued {
                id: existing.id,
                created: false,
            });
        }
    }

    Err(Error::database(format!(
        "could not enqueue job with dedup key {}",
        job.dedup_key
    )))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<JobRecord>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], JobRecord::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Find the pending or running job holding a dedup key, if any.
pub fn find_active(conn: &Connection, dedup_key: &str) -> Result<Option<JobRecord>> {
    let q = format!(
        "SELECT {COLS} FROM jobs
         WHERE dedup_key = ?1 AND state IN ('pending', 'running')"
    );
    conn.query_row(&q, [dedup_key], JobRecord::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// List jobs, newest first, optionally filtered by state.
pub fn list_jobs(
    conn: &Connection,
    state: Option<JobState>,
    limit: i64,
) -> Result<Vec<JobRecord>> {
    let q = format!(
        "SELECT {COLS} FROM jobs
         WHERE (?1 IS NULL OR state = ?1)
         ORDER BY created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params![state.map(JobState::as_str), limit], JobRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Count jobs in a given state.
pub fn count_by_state(conn: &Connection, state: JobState) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE state = ?1",
        [state.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Atomically claim the earliest-due pending job.
///
/// The sub-select and the update run as one statement under SQLite's write
/// lock, and the outer `state = 'pending'` guard makes the transition
/// conditional, so two workers can never both receive the same row.
pub fn claim_next(
    conn: &Connection,
    worker: &str,
    now: DateTime<Utc>,
) -> Result<Option<JobRecord>> {
    let now = fmt_ts(now);

    // SQLite RETURNING is supported since 3.35.
    let q = format!(
        "UPDATE jobs SET state = 'running', claimed_by = ?1, started_at = ?2, updated_at = ?2
         WHERE id = (
             SELECT id FROM jobs
             WHERE state = 'pending' AND run_at <= ?2
             ORDER BY run_at ASC, created_at ASC LIMIT 1
         ) AND state = 'pending'
         RETURNING {COLS}"
    );

    conn.query_row(&q, params![worker, now], JobRecord::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Mark a running job succeeded and enqueue its follow-ups in the same
/// transaction.
///
/// Returns the outcome of each follow-up enqueue, in order. Fails with
/// `NotFound` (and commits nothing) if the job is no longer running.
pub fn complete_with_followups(
    conn: &mut Connection,
    id: JobId,
    followups: &[NewJob],
) -> Result<Vec<Enqueued>> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))?;

    let now = fmt_ts(Utc::now());
    let updated = tx
        .execute(
            "UPDATE jobs SET state = 'succeeded', attempts = attempts + 1, last_error = NULL,
                claimed_by = NULL, finished_at = ?1, updated_at = ?1
             WHERE id = ?2 AND state = 'running'",
            params![now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if updated == 0 {
        return Err(Error::not_found(format!("running job {id}")));
    }

    let mut outcomes = Vec::with_capacity(followups.len());
    for job in followups {
        outcomes.push(enqueue(&tx, job)?);
    }

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(outcomes)
}

/// How a failed run should be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure<'a> {
    pub error: &'a str,
    /// Whether this run consumed an attempt (validation failures do not).
    pub count_attempt: bool,
    /// Whether the error class allows another attempt at all.
    pub retryable: bool,
    /// When to run again if the job is re-armed.
    pub retry_at: DateTime<Utc>,
}

/// Record a failed run of a running job.
///
/// The job goes back to `pending` at `retry_at` when the error is retryable
/// and attempts remain, otherwise it becomes `failed`. The decision uses the
/// stored counters inside the same statement. Returns the updated record, or
/// `None` if the job was not running.
pub fn record_failure(
    conn: &Connection,
    id: JobId,
    failure: Failure<'_>,
) -> Result<Option<JobRecord>> {
    let now = fmt_ts(Utc::now());
    let q = format!(
        "UPDATE jobs SET
            attempts = attempts + ?1,
            last_error = ?2,
            claimed_by = NULL,
            state = CASE WHEN ?3 AND attempts + ?1 < max_attempts
                         THEN 'pending' ELSE 'failed' END,
            run_at = CASE WHEN ?3 AND attempts + ?1 < max_attempts
                          THEN ?4 ELSE run_at END,
            finished_at = CASE WHEN ?3 AND attempts + ?1 < max_attempts
                               THEN NULL ELSE ?5 END,
            updated_at = ?5
         WHERE id = ?6 AND state = 'running'
         RETURNING {COLS}"
    );

    conn.query_row(
        &q,
        params![
            u32::from(failure.count_attempt),
            failure.error,
            failure.retryable,
            fmt_ts(failure.retry_at),
            now,
            id.to_string(),
        ],
        JobRecord::from_row,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Return jobs left `running` by a previous process to `pending`.
pub fn reset_orphaned(conn: &Connection) -> Result<usize> {
    let now = fmt_ts(Utc::now());
    conn.execute(
        "UPDATE jobs SET state = 'pending', claimed_by = NULL, started_at = NULL, updated_at = ?1
         WHERE state = 'running'",
        [now],
    )
    .map_err(|e| Error::database(e.to_string()))
}
