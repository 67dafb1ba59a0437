//! Row types matching the database schema.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`, reading columns in the order of the matching `COLS`
//! constant in its query module.

use chrono::{DateTime, SecondsFormat, Utc};
use pinmonl_common::{JobId, JobState, MonlId, PinlId, Report, Target, TargetKind};
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Format a timestamp the way every table stores it.
///
/// The fixed precision keeps lexicographic order equal to time order, which
/// the due-job query relies on.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_opt_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => {
            let uuid = Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))?;
            Ok(Some(T::from(uuid)))
        }
        None => Ok(None),
    }
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_err(idx, e)),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ParseError(String);

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub target: Target,
    pub dedup_key: String,
    pub state: JobState,
    pub run_at: DateTime<Utc>,
    /// Number of times `execute` has run for this record.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let kind: String = row.get(2)?;
        let kind: TargetKind = kind.parse().map_err(|e| conversion_err(2, ParseError(e)))?;
        let state: String = row.get(5)?;
        let state: JobState = state.parse().map_err(|e| conversion_err(5, ParseError(e)))?;

        Ok(Self {
            id: parse_id(row, 0)?,
            name: row.get(1)?,
            target: Target {
                kind,
                id: row.get(3)?,
            },
            dedup_key: row.get(4)?,
            state,
            run_at: parse_ts(row, 6)?,
            attempts: row.get(7)?,
            max_attempts: row.get(8)?,
            last_error: row.get(9)?,
            claimed_by: row.get(10)?,
            started_at: parse_opt_ts(row, 11)?,
            finished_at: parse_opt_ts(row, 12)?,
            created_at: parse_ts(row, 13)?,
            updated_at: parse_ts(row, 14)?,
        })
    }

    /// Attempts left before the record becomes terminally failed.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Everything needed to insert a new job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub name: String,
    pub target: Target,
    pub dedup_key: String,
    /// `None` means run as soon as a worker is free.
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
}

// ---------------------------------------------------------------------------
// Monl
// ---------------------------------------------------------------------------

/// A monitored canonical URL shared by every pinl pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monl {
    pub id: MonlId,
    pub url: String,
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monl {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            url: row.get(1)?,
            fetched_at: parse_opt_ts(row, 2)?,
            created_at: parse_ts(row, 3)?,
            updated_at: parse_ts(row, 4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Pinl
// ---------------------------------------------------------------------------

/// A user bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pinl {
    pub id: PinlId,
    pub url: String,
    pub monl_id: Option<MonlId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pinl {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            url: row.get(1)?,
            monl_id: parse_opt_id(row, 2)?,
            created_at: parse_ts(row, 3)?,
            updated_at: parse_ts(row, 4)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Latest report fetched for a monl from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub monl_id: MonlId,
    pub provider: String,
    pub uri: String,
    pub report: Report,
    pub fetched_at: DateTime<Utc>,
}

impl StoredReport {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let raw: String = row.get(3)?;
        let report = serde_json::from_str(&raw).map_err(|e| conversion_err(3, e))?;
        Ok(Self {
            monl_id: parse_id(row, 0)?,
            provider: row.get(1)?,
            uri: row.get(2)?,
            report,
            fetched_at: parse_ts(row, 4)?,
        })
    }
}
