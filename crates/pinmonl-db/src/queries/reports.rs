//! Stored provider reports, one row per (monl, provider).

use chrono::{DateTime, Utc};
use pinmonl_common::{Error, MonlId, Report, Result};
use rusqlite::{params, Connection};

use crate::models::{fmt_ts, StoredReport};

const COLS: &str = "monl_id, provider, uri, report, fetched_at";

/// Insert or replace the latest report a provider produced for a monl.
pub fn upsert_report(
    conn: &Connection,
    monl_id: MonlId,
    provider: &str,
    uri: &str,
    report: &Report,
    fetched_at: DateTime<Utc>,
) -> Result<()> {
    let json = serde_json::to_string(report).map_err(|e| Error::internal(e.to_string()))?;
    conn.execute(
        "INSERT INTO reports (monl_id, provider, uri, report, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(monl_id, provider) DO UPDATE SET
            uri = excluded.uri,
            report = excluded.report,
            fetched_at = excluded.fetched_at",
        params![monl_id.to_string(), provider, uri, json, fmt_ts(fetched_at)],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// List every stored report for a monl, ordered by provider name.
pub fn list_reports(conn: &Connection, monl_id: MonlId) -> Result<Vec<StoredReport>> {
    let q = format!("SELECT {COLS} FROM reports WHERE monl_id = ?1 ORDER BY provider");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([monl_id.to_string()], StoredReport::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
