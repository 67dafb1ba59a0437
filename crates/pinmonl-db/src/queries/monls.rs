//! Monl (monitored URL) operations.

use chrono::{DateTime, Utc};
use pinmonl_common::{Error, MonlId, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{fmt_ts, Monl};

const COLS: &str = "id, url, fetched_at, created_at, updated_at";

/// Find the monl for a canonical URL, creating it if missing.
///
/// Returns the monl and whether this call created it. The insert and the
/// uniqueness check are one statement, so concurrent callers agree on a
/// single winner.
pub fn find_or_create(conn: &Connection, url: &str) -> Result<(Monl, bool)> {
    let id = MonlId::new();
    let now = fmt_ts(Utc::now());

    let inserted = conn
        .execute(
            "INSERT INTO monls (id, url, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(url) DO NOTHING",
            params![id.to_string(), url, now],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let monl = find_by_url(conn, url)?
        .ok_or_else(|| Error::database(format!("monl for {url} vanished after insert")))?;
    Ok((monl, inserted == 1))
}

/// Get a monl by ID.
pub fn get_monl(conn: &Connection, id: MonlId) -> Result<Option<Monl>> {
    let q = format!("SELECT {COLS} FROM monls WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], Monl::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Get a monl by its canonical URL.
pub fn find_by_url(conn: &Connection, url: &str) -> Result<Option<Monl>> {
    let q = format!("SELECT {COLS} FROM monls WHERE url = ?1");
    conn.query_row(&q, [url], Monl::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// List monls never fetched or last fetched at or before `cutoff`, oldest
/// first.
pub fn list_stale(conn: &Connection, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Monl>> {
    let q = format!(
        "SELECT {COLS} FROM monls
         WHERE fetched_at IS NULL OR fetched_at <= ?1
         ORDER BY fetched_at IS NOT NULL, fetched_at ASC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params![fmt_ts(cutoff), limit], Monl::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Record that a monl was just crawled.
pub fn touch_fetched(conn: &Connection, id: MonlId, at: DateTime<Utc>) -> Result<bool> {
    let at = fmt_ts(at);
    let n = conn
        .execute(
            "UPDATE monls SET fetched_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![at, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}
