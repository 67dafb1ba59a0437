//! Pinl (bookmark) operations.

use chrono::Utc;
use pinmonl_common::{Error, MonlId, PinlId, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{fmt_ts, Pinl};

const COLS: &str = "id, url, monl_id, created_at, updated_at";

/// Create a new pinl for a URL as entered by the user.
pub fn create_pinl(conn: &Connection, url: &str) -> Result<Pinl> {
    let id = PinlId::new();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO pinls (id, url, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![id.to_string(), url, fmt_ts(now)],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Pinl {
        id,
        url: url.to_string(),
        monl_id: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a pinl by ID.
pub fn get_pinl(conn: &Connection, id: PinlId) -> Result<Option<Pinl>> {
    let q = format!("SELECT {COLS} FROM pinls WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], Pinl::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Point a pinl at a monl.
pub fn set_monl(conn: &Connection, id: PinlId, monl_id: MonlId) -> Result<()> {
    let n = conn
        .execute(
            "UPDATE pinls SET monl_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![monl_id.to_string(), fmt_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    if n == 0 {
        return Err(Error::not_found(format!("pinl {id}")));
    }
    Ok(())
}
