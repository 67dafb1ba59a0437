//! Collaborators the built-in jobs read from and write to.
//!
//! Jobs only see these traits. [`SqliteStore`] is the production
//! implementation over `pinmonl-db`; tests can swap in their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pinmonl_common::{MonlId, PinlId, Result};
use pinmonl_db::pool::{get_conn, DbPool};
use pinmonl_db::queries::{monls, pinls, reports};

use crate::monler::RepoHandle;

/// Resolves bookmarks to tracked monls.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// URL of a pinl, `None` if the pinl no longer exists.
    async fn pinl_url(&self, id: PinlId) -> Result<Option<String>>;

    /// Find the monl for a canonical URL, creating it if needed.
    /// Returns `(id, created)`.
    async fn find_or_create_monl(&self, url: &str) -> Result<(MonlId, bool)>;

    async fn attach_monl(&self, pinl: PinlId, monl: MonlId) -> Result<()>;

    async fn monl_url(&self, id: MonlId) -> Result<Option<String>>;

    /// When the monl was last crawled, `None` if never (or if it is gone).
    async fn monl_fetched_at(&self, id: MonlId) -> Result<Option<DateTime<Utc>>>;
}

/// Persists provider reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save_report(
        &self,
        monl: MonlId,
        handle: &RepoHandle,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_fetched(&self, monl: MonlId, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TargetResolver for SqliteStore {
    async fn pinl_url(&self, id: PinlId) -> Result<Option<String>> {
        let conn = get_conn(&self.db)?;
        Ok(pinls::get_pinl(&conn, id)?.map(|p| p.url))
    }

    async fn find_or_create_monl(&self, url: &str) -> Result<(MonlId, bool)> {
        let conn = get_conn(&self.db)?;
        let (monl, created) = monls::find_or_create(&conn, url)?;
        Ok((monl.id, created))
    }

    async fn attach_monl(&self, pinl: PinlId, monl: MonlId) -> Result<()> {
        let conn = get_conn(&self.db)?;
        pinls::set_monl(&conn, pinl, monl)
    }

    async fn monl_url(&self, id: MonlId) -> Result<Option<String>> {
        let conn = get_conn(&self.db)?;
        Ok(monls::get_monl(&conn, id)?.map(|m| m.url))
    }

    async fn monl_fetched_at(&self, id: MonlId) -> Result<Option<DateTime<Utc>>> {
        let conn = get_conn(&self.db)?;
        Ok(monls::get_monl(&conn, id)?.and_then(|m| m.fetched_at))
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn save_report(
        &self,
        monl: MonlId,
        handle: &RepoHandle,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = get_conn(&self.db)?;
        reports::upsert_report(
            &conn,
            monl,
            &handle.provider,
            &handle.uri.to_string(),
            &handle.report,
            fetched_at,
        )
    }

    async fn mark_fetched(&self, monl: MonlId, at: DateTime<Utc>) -> Result<()> {
        let conn = get_conn(&self.db)?;
        if !monls::touch_fetched(&conn, monl, at)? {
            tracing::debug!(monl_id = %monl, "Monl vanished before fetch was recorded");
        }
        Ok(())
    }
}
