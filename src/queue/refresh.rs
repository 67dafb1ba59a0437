//! Periodic re-crawl of monls whose reports have gone stale.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pinmonl_common::{Error, Result};
use pinmonl_db::pool::get_conn;
use pinmonl_db::queries::monls;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::dispatcher::Dispatcher;
use super::jobs::MonlCrawler;

/// Monls considered per refresh pass.
const REFRESH_BATCH: i64 = 500;

/// Enqueue a crawl for every monl not fetched within `max_age`.
///
/// Returns how many new jobs were created; monls that already have an
/// active crawl are coalesced and not counted.
pub fn enqueue_stale(dispatcher: &Dispatcher, max_age: Duration) -> Result<usize> {
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| Error::invalid_input(format!("refresh interval out of range: {e}")))?;
    let cutoff = Utc::now() - max_age;

    let stale = {
        let conn = get_conn(dispatcher.db())?;
        monls::list_stale(&conn, cutoff, REFRESH_BATCH)?
    };

    let mut created = 0;
    for monl in &stale {
        if dispatcher.enqueue(&MonlCrawler::new(monl.id))?.created {
            created += 1;
        }
    }
    Ok(created)
}

/// Run [`enqueue_stale`] every `interval` until cancelled.
pub async fn run_refresh(dispatcher: Arc<Dispatcher>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Refresh loop started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match enqueue_stale(&dispatcher, interval) {
                    Ok(0) => {}
                    Ok(n) => info!(count = n, "Enqueued stale monls for crawling"),
                    Err(e) => error!(error = %e, "Refresh pass failed"),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    info!("Refresh loop stopped");
}
