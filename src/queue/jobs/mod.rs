//! Built-in job types.

mod monl_crawler;
mod pinl_updated;

pub use monl_crawler::MonlCrawler;
pub use pinl_updated::PinlUpdated;

use std::str::FromStr;

use pinmonl_common::{Error, Result, TargetKind};
use pinmonl_db::models::JobRecord;

/// Parse the target id of a claimed record, checking its kind.
fn target_id<T: FromStr>(record: &JobRecord, kind: TargetKind) -> Result<T> {
    if record.target.kind != kind {
        return Err(Error::invalid_input(format!(
            "{} job expects a {kind} target, got {}",
            record.name, record.target
        )));
    }
    record
        .target
        .id
        .parse()
        .map_err(|_| Error::invalid_input(format!("invalid {kind} id: {}", record.target.id)))
}
