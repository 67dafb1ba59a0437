//! Database query modules.
//!
//! - jobs: durable job queue (enqueue with dedup, atomic claim, retry bookkeeping)
//! - monls: monitored canonical URLs
//! - pinls: user bookmarks pointing at monls
//! - reports: latest provider report per monl and provider

pub mod jobs;
pub mod monls;
pub mod pinls;
pub mod reports;
