//! Durable job queue: job model, dispatcher, built-in jobs, and the stores
//! they run against.

pub mod backoff;
pub mod dispatcher;
pub mod job;
pub mod jobs;
pub mod refresh;
pub mod store;

pub use backoff::Backoff;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use job::{Job, JobContext, JobRegistry};
pub use jobs::{MonlCrawler, PinlUpdated};
pub use store::{ReportStore, SqliteStore, TargetResolver};
