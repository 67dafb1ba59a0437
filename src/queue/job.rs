//! The unit-of-work abstraction and the registry that rehydrates persisted
//! records into runnable jobs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pinmonl_common::{Error, Result, Target};
use pinmonl_db::models::JobRecord;
use tokio_util::sync::CancellationToken;

use super::jobs::{MonlCrawler, PinlUpdated};
use super::store::{ReportStore, TargetResolver};
use crate::monler::ProviderRegistry;

/// Collaborators a job may use while validating or executing.
#[derive(Clone)]
pub struct JobContext {
    pub resolver: Arc<dyn TargetResolver>,
    pub reports: Arc<dyn ReportStore>,
    pub providers: Arc<ProviderRegistry>,
    /// Cancelled when the owning worker shuts down.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        resolver: Arc<dyn TargetResolver>,
        reports: Arc<dyn ReportStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            resolver,
            reports,
            providers,
            cancel: CancellationToken::new(),
        }
    }

    /// Same collaborators, different cancellation token.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("providers", &self.providers)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A durable, named unit of work tied to one target entity.
#[async_trait]
pub trait Job: Send + Sync + fmt::Debug {
    /// Job-type discriminator, persisted in the `name` column.
    fn name(&self) -> &'static str;

    fn target(&self) -> Target;

    /// `(name, dedup_key)`. At most one pending or running job may hold a
    /// given dedup key.
    fn identify(&self) -> (&'static str, String) {
        (self.name(), format!("{}:{}", self.name(), self.target()))
    }

    /// `None` runs as soon as a worker is free.
    fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Overrides the dispatcher's default attempt budget.
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    /// Cheap pre-check. A non-retryable error here fails the job without
    /// consuming an attempt.
    async fn validate(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Do the work and return follow-up jobs, which are enqueued in the same
    /// transaction that marks this job succeeded.
    async fn execute(&self, ctx: &JobContext) -> Result<Vec<Box<dyn Job>>>;
}

type JobBuilder = Box<dyn Fn(&JobRecord) -> Result<Box<dyn Job>> + Send + Sync>;

/// Maps job names to constructors for claimed records.
#[derive(Default)]
pub struct JobRegistry {
    builders: HashMap<&'static str, JobBuilder>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in job type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PinlUpdated::NAME, |record| {
            Ok(Box::new(PinlUpdated::from_record(record)?) as Box<dyn Job>)
        });
        registry.register(MonlCrawler::NAME, |record| {
            Ok(Box::new(MonlCrawler::from_record(record)?) as Box<dyn Job>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &'static str, builder: F)
    where
        F: Fn(&JobRecord) -> Result<Box<dyn Job>> + Send + Sync + 'static,
    {
        self.builders.insert(name, Box::new(builder));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Rebuild the job a record describes.
    pub fn build(&self, record: &JobRecord) -> Result<Box<dyn Job>> {
        let builder = self
            .builders
            .get(record.name.as_str())
            .ok_or_else(|| Error::invalid_input(format!("unknown job type: {}", record.name)))?;
        builder(record)
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("JobRegistry").field("jobs", &names).finish()
    }
}
