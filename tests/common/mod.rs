//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires a database, an [`EventBus`], a
//! provider registry, and a [`Dispatcher`] configured for fast tests (no
//! retry delay, short poll interval). Scripted jobs let tests decide how
//! each execution behaves.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use pinmonl::events::EventBus;
use pinmonl::monler::ProviderRegistry;
use pinmonl::queue::{
    Backoff, Dispatcher, DispatcherConfig, Job, JobContext, JobRegistry, SqliteStore,
    TargetResolver,
};
use pinmonl_common::{Error, JobState, Result, Target, TargetKind};
use pinmonl_db::models::JobRecord;
use pinmonl_db::pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
use tokio_util::sync::CancellationToken;

pub const MAX_ATTEMPTS: u32 = 3;

pub fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        workers: 2,
        max_attempts: MAX_ATTEMPTS,
        poll_interval: Duration::from_millis(10),
        backoff: Backoff::new(Duration::ZERO, Duration::ZERO),
    }
}

/// Test harness wrapping a fully-constructed [`Dispatcher`].
pub struct TestHarness {
    pub db: DbPool,
    pub events: Arc<EventBus>,
    pub dispatcher: Arc<Dispatcher>,
    _dir: Option<TempDir>,
}

impl TestHarness {
    /// In-memory database, built-in jobs, no providers.
    pub fn new() -> Self {
        Self::with(JobRegistry::with_defaults(), ProviderRegistry::new())
    }

    pub fn with(jobs: JobRegistry, providers: ProviderRegistry) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        Self::build(db, None, jobs, providers, |store| store as Arc<dyn TargetResolver>)
    }

    /// In-memory database and built-in jobs, with the resolver wrapped by
    /// `wrap` so tests can inject failures.
    pub fn with_resolver<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<SqliteStore>) -> Arc<dyn TargetResolver>,
    {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        Self::build(db, None, JobRegistry::with_defaults(), ProviderRegistry::new(), wrap)
    }

    /// File-backed database, for tests where several connections write
    /// concurrently.
    pub fn file_backed(jobs: JobRegistry) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("pinmonl.db");
        let db = init_pool(&path.to_string_lossy()).expect("failed to create file pool");
        Self::build(db, Some(dir), jobs, ProviderRegistry::new(), |store| store as Arc<dyn TargetResolver>)
    }

    fn build<F>(
        db: DbPool,
        dir: Option<TempDir>,
        jobs: JobRegistry,
        providers: ProviderRegistry,
        wrap: F,
    ) -> Self
    where
        F: FnOnce(Arc<SqliteStore>) -> Arc<dyn TargetResolver>,
    {
        let store = Arc::new(SqliteStore::new(db.clone()));
        let ctx = JobContext::new(wrap(store.clone()), store, Arc::new(providers));
        let events = Arc::new(EventBus::default());
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            jobs,
            ctx,
            events.clone(),
            test_config(),
        ));

        Self {
            db,
            events,
            dispatcher,
            _dir: dir,
        }
    }

    /// Get a database connection from the pool.
    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get db connection")
    }

    /// Run due jobs until the queue has nothing left to claim.
    pub async fn drain(&self) -> Vec<JobRecord> {
        let cancel = CancellationToken::new();
        let mut processed = Vec::new();
        while let Some(record) = self
            .dispatcher
            .process_next("test-worker", &cancel)
            .await
            .expect("process_next failed")
        {
            processed.push(record);
        }
        processed
    }

    pub fn job(&self, id: pinmonl_common::JobId) -> JobRecord {
        pinmonl_db::queries::jobs::get_job(&self.conn(), id)
            .expect("get_job failed")
            .expect("job not found")
    }

    pub fn count(&self, state: JobState) -> i64 {
        pinmonl_db::queries::jobs::count_by_state(&self.conn(), state).expect("count failed")
    }
}

// ---------------------------------------------------------------------------
// Scripted jobs
// ---------------------------------------------------------------------------

/// Controls how every [`ScriptedJob`] sharing it behaves.
#[derive(Debug, Default)]
pub struct Script {
    /// Executions numbered `1..=fail_first` return a transient error.
    pub fail_first: u32,
    /// Execution number that panics instead of running.
    pub panic_on: Option<u32>,
    /// Every execution returns a terminal error.
    pub terminal: bool,
    /// `validate` returns `NotFound`.
    pub invalid: bool,
    /// `execute` never finishes on its own.
    pub hang: bool,
    pub executions: AtomicU32,
    pub validations: AtomicU32,
}

impl Script {
    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> u32 {
        self.validations.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedJob {
    pub key: String,
    pub script: Arc<Script>,
}

impl ScriptedJob {
    pub const NAME: &'static str = "scripted";

    pub fn new(key: &str, script: Arc<Script>) -> Self {
        Self {
            key: key.to_string(),
            script,
        }
    }

    /// Job registry that knows the built-in jobs and scripted jobs.
    pub fn registry(script: Arc<Script>) -> JobRegistry {
        let mut registry = JobRegistry::with_defaults();
        registry.register(Self::NAME, move |record| {
            Ok(Box::new(ScriptedJob::new(&record.target.id, script.clone())) as Box<dyn Job>)
        });
        registry
    }
}

#[async_trait]
impl Job for ScriptedJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn target(&self) -> Target {
        Target::new(TargetKind::Monl, &self.key)
    }

    async fn validate(&self, _ctx: &JobContext) -> Result<()> {
        self.script.validations.fetch_add(1, Ordering::SeqCst);
        if self.script.invalid {
            return Err(Error::not_found(format!("target {}", self.key)));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<Vec<Box<dyn Job>>> {
        let n = self.script.executions.fetch_add(1, Ordering::SeqCst) + 1;

        if self.script.hang {
            futures::future::pending::<()>().await;
        }
        if self.script.panic_on == Some(n) {
            panic!("scripted panic on execution {n}");
        }
        if self.script.terminal {
            return Err(Error::malformed("scripted terminal failure"));
        }
        if n <= self.script.fail_first {
            return Err(Error::transport(format!("scripted failure {n}")));
        }
        Ok(Vec::new())
    }
}
