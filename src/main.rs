mod cli;

use pinmonl::{
    config::{self, Config},
    events::{self, EventBus, Notifier},
    monler::{self, ProviderRegistry},
    queue::{self, Dispatcher, DispatcherConfig, JobContext, JobRegistry, PinlUpdated, SqliteStore},
};
use pinmonl_db::pool::{get_conn, init_pool, DbPool};
use pinmonl_db::queries::{jobs, pinls};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use pinmonl_common::JobState;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn open_db(config: &Config) -> Result<DbPool> {
    let path = shellexpand::tilde(&config.database.path.to_string_lossy()).into_owned();
    tracing::debug!("Opening database at {}", path);
    init_pool(&path).with_context(|| format!("Failed to open database: {path}"))
}

fn build_dispatcher(
    config: &Config,
    db: DbPool,
    providers: Arc<ProviderRegistry>,
    notifier: Arc<dyn Notifier>,
) -> Dispatcher {
    let store = Arc::new(SqliteStore::new(db.clone()));
    let ctx = JobContext::new(store.clone(), store, providers);

    Dispatcher::new(
        db,
        JobRegistry::with_defaults(),
        ctx,
        notifier,
        DispatcherConfig::from(&config.queue),
    )
}

async fn start(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    config::validate_config(&config)?;

    tracing::info!("Starting pinmonl");
    let db = open_db(&config)?;
    let providers = Arc::new(monler::build_registry(&config.github));
    if providers.is_empty() {
        tracing::warn!("No providers registered; crawls will store no reports");
    }

    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let event_log = tokio::spawn(events::log_events(bus.subscribe(), cancel.clone()));

    let dispatcher = Arc::new(build_dispatcher(&config, db, providers, bus));
    dispatcher.reset_orphaned()?;

    let workers = tokio::spawn(Arc::clone(&dispatcher).run(cancel.clone()));
    let refresh = config.queue.refresh_interval().map(|interval| {
        tokio::spawn(queue::refresh::run_refresh(
            Arc::clone(&dispatcher),
            interval,
            cancel.clone(),
        ))
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = workers.await {
        tracing::error!("Dispatcher task failed: {}", e);
    }
    if let Some(handle) = refresh {
        let _ = handle.await;
    }
    let _ = event_log.await;

    Ok(())
}

fn add(url: &str, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let canonical = monler::normalize_url(url)?;
    let db = open_db(&config)?;

    let pinl = {
        let conn = get_conn(&db)?;
        pinls::create_pinl(&conn, &canonical)?
    };

    let dispatcher = build_dispatcher(
        &config,
        db,
        Arc::new(ProviderRegistry::new()),
        Arc::new(EventBus::default()),
    );
    let enqueued = dispatcher.enqueue(&PinlUpdated::new(pinl.id))?;

    println!("pinl {} ({})", pinl.id, canonical);
    println!("job  {}", enqueued.id);
    Ok(())
}

async fn guess(url: &str, without: &[String], config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = monler::build_registry(&config.github);

    let excluded: Vec<&str> = without.iter().map(String::as_str).collect();
    let handles = registry.guess_without(&excluded, url).await?;

    if handles.is_empty() {
        eprintln!("No provider matched {}", url);
    }
    println!("{}", serde_json::to_string_pretty(&handles)?);
    Ok(())
}

fn list_jobs(state: Option<JobState>, limit: i64, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let db = open_db(&config)?;
    let conn = get_conn(&db)?;

    let records = jobs::list_jobs(&conn, state, limit)?;
    if records.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    for job in records {
        println!(
            "{}  {:<9} {:<13} {}  attempts {}/{}  run_at {}",
            job.id,
            job.state.as_str(),
            job.name,
            job.target,
            job.attempts,
            job.max_attempts,
            job.run_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(err) = job.last_error {
            println!("    last error: {}", err);
        }
    }
    Ok(())
}

fn list_providers(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = monler::build_registry(&config.github);

    if registry.is_empty() {
        println!("No providers registered");
    }
    for name in registry.providers() {
        println!("{}", name);
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::load_config_or_default(None)?;
            config::validate_config(&config)?;
            print_summary(&config);
        }
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Database: {}", config.database.path.display());
    println!("  Workers: {}", config.queue.workers);
    println!("  Max attempts: {}", config.queue.max_attempts);
    match config.queue.refresh_interval() {
        Some(interval) => println!("  Refresh every: {}s", interval.as_secs()),
        None => println!("  Refresh: disabled"),
    }
    println!("  GitHub enabled: {}", config.github.enabled);
    println!("  GitHub tokens: {}", config.github.tokens.len());
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "pinmonl=trace,pinmonl_db=debug,pinmonl_common=debug".to_string()
        } else {
            "pinmonl=info,pinmonl_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Start => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(config_path))
        }
        Commands::Add { url } => add(&url, config_path),
        Commands::Guess { url, without } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(guess(&url, &without, config_path))
        }
        Commands::Jobs { state, limit } => list_jobs(state, limit, config_path),
        Commands::Providers => list_providers(config_path),
        Commands::Validate { config } => {
            let path = config.or_else(|| cli.config.clone());
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("pinmonl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
