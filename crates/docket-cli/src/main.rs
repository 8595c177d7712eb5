mod display;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use docket_ai::PolicyEngine;
use docket_cache::TieredCache;
use docket_core::{CacheConfig, OfflineProvider, PolicyConfig, Provider, SyncConfig};
use docket_store::{DuckStore, MokaCache};
use docket_sync::{HttpProvider, SyncScheduler, eligibility, run_proactive_pass};

#[derive(Parser)]
#[command(name = "docket", version)]
#[command(about = "Self-tuning tiered cache for legal-process status data")]
struct Cli {
    /// DuckDB database file
    #[arg(long, env = "DOCKET_DB", default_value = "docket.duckdb")]
    db: PathBuf,

    /// Provider base URL. Without it only cached data is served.
    #[arg(long, env = "DOCKET_PROVIDER_URL")]
    provider_url: Option<String>,

    /// Bearer token for the provider
    #[arg(long, env = "DOCKET_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Provider request timeout in seconds
    #[arg(long, env = "DOCKET_PROVIDER_TIMEOUT_SECS", default_value = "30")]
    provider_timeout: u64,

    /// Print JSON instead of cards
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Movements for a process, newest first
    Movements {
        cnj: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Bypass both cache tiers
        #[arg(long)]
        force: bool,
    },
    /// Aggregated status for a process
    Status {
        cnj: String,
        #[arg(long)]
        force: bool,
    },
    /// Expire the cached status of a process
    Invalidate { cnj: String },
    /// Run one sync cycle
    Sync,
    /// Run the optimization pass
    Optimize,
    /// Run the proactive caching pass
    Proactive,
    /// Train the predictive models
    Train {
        /// Retrain even if the models are still fresh
        #[arg(long)]
        force: bool,
    },
    /// Show schema version and table row counts
    MigrationStatus,
    /// Show training readiness and sync candidate counts
    Eligibility,
    /// Run the sync and optimization loops until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let store = Arc::new(
        DuckStore::open_persistent(&cli.db)
            .with_context(|| format!("opening {}", cli.db.display()))?,
    );

    if matches!(cli.command, Command::MigrationStatus) {
        let status = store.migration_status()?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            display::print_migration_status(&status);
        }
        return Ok(());
    }

    let engine = Arc::new(PolicyEngine::new(PolicyConfig::from_env()));
    match engine.load(store.as_ref()) {
        Ok(true) => info!(trained_at = ?engine.trained_at(), "loaded predictive models"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "failed to load predictive models; using rule-based policy"),
    }

    let provider: Arc<dyn Provider> = match &cli.provider_url {
        Some(url) => Arc::new(HttpProvider::new(
            url,
            cli.api_key.clone(),
            Duration::from_secs(cli.provider_timeout),
        )?),
        None => {
            warn!("no provider URL configured; serving cached data only");
            Arc::new(OfflineProvider)
        }
    };

    let cache_config = CacheConfig::from_env();
    let fast = Arc::new(MokaCache::new(cache_config.fast_capacity));
    let cache = Arc::new(TieredCache::new(
        Arc::clone(&store),
        fast,
        provider,
        Arc::clone(&engine),
        cache_config,
    ));
    let scheduler = Arc::new(SyncScheduler::new(Arc::clone(&cache), SyncConfig::from_env()));

    match cli.command {
        Command::Movements { cnj, limit, force } => {
            let limit = limit.unwrap_or(cache.config().default_movement_limit);
            let lookup = cache.get_movements(&cnj, limit, force).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&lookup)?);
            } else {
                display::print_movements(&cnj, &lookup);
            }
        }
        Command::Status { cnj, force } => {
            let lookup = cache.get_status(&cnj, force).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&lookup)?);
            } else {
                display::print_status(&lookup);
            }
        }
        Command::Invalidate { cnj } => {
            if cache.invalidate(&cnj).await? {
                println!("invalidated {cnj}");
            } else {
                println!("{cnj} had no cached status");
            }
        }
        Command::Sync => {
            let (_tx, rx) = watch::channel(false);
            let report = scheduler.run_cycle(&rx).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_cycle(&report);
            }
        }
        Command::Optimize => {
            let report = docket_sync::run_optimization_pass(&cache, Utc::now()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_optimization(&report);
            }
        }
        Command::Proactive => {
            let report = run_proactive_pass(&cache, scheduler.config(), Utc::now()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_proactive(&report);
            }
        }
        Command::Train { force } => {
            let report = scheduler.train(force).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Eligibility => {
            let config = scheduler.config().clone();
            let engine = Arc::clone(&engine);
            let stats = store
                .blocking(move |s| Ok(eligibility(s, &engine, &config, Utc::now())))
                .await??;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                display::print_eligibility(&stats);
            }
        }
        Command::Serve => serve(scheduler).await?,
        Command::MigrationStatus => {}
    }
    Ok(())
}

/// Run both background loops until Ctrl-C.
async fn serve(scheduler: Arc<SyncScheduler>) -> anyhow::Result<()> {
    let (tx, rx) = watch::channel(false);
    let sync = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let rx = rx.clone();
        async move { scheduler.run_sync_loop(rx).await }
    });
    let maintenance = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run_optimization_loop(rx).await }
    });

    info!("docket v{} serving", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    tx.send(true).context("signalling shutdown")?;

    let (sync, maintenance) = tokio::join!(sync, maintenance);
    sync.context("sync loop panicked")?;
    maintenance.context("optimization loop panicked")?;
    Ok(())
}
