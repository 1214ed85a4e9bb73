mod catalog;
mod config;
mod database;
mod monitoring;
mod pool;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use crate::database::{Store, StoreImpl};
use crate::monitoring::{CheckScheduler, HttpProber, SchedulerConfig, StatusAggregator};
use crate::pool::{LibsqlManager, LibsqlPool};

#[derive(Parser, Debug)]
#[command(name = "chainwatch-service", version, about = "Availability and chain-height watcher for blockchain RPC/REST endpoints")]
struct Cli {
    /// Path to the TOML config (defaults to $XDG_CONFIG_HOME/chainwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single check cycle and exit
    #[arg(long)]
    once: bool,

    /// Synchronize the endpoint catalog from config and exit
    #[arg(long)]
    sync_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();

    let mut cfg =
        config::Config::from_config(cli.config.as_ref()).context("loading configuration")?;
    cfg.worker.apply_env_overrides();
    info!("{cfg}");

    let db = libsql::Builder::new_local(&cfg.worker.database_url)
        .build()
        .await
        .with_context(|| format!("opening database at {}", cfg.worker.database_url))?;
    let pool: LibsqlPool = deadpool::managed::Pool::builder(LibsqlManager::new(db))
        .config(deadpool::managed::PoolConfig::default())
        .build()
        .context("building connection pool")?;

    {
        let conn = pool.get().await?;
        database::initialize_database(&conn).await?;
    }

    let store: Arc<dyn Store> = Arc::new(StoreImpl::new_from_pool(pool));

    let report = catalog::sync_from_config(store.as_ref(), &cfg.projects).await?;
    info!(
        "catalog sync done: {} created, {} updated, {} disabled, {} skipped",
        report.created, report.updated, report.disabled, report.skipped,
    );
    if cli.sync_only {
        return Ok(());
    }

    let prober = Arc::new(
        HttpProber::new(Duration::from_secs_f64(cfg.worker.request_timeout))
            .context("building http prober")?,
    );
    let aggregator = Arc::new(StatusAggregator::new(
        store.clone(),
        cfg.worker.stale_after_seconds,
        cfg.worker.max_height_lag,
    ));
    let scheduler = CheckScheduler::new(
        store,
        prober,
        aggregator,
        SchedulerConfig {
            check_interval: Duration::from_secs(cfg.worker.check_interval_seconds),
            batch_limit: cfg.worker.batch_limit,
            request_timeout: Duration::from_secs_f64(cfg.worker.request_timeout),
            max_concurrent_checks: cfg.worker.max_concurrent_checks,
            persist_retries: 3,
        },
    );

    if cli.once {
        let report = scheduler.run_cycle(Utc::now()).await?;
        info!(
            "check cycle done: {} selected, {} up, {} down, {} persist failures, {}ms",
            report.selected, report.succeeded, report.failed, report.persist_failures, report.elapsed_ms,
        );
        return Ok(());
    }

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping worker");
        }
    }

    Ok(())
}
