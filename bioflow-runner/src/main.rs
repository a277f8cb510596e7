//! Bioflow Runner binary
//!
//! Loads configuration, opens the partition registry and materialization
//! ledger, and runs the sensor loop until interrupted.

use anyhow::{Context, Result};
use bioflow_runner::config::Config;
use bioflow_runner::pipeline::{AssetPipeline, PipelineSettings};
use bioflow_runner::podman::{self, ContainerExecutor, PodmanExecutor};
use bioflow_runner::scheduler::PartitionScheduler;
use bioflow_runner::sensor::DiscoveryPoller;
use bioflow_store::{
    InMemoryLedger, InMemoryPartitionRegistry, MaterializationLedger, PartitionRegistry,
    SqliteLedger, SqlitePartitionRegistry, db,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bioflow_runner=info,bioflow_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Bioflow Runner");

    let config = Config::load()?;
    info!(
        "Loaded configuration: data_root={}, dimension={}, image={}",
        config.data_root.display(),
        config.partition_dimension,
        config.transform_image
    );

    let (program, _) = config.engine_command();
    if let Err(e) = podman::check_engine_available(&program).await {
        warn!("Container engine check failed: {:#}", e);
    }

    let (registry, ledger) = open_stores(&config).await?;
    info!("Stores initialized");

    let executor: Arc<dyn ContainerExecutor> = Arc::new(PodmanExecutor::from_config(&config));
    let pipeline = Arc::new(AssetPipeline::new(
        PipelineSettings::from(&config),
        ledger,
        executor,
    ));
    let sensor = Arc::new(DiscoveryPoller::new(
        config.source_path(),
        config.partition_dimension.clone(),
        registry,
    ));
    let scheduler = PartitionScheduler::new(
        config.poll_interval,
        config.max_parallel_partitions,
        sensor,
        pipeline,
    );

    if config.one_shot {
        let outcomes = scheduler.run_once().await?;
        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        info!(
            "One-shot run finished: {} partition(s), {} failed",
            outcomes.len(),
            failed
        );
        return Ok(());
    }

    tokio::select! {
        result = scheduler.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
            Ok(())
        }
    }
}

/// Opens the registry and ledger selected by `database_url`
async fn open_stores(
    config: &Config,
) -> Result<(Arc<dyn PartitionRegistry>, Arc<dyn MaterializationLedger>)> {
    if config.uses_in_memory_store() {
        info!("Using in-memory stores; state is lost on exit");
        return Ok((
            Arc::new(InMemoryPartitionRegistry::new()),
            Arc::new(InMemoryLedger::new()),
        ));
    }

    info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok((
        Arc::new(SqlitePartitionRegistry::new(pool.clone())),
        Arc::new(SqliteLedger::new(pool)),
    ))
}
