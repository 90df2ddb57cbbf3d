//! Keeps the balance table filled with the balances of every validator at the end of each day,
//! and of newly activated validators at their activation slot.
mod engine;
mod health;
mod planner;

pub use engine::BalanceIndexer;
pub use engine::IndexerConfig;
pub use health::IndexerHealth;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use prometheus::Registry;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
};
use tracing::{error, info, warn};

use crate::{
    balances::{BalanceStore, BalanceStorePostgres},
    beacon_chain::{BeaconNode, BeaconNodeHttp},
    db,
    env::{self, EnvConfig},
    log,
    metrics::{self, IndexerMetrics},
};

async fn wait_for_shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(err), _) | (_, Err(err)) => {
            warn!("failed to register shutdown signal handlers, running until killed: {err}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

/// Runs cycles until shutdown is requested. Failed cycles are logged and counted, the next cycle
/// starts over from a fresh plan.
pub async fn run_cycles<N, S>(
    indexer: &mut BalanceIndexer<N, S>,
    health: &IndexerHealth,
    cycle_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    N: BeaconNode + Send + Sync,
    S: BalanceStore + Send,
{
    loop {
        match indexer.run_cycle(Utc::now()).await {
            Ok(summary) => {
                info!(
                    planned = summary.planned,
                    indexed = summary.indexed,
                    deferred = summary.deferred,
                    failed = summary.failed,
                    "balance indexing cycle done"
                );
                health.set_cycle_succeeded(Utc::now());
            }
            Err(err) => {
                error!("error occurred while indexing balances: {err}");
                indexer.metrics().balance_indexing_errors.inc();
            }
        }

        if *shutdown.borrow() {
            break;
        }

        info!("sleeping for {} seconds", cycle_interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(cycle_interval) => (),
            _ = shutdown.changed() => break,
        }
    }

    info!("balance indexer stopped");
}

async fn run(config: EnvConfig) -> Result<()> {
    let db_pool = db::get_db_pool(&config.db_url, "index-balances", 3)
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!()
        .run(&db_pool)
        .await
        .context("failed to run database migrations")?;

    let registry = Registry::new();
    let metrics = IndexerMetrics::new(&registry).context("failed to register metrics")?;
    let health = Arc::new(IndexerHealth::new(Utc::now(), config.cycle_interval));

    let metrics_port = config.metrics_port;
    let server_health = health.clone();
    tokio::spawn(async move {
        if let Err(err) = metrics::serve(metrics_port, registry, server_health).await {
            error!("{err:#}");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutting down after the current slot");
        let _ = shutdown_tx.send(true);
    });

    let beacon_node = BeaconNodeHttp::new(
        &config.beacon_url,
        config.beacon_request_timeout,
        config.beacon_retry_max_elapsed,
    )?;
    let store = BalanceStorePostgres::new(db_pool);
    let mut indexer = BalanceIndexer::new(
        beacon_node,
        store,
        metrics,
        IndexerConfig::from(&config),
    )
    .with_shutdown(shutdown_rx.clone());

    info!(
        start_date = %config.start_date,
        timezones = config.timezones.len(),
        "indexing balances"
    );

    run_cycles(&mut indexer, &health, config.cycle_interval, shutdown_rx).await;

    Ok(())
}

pub async fn index_balances() -> Result<()> {
    let config = env::get_env_config()?;

    log::init(config.log_json, config.log_perf);

    run(config).await
}
