//! Composition root for the power-balancing control plane.
//!
//! Wires the store, drivers, reading source, discovery loop, and balance
//! loop, then runs both loops concurrently until `Ctrl+C` (section 10.5).

mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pb_01_store::{BalanceStore, SledEngine, Store, SystemClock};
use pb_02_drivers::{StockDriver, VNishDriver};
use pb_03_reading_source::HttpReadingSource;
use pb_04_discovery::{DiscoveryRuntimeConfig, DiscoveryService};
use pb_08_balancer::{Balancer, BalancerRuntimeConfig};
use pb_shared_types::MinerDriver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init(cli.json_logs);

    let config = cli.load_config().context("loading configuration")?;
    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invariant violated, refusing to start");
        anyhow::bail!(e);
    }

    info!(
        cidrs = ?config.cidrs,
        poll_interval = ?config.poll_interval,
        discovery_interval = ?config.discovery_interval,
        "starting balancer-node"
    );

    let engine = Arc::new(
        SledEngine::open(&config.store_path)
            .with_context(|| format!("opening store at {}", config.store_path))?,
    );
    let store: Arc<dyn BalanceStore> = Arc::new(Store::new(engine, Arc::new(SystemClock)));

    let reading_source = Arc::new(
        HttpReadingSource::new(config.reading_source_url.clone(), config.driver_timeout)
            .context("building reading source")?,
    );

    // Drivers double as discovery's ordered-fallback probe list and as the
    // single driver the balance loop issues `SetPreset` through. Only the
    // VNish driver's preset calls are ever invoked by the balancer, since
    // `GetManageableMiners` already excludes stock-firmware miners.
    let vnish = Arc::new(
        VNishDriver::new(config.vnish_password.clone(), config.driver_timeout)
            .context("building vnish driver")?,
    );
    let stock = Arc::new(
        StockDriver::new(
            config.stock_username.clone(),
            config.stock_password.clone(),
            config.driver_timeout,
        )
        .context("building stock driver")?,
    );
    let drivers: Vec<Arc<dyn MinerDriver>> = vec![vnish.clone(), stock];

    let cancel = CancellationToken::new();

    let discovery = DiscoveryService::new(
        store.clone(),
        drivers,
        DiscoveryRuntimeConfig::from(&config),
    );
    let discovery_cancel = cancel.clone();
    let discovery_task = tokio::spawn(async move {
        discovery.run(discovery_cancel).await;
    });

    let mut balancer = Balancer::new(
        store,
        reading_source,
        vnish,
        BalancerRuntimeConfig::from(&config),
    );
    let balance_cancel = cancel.clone();
    let poll_interval = config.poll_interval;
    let balance_task = tokio::spawn(async move {
        loop {
            if balance_cancel.is_cancelled() {
                return;
            }
            balancer.tick(&balance_cancel).await;
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = balance_cancel.cancelled() => return,
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received, cancelling both loops");
    cancel.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
        tokio::join!(discovery_task, balance_task)
    })
    .await
    {
        Ok((discovery_result, balance_result)) => {
            if let Err(e) = discovery_result {
                warn!(error = %e, "discovery loop task panicked");
            }
            if let Err(e) = balance_result {
                warn!(error = %e, "balance loop task panicked");
            }
        }
        Err(_) => {
            warn!("shutdown grace period elapsed before both loops stopped");
        }
    }

    info!("balancer-node stopped");
    Ok(())
}
