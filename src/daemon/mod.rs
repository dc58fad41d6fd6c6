// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod main;

use std::sync::Arc;

use anyhow::Context as _;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::{ChainGateway, HeadChangeFeed};
use crate::chain_events::ChainEvents;
use crate::cli_shared::{cli::Config, sector_db_path};
use crate::metrics;
use crate::rpc_client::LotusGateway;
use crate::sealer::mock::{MockProver, MockSealer};
use crate::sealing::Sealing;
use crate::sector_store::ParityDbSectorStore;
use crate::wdpost::WindowPostScheduler;

/// Runs the miner until Ctrl-C, then shuts every service down.
pub async fn start_interruptable(config: Config, pledge: usize) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let mut services = JoinSet::new();
    let result = tokio::select! {
        ret = start(config, pledge, &mut services, shutdown.clone()) => ret,
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
            Ok(())
        }
    };
    shutdown.cancel();
    while let Some(ret) = services.join_next().await {
        match ret {
            Ok(Err(e)) => warn!("service stopped with an error: {e:#}"),
            Err(e) if e.is_panic() => warn!("service panicked: {e}"),
            _ => {}
        }
    }
    info!("Forest miner finished shutdown");
    result
}

/// Wires the services together and waits until one of them stops.
pub async fn start(
    config: Config,
    pledge: usize,
    services: &mut JoinSet<anyhow::Result<()>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(
        network = %config.chain.network,
        miner = %config.miner.actor,
        "Starting forest miner"
    );

    if config.client.enable_metrics_endpoint {
        let listener = TcpListener::bind(config.client.metrics_address)
            .await
            .with_context(|| {
                format!(
                    "could not bind to metrics address {}",
                    config.client.metrics_address
                )
            })?;
        info!("Prometheus server started at {}", config.client.metrics_address);
        services.spawn(metrics::init_prometheus(listener));
    }

    let gateway: Arc<dyn ChainGateway> = Arc::new(
        LotusGateway::connect(&config.api)
            .await
            .context("couldn't connect to the full node")?,
    );

    let feed = HeadChangeFeed::new(gateway.clone(), config.client.head_poll_interval);
    let head_changes = feed.subscribe();
    services.spawn(feed.run(shutdown.child_token()));

    let events = Arc::new(ChainEvents::new(
        gateway.clone(),
        config.chain.policy.chain_finality,
    ));
    {
        let (events, shutdown) = (events.clone(), shutdown.child_token());
        services.spawn(async move {
            events.run(head_changes, shutdown).await;
            Ok(())
        });
    }

    let store_path = sector_db_path(&config);
    let store = Arc::new(
        ParityDbSectorStore::open(&store_path)
            .with_context(|| format!("couldn't open sector store at {}", store_path.display()))?,
    );
    let sealer = Arc::new(MockSealer::new(config.miner.seal_proof())?);
    let prover = Arc::new(MockProver::new());

    let sealing = Sealing::new(
        gateway.clone(),
        events.clone(),
        sealer,
        store,
        config.miner.clone(),
        config.chain.policy.clone(),
        config.sealing.clone(),
        shutdown.child_token(),
    )?;
    let resumed = sealing.restart()?;
    info!(resumed, "sector tasks restarted");
    for _ in 0..pledge {
        let number = sealing.pledge_sector()?;
        info!(sector = number, "pledged sector");
    }

    if config.proving.enabled {
        let scheduler = Arc::new(WindowPostScheduler::new(
            gateway,
            events,
            prover,
            config.miner.clone(),
            config.chain.policy.clone(),
            config.proving.clone(),
            shutdown.child_token(),
        )?);
        services.spawn(scheduler.run());
    } else {
        warn!("window post is disabled, the miner will be faulted on chain");
    }

    // sector tasks are owned by `sealing` and stop with the shutdown token
    match services.join_next().await {
        Some(Ok(Ok(()))) | None => {
            shutdown.cancelled().await;
            Ok(())
        }
        Some(Ok(Err(e))) => Err(e.context("service failed")),
        Some(Err(e)) => Err(anyhow::Error::new(e).context("service panicked")),
    }
}
