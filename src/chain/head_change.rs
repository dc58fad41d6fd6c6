// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChainGateway, GatewayResult, HeadChange, TipsetRef};
use crate::utils::{RetryArgs, retry};

const SINK_CAP: usize = 200;

/// Turns head polling into an ordered stream of [`HeadChange`]s.
///
/// The first event published is an `Apply` of the head observed at startup.
pub struct HeadChangeFeed {
    gateway: Arc<dyn ChainGateway>,
    publisher: broadcast::Sender<HeadChange>,
    poll_interval: Duration,
}

impl HeadChangeFeed {
    pub fn new(gateway: Arc<dyn ChainGateway>, poll_interval: Duration) -> Self {
        let (publisher, _) = broadcast::channel(SINK_CAP);
        Self {
            gateway,
            publisher,
            poll_interval,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeadChange> {
        self.publisher.subscribe()
    }

    fn publish(&self, change: HeadChange) {
        if self.publisher.send(change).is_err() {
            debug!("did not publish head change, no active receivers");
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let args = RetryArgs {
            max_attempts: 10,
            delay: self.poll_interval,
        };
        let mut current = retry(args, || self.gateway.chain_head())
            .await
            .context("failed to fetch the initial chain head")?;
        debug!(height = current.height, "head change feed started");
        self.publish(HeadChange::Apply(current.clone()));

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            match self.poll(&current).await {
                Ok(Some(head)) => current = head,
                Ok(None) => {}
                Err(e) => warn!("failed to poll chain head: {e}"),
            }
        }
    }

    /// Publishes the path to the new head, if the head moved.
    async fn poll(&self, current: &TipsetRef) -> GatewayResult<Option<TipsetRef>> {
        let head = self.gateway.chain_head().await?;
        if head.token == current.token {
            return Ok(None);
        }
        let path = self
            .gateway
            .chain_get_path(&current.token, &head.token)
            .await?;
        for change in path {
            self.publish(change);
        }
        Ok(Some(head))
    }
}
