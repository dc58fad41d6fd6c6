// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SealingContext, SectorEvent, SectorInfo};
use crate::chain_events::SubscriptionId;
use crate::metrics::{self, StateLabel};
use crate::sector_store::StoreError;
use crate::shim::sector::{SectorId, SectorNumber};

/// Outcome of a state handler.
pub(super) enum Step {
    /// Apply this event now.
    Next(SectorEvent),
    /// Transient failure; run the same handler again after the API retry delay.
    Retry(anyhow::Error),
    /// Nothing to do until an event arrives on the task's channel.
    Wait,
    /// Apply `event` after `delay`, unless another event arrives first.
    Delay(Duration, SectorEvent),
}

pub(super) struct SectorTask {
    pub(super) number: SectorNumber,
    pub(super) ctx: Arc<SealingContext>,
    /// Handed to chain event callbacks.
    pub(super) sender: flume::Sender<SectorEvent>,
    receiver: flume::Receiver<SectorEvent>,
    shutdown: CancellationToken,
    pub(super) seed_subscription: Option<SubscriptionId>,
}

impl SectorTask {
    pub(super) fn new(
        number: SectorNumber,
        ctx: Arc<SealingContext>,
        sender: flume::Sender<SectorEvent>,
        receiver: flume::Receiver<SectorEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            number,
            ctx,
            sender,
            receiver,
            shutdown,
            seed_subscription: None,
        }
    }

    pub(super) fn sector_id(&self) -> SectorId {
        SectorId {
            miner: self.ctx.miner_id,
            number: self.number,
        }
    }

    pub(super) async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        loop {
            let info = match self.ctx.store.get(self.number) {
                Ok(Some(info)) => info,
                Ok(None) => {
                    error!("sector record disappeared from the store");
                    break;
                }
                Err(e) => {
                    error!("failed to load sector: {e}");
                    break;
                }
            };
            let step = tokio::select! {
                _ = shutdown.cancelled() => break,
                step = self.plan(&info) => step,
            };
            let event = match step {
                Step::Next(event) => Some(event),
                Step::Retry(err) => {
                    warn!(state = %info.state, "retrying after transient error: {err:#}");
                    self.next_event(Some(self.ctx.config.api_retry_delay))
                        .await
                        .and_then(Wake::into_event)
                }
                Step::Wait => {
                    debug!(state = %info.state, "waiting for events");
                    self.next_event(None).await.and_then(Wake::into_event)
                }
                Step::Delay(delay, event) => match self.next_event(Some(delay)).await {
                    Some(Wake::Timer) => Some(event),
                    Some(Wake::Event(incoming)) => Some(incoming),
                    None => None,
                },
            };
            // no event: either shutting down or a retry timer fired
            let Some(event) = event else {
                if self.shutdown.is_cancelled() {
                    break;
                }
                continue;
            };
            if let Err(e) = self.apply(event) {
                error!("failed to persist sector event: {e}");
                break;
            }
        }
        if let Some(id) = self.seed_subscription.take() {
            self.ctx.events.cancel(id);
        }
        debug!("sector task stopped");
    }

    /// Waits for an incoming event, the optional timer, or shutdown.
    async fn next_event(&self, timer: Option<Duration>) -> Option<Wake> {
        let timer = async {
            match timer {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            _ = timer => Some(Wake::Timer),
            event = self.receiver.recv_async() => event.ok().map(Wake::Event),
        }
    }

    /// Pulls a queued seed revert off the channel. Other queued events stay, in order.
    pub(super) fn take_seed_revert(&self) -> bool {
        let mut reverted = false;
        for event in self.receiver.drain() {
            if matches!(event, SectorEvent::SeedReverted) {
                reverted = true;
            } else {
                // the task holds the receiver, so the channel is open
                let _ = self.sender.send(event);
            }
        }
        reverted
    }

    /// Persists `event`. Events the current state does not accept are dropped.
    pub(super) fn apply(&mut self, event: SectorEvent) -> Result<(), StoreError> {
        let kind = event.kind();
        let mut from = None;
        let res = self.ctx.store.update(self.number, &mut |info: &mut SectorInfo| {
            from = Some(info.state);
            Ok(info.apply(event.clone())?)
        });
        match res {
            Ok(info) => {
                if kind == "SeedReverted" {
                    // retired by the scheduler when it fired
                    self.seed_subscription = None;
                }
                if let Some(from) = from.filter(|from| *from != info.state) {
                    info!(%from, to = %info.state, event = kind, "sector state changed");
                }
                let label = StateLabel::new(info.state.into());
                metrics::SECTOR_TRANSITIONS.get_or_create(&label).inc();
                if info.state.is_failure() {
                    metrics::SECTOR_FAILURES.get_or_create(&label).inc();
                    warn!(
                        state = %info.state,
                        exit_code = ?info.last_exit_code,
                        "sector failed: {}",
                        info.last_error.as_deref().unwrap_or_default()
                    );
                }
                Ok(())
            }
            Err(StoreError::Rejected(e)) => {
                warn!(event = kind, "ignoring sector event: {e:#}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Why [`SectorTask::next_event`] returned.
enum Wake {
    Timer,
    Event(SectorEvent),
}

impl Wake {
    fn into_event(self) -> Option<SectorEvent> {
        match self {
            Wake::Timer => None,
            Wake::Event(event) => Some(event),
        }
    }
}
