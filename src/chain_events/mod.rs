// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Confirmation-depth, reorg-aware chain notifications.
//!
//! A subscription waits for a condition to hold on a canonical tipset (its
//! *trigger*), then for `confidence` more epochs, and fires its apply handler
//! exactly once. If the trigger is later reverted, the revert handler fires
//! exactly once and the subscription is retired. Subscriptions whose trigger
//! is buried deeper than finality are dropped.


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::HashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chain::{ChainGateway, HeadChange, TipsetRef, TipsetToken};
use crate::metrics;
use crate::shim::{address::Address, clock::ChainEpoch};

pub type ApplyHandler =
    Box<dyn FnOnce(TipsetToken, ChainEpoch) -> BoxFuture<'static, anyhow::Result<()>> + Send>;
pub type RevertHandler =
    Box<dyn FnOnce(TipsetToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCondition {
    /// Holds on the first canonical tipset at or above the height.
    HeightReached(ChainEpoch),
    /// Holds on the first tipset at which the actor state differs from `snapshot`.
    StateChanged { actor: Address, snapshot: Vec<u8> },
}

struct Subscription {
    condition: EventCondition,
    confidence: ChainEpoch,
    trigger: Option<TipsetRef>,
    /// `None` once applied.
    on_apply: Option<ApplyHandler>,
    on_revert: Option<RevertHandler>,
}

impl Subscription {
    fn applied(&self) -> bool {
        self.on_apply.is_none()
    }
}

#[derive(Default)]
struct Inner {
    head: Option<TipsetRef>,
    /// Canonical tipsets within finality of the head.
    canonical: BTreeMap<ChainEpoch, TipsetRef>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_id: u64,
}

enum Fire {
    Apply(SubscriptionId, ApplyHandler, TipsetRef),
    Revert(SubscriptionId, RevertHandler, TipsetToken),
}

pub struct ChainEvents {
    gateway: Arc<dyn ChainGateway>,
    finality: ChainEpoch,
    inner: Mutex<Inner>,
}

impl ChainEvents {
    pub fn new(gateway: Arc<dyn ChainGateway>, finality: ChainEpoch) -> Self {
        Self {
            gateway,
            finality,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers a wait. If the condition already holds deep enough on the
    /// known chain, `on_apply` runs before this returns.
    pub async fn wait_for(
        &self,
        condition: EventCondition,
        confidence: ChainEpoch,
        on_apply: ApplyHandler,
        on_revert: RevertHandler,
    ) -> SubscriptionId {
        let (id, head) = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = SubscriptionId(inner.next_id);
            inner.subscriptions.insert(
                id,
                Subscription {
                    condition,
                    confidence,
                    trigger: None,
                    on_apply: Some(on_apply),
                    on_revert: Some(on_revert),
                },
            );
            (id, inner.head.clone())
        };
        debug!(%id, "registered chain event subscription");
        if let Some(head) = head {
            self.evaluate(&head).await;
        }
        id
    }

    /// Shorthand for [`EventCondition::HeightReached`].
    pub async fn chain_at(
        &self,
        height: ChainEpoch,
        confidence: ChainEpoch,
        on_apply: ApplyHandler,
        on_revert: RevertHandler,
    ) -> SubscriptionId {
        self.wait_for(
            EventCondition::HeightReached(height),
            confidence,
            on_apply,
            on_revert,
        )
        .await
    }

    /// Drops a subscription without calling any of its handlers.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        self.inner.lock().subscriptions.remove(&id).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    pub fn head(&self) -> Option<TipsetRef> {
        self.inner.lock().head.clone()
    }

    pub async fn handle_head_change(&self, change: HeadChange) {
        match change {
            HeadChange::Revert(ts) => {
                let fires = {
                    let mut inner = self.inner.lock();
                    if inner.canonical.get(&ts.height) == Some(&ts) {
                        inner.canonical.remove(&ts.height);
                    }
                    inner.head = inner.canonical.values().next_back().cloned();
                    revert_locked(&mut inner, &ts)
                };
                self.fire(fires).await;
            }
            HeadChange::Apply(ts) => {
                let fires = {
                    let mut inner = self.inner.lock();
                    // anything at or above the new tipset that is not it was reorged out
                    let displaced = inner.canonical.split_off(&ts.height);
                    let mut fires = vec![];
                    for old in displaced.into_values().filter(|old| old != &ts) {
                        fires.extend(revert_locked(&mut inner, &old));
                    }
                    inner.canonical.insert(ts.height, ts.clone());
                    inner.canonical = inner.canonical.split_off(&(ts.height - self.finality));
                    inner.head = Some(ts.clone());
                    fires
                };
                metrics::CHAIN_HEAD_HEIGHT.set(ts.height);
                self.fire(fires).await;
                self.evaluate(&ts).await;
            }
        }
    }

    /// Consumes head changes until shutdown or until the publisher goes away.
    pub async fn run(
        self: Arc<Self>,
        mut head_changes: broadcast::Receiver<HeadChange>,
        shutdown: CancellationToken,
    ) {
        loop {
            let change = tokio::select! {
                _ = shutdown.cancelled() => break,
                change = head_changes.recv() => change,
            };
            match change {
                Ok(change) => self.handle_head_change(change).await,
                Err(RecvError::Lagged(n)) => {
                    warn!("Head change subscriber lagged: skipping {n} events")
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("chain event loop stopped");
    }

    /// Resolves triggers against `candidate` (a tipset that just became
    /// canonical) and fires every subscription that is now deep enough.
    async fn evaluate(&self, candidate: &TipsetRef) {
        let state_checks: Vec<_> = {
            let inner = self.inner.lock();
            inner
                .subscriptions
                .iter()
                .filter(|(_, sub)| sub.trigger.is_none() && !sub.applied())
                .filter_map(|(id, sub)| match &sub.condition {
                    EventCondition::StateChanged { actor, snapshot } => {
                        Some((*id, *actor, snapshot.clone()))
                    }
                    EventCondition::HeightReached(_) => None,
                })
                .collect()
        };
        let mut changed = vec![];
        for (id, actor, snapshot) in state_checks {
            match self
                .gateway
                .read_actor_state(&actor, &candidate.token)
                .await
            {
                Ok(state) if state != snapshot => changed.push(id),
                Ok(_) => {}
                Err(e) => warn!(%id, %actor, "failed to read actor state: {e}"),
            }
        }

        let fires = {
            let mut inner = self.inner.lock();
            let Some(head) = inner.head.clone() else {
                return;
            };
            let candidate_canonical = inner.canonical.get(&candidate.height) == Some(candidate);
            let Inner {
                canonical,
                subscriptions,
                ..
            } = &mut *inner;
            let mut fires = vec![];
            for (id, sub) in subscriptions.iter_mut() {
                if sub.applied() {
                    continue;
                }
                if sub.trigger.is_none() {
                    sub.trigger = match &sub.condition {
                        EventCondition::HeightReached(h) => {
                            canonical.range(*h..).next().map(|(_, ts)| ts.clone())
                        }
                        EventCondition::StateChanged { .. } => {
                            (candidate_canonical && changed.contains(id))
                                .then(|| candidate.clone())
                        }
                    };
                }
                let Some(trigger) = &sub.trigger else {
                    continue;
                };
                if head.height >= trigger.height + sub.confidence {
                    if let Some(on_apply) = sub.on_apply.take() {
                        fires.push(Fire::Apply(*id, on_apply, trigger.clone()));
                    }
                }
            }
            let finality = self.finality;
            subscriptions.retain(|_, sub| match (&sub.trigger, sub.applied()) {
                (Some(trigger), true) => head.height <= trigger.height + finality,
                _ => true,
            });
            fires
        };
        self.fire(fires).await;
    }

    async fn fire(&self, fires: Vec<Fire>) {
        for fire in fires {
            match fire {
                Fire::Apply(id, handler, ts) => {
                    debug!(%id, height = ts.height, "chain event applied");
                    if let Err(e) = handler(ts.token, ts.height).await {
                        error!(%id, height = ts.height, "chain event apply handler failed: {e:#}");
                    }
                }
                Fire::Revert(id, handler, token) => {
                    debug!(%id, "chain event reverted");
                    if let Err(e) = handler(token).await {
                        error!(%id, "chain event revert handler failed: {e:#}");
                    }
                }
            }
        }
    }
}

/// Detaches subscriptions from a reverted trigger. Applied ones are retired
/// and their revert handler is returned for firing.
fn revert_locked(inner: &mut Inner, reverted: &TipsetRef) -> Vec<Fire> {
    let mut fires = vec![];
    let mut retired = vec![];
    for (id, sub) in inner.subscriptions.iter_mut() {
        if sub.trigger.as_ref() != Some(reverted) {
            continue;
        }
        if sub.applied() {
            if let Some(on_revert) = sub.on_revert.take() {
                fires.push(Fire::Revert(*id, on_revert, reverted.token.clone()));
            }
            retired.push(*id);
        } else {
            sub.trigger = None;
        }
    }
    for id in retired {
        inner.subscriptions.remove(&id);
    }
    fires
}
