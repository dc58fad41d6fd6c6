// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Window proof-of-spacetime scheduling.
//!
//! The scheduler keeps one chain event subscription per upcoming deadline.
//! When a deadline opens (and is buried under `post_confidence` tipsets) the
//! proof for it is computed in the background; a newer deadline cancels the
//! computation of an older one. Whether a finished proof is submitted is
//! decided by the scheduler task alone, so a superseded proof never lands.

mod run;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use futures::FutureExt as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::actors::miner::{
    DeadlineInfo, Method, MinerConfig, SubmitWindowedPoStParams, serialize_params,
};
use crate::chain::{ChainGateway, GatewayError, TipsetToken};
use crate::chain_events::{ApplyHandler, ChainEvents, RevertHandler, SubscriptionId};
use crate::metrics::{self, KindLabel, values};
use crate::networks::Policy;
use crate::sealer::{ProveError, Prover};
use crate::shim::{ActorID, clock::ChainEpoch};
use crate::utils::{RetryArgs, retry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvingConfig {
    pub enabled: bool,
    /// Tipsets on top of a deadline's open epoch before its proof is started.
    pub post_confidence: ChainEpoch,
}

impl Default for ProvingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            post_confidence: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("chain api call failed: {0}")]
    Api(#[from] GatewayError),
    #[error(transparent)]
    Prove(#[from] ProveError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PostError {
    fn kind(&self) -> KindLabel {
        match self {
            PostError::Api(_) | PostError::Other(_) => values::POST_SETUP,
            PostError::Prove(_) => values::POST_COMPUTE,
        }
    }
}

/// Snapshot of the scheduler for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PostStatus {
    /// Open epoch of the most recently started deadline.
    pub target: Option<ChainEpoch>,
    /// Highest open epoch whose proof failed.
    pub failed: Option<ChainEpoch>,
    pub running: bool,
    /// The latest started deadline has a recorded failure.
    pub failing: bool,
}

pub(crate) struct PostContext {
    pub gateway: Arc<dyn ChainGateway>,
    pub prover: Arc<dyn Prover>,
    pub miner: MinerConfig,
    pub miner_id: ActorID,
    pub policy: Policy,
}

enum PostEvent {
    DeadlineReached {
        open: ChainEpoch,
        token: TipsetToken,
    },
    DeadlineReverted {
        open: ChainEpoch,
    },
    ProofReady {
        generation: u64,
        deadline: DeadlineInfo,
        result: Result<Option<SubmitWindowedPoStParams>, PostError>,
    },
    TriggerNow,
}

struct ActiveDeadline {
    /// Tells apart two runs for the same deadline.
    generation: u64,
    open: ChainEpoch,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    active: Option<ActiveDeadline>,
    target: Option<ChainEpoch>,
    failed: Option<ChainEpoch>,
    /// Bumped for every proof computation started.
    generation: u64,
    /// Deadline subscriptions by open epoch.
    registered: BTreeMap<ChainEpoch, SubscriptionId>,
}

impl SchedulerState {
    fn fail(&mut self, open: ChainEpoch) {
        self.failed = Some(self.failed.map_or(open, |failed| failed.max(open)));
    }

    fn status(&self) -> PostStatus {
        PostStatus {
            target: self.target,
            failed: self.failed,
            running: self.active.is_some(),
            failing: match (self.failed, self.target) {
                (Some(failed), Some(target)) => failed >= target,
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }
}

pub struct WindowPostScheduler {
    ctx: Arc<PostContext>,
    events: Arc<ChainEvents>,
    config: ProvingConfig,
    sender: flume::Sender<PostEvent>,
    receiver: flume::Receiver<PostEvent>,
    state: Mutex<SchedulerState>,
    shutdown: CancellationToken,
}

impl WindowPostScheduler {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        events: Arc<ChainEvents>,
        prover: Arc<dyn Prover>,
        miner: MinerConfig,
        policy: Policy,
        config: ProvingConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let miner_id = miner.actor_id()?;
        let (sender, receiver) = flume::unbounded();
        Ok(Self {
            ctx: Arc::new(PostContext {
                gateway,
                prover,
                miner,
                miner_id,
                policy,
            }),
            events,
            config,
            sender,
            receiver,
            state: Default::default(),
            shutdown,
        })
    }

    pub fn status(&self) -> PostStatus {
        self.state.lock().status()
    }

    /// Starts the current deadline now, replacing any running computation.
    pub fn trigger_now(&self) -> anyhow::Result<()> {
        self.sender
            .send(PostEvent::TriggerNow)
            .map_err(|_| anyhow!("proof scheduler is not running"))
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let span = info_span!("wdpost", miner = %self.ctx.miner.actor);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self: &Arc<Self>) -> anyhow::Result<()> {
        let gateway = &self.ctx.gateway;
        let args = RetryArgs {
            max_attempts: 10,
            delay: std::time::Duration::from_secs(1),
        };
        let head = retry(args, || gateway.chain_head())
            .await
            .context("failed to fetch the chain head")?;
        let di = gateway
            .state_miner_proving_deadline(&self.ctx.miner.actor, &head.token)
            .await
            .context("failed to load the current proving deadline")?;
        info!(
            deadline = di.index,
            open = di.open,
            "window post scheduler started"
        );
        self.schedule(di.open).await;

        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.receiver.recv_async() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            match event {
                PostEvent::DeadlineReached { open, token } => {
                    self.on_deadline(open, token).await;
                }
                PostEvent::DeadlineReverted { open } => self.on_revert(open).await,
                PostEvent::ProofReady {
                    generation,
                    deadline,
                    result,
                } => {
                    self.on_proof(generation, deadline, result).await;
                }
                PostEvent::TriggerNow => self.on_trigger().await,
            }
        }
        self.stop();
        debug!("window post scheduler stopped");
        Ok(())
    }

    /// Registers a wait for the deadline opening at `open`, once.
    async fn schedule(&self, open: ChainEpoch) {
        if self.state.lock().registered.contains_key(&open) {
            return;
        }
        let on_apply: ApplyHandler = {
            let sender = self.sender.clone();
            Box::new(move |token: TipsetToken, _height: ChainEpoch| {
                async move {
                    sender
                        .send(PostEvent::DeadlineReached { open, token })
                        .map_err(|_| anyhow!("proof scheduler has stopped"))
                }
                .boxed()
            })
        };
        let on_revert: RevertHandler = {
            let sender = self.sender.clone();
            Box::new(move |_token: TipsetToken| {
                async move {
                    sender
                        .send(PostEvent::DeadlineReverted { open })
                        .map_err(|_| anyhow!("proof scheduler has stopped"))
                }
                .boxed()
            })
        };
        let id = self
            .events
            .chain_at(open, self.config.post_confidence, on_apply, on_revert)
            .await;
        debug!(open, "scheduled window post deadline");
        self.state.lock().registered.insert(open, id);
    }

    async fn on_deadline(self: &Arc<Self>, open: ChainEpoch, token: TipsetToken) {
        let di = match self
            .ctx
            .gateway
            .state_miner_proving_deadline(&self.ctx.miner.actor, &token)
            .await
        {
            Ok(di) => di,
            Err(e) => {
                error!(open, "failed to load proving deadline: {e}");
                metrics::WINDOW_POST_FAILURES
                    .get_or_create(&values::POST_SETUP)
                    .inc();
                self.state.lock().fail(open);
                self.schedule(open + self.ctx.policy.wpost_challenge_window)
                    .await;
                return;
            }
        };
        self.start(di, token, false);
        self.schedule(di.next_open()).await;
        self.prune(di.open);
    }

    async fn on_revert(&self, open: ChainEpoch) {
        {
            let mut state = self.state.lock();
            state.registered.remove(&open);
            if state.active.as_ref().is_some_and(|active| active.open == open) {
                if let Some(active) = state.active.take() {
                    active.cancel.cancel();
                }
                warn!(open, "deadline trigger reverted, cancelling proof");
            }
            if state.target == Some(open) {
                state.target = None;
            }
        }
        self.schedule(open).await;
    }

    async fn on_trigger(&self) {
        let gateway = &self.ctx.gateway;
        let current = async {
            let head = gateway.chain_head().await?;
            let di = gateway
                .state_miner_proving_deadline(&self.ctx.miner.actor, &head.token)
                .await?;
            Ok::<_, GatewayError>((di, head.token))
        };
        match current.await {
            Ok((di, token)) => {
                info!(deadline = di.index, open = di.open, "window post triggered manually");
                self.start(di, token, true);
            }
            Err(e) => warn!("failed to trigger window post: {e}"),
        }
    }

    /// Spawns the proof computation for `di`, cancelling an older one. With
    /// `force` the deadline is restarted even if it was already started.
    fn start(&self, di: DeadlineInfo, token: TipsetToken, force: bool) {
        let (generation, cancel) = {
            let mut state = self.state.lock();
            if !force && state.target.is_some_and(|target| target >= di.open) {
                debug!(open = di.open, "deadline already started");
                return;
            }
            if let Some(active) = state.active.take() {
                info!(open = active.open, "cancelling superseded window post");
                active.cancel.cancel();
            }
            let cancel = self.shutdown.child_token();
            state.generation += 1;
            state.active = Some(ActiveDeadline {
                generation: state.generation,
                open: di.open,
                cancel: cancel.clone(),
            });
            state.target = Some(di.open);
            (state.generation, cancel)
        };

        let ctx = self.ctx.clone();
        let sender = self.sender.clone();
        let span = info_span!("deadline", index = di.index, open = di.open);
        tokio::spawn(
            async move {
                let result = run::run_post(&ctx, &di, &token, cancel).await;
                if sender
                    .send(PostEvent::ProofReady {
                        generation,
                        deadline: di,
                        result,
                    })
                    .is_err()
                {
                    debug!("proof scheduler gone, dropping result");
                }
            }
            .instrument(span),
        );
    }

    async fn on_proof(
        self: &Arc<Self>,
        generation: u64,
        deadline: DeadlineInfo,
        result: Result<Option<SubmitWindowedPoStParams>, PostError>,
    ) {
        let current = {
            let mut state = self.state.lock();
            match &state.active {
                Some(active) if active.generation == generation => {
                    state.active = None;
                    true
                }
                _ => false,
            }
        };
        if !current {
            debug!(open = deadline.open, "discarding result of a superseded deadline");
            return;
        }
        match result {
            Ok(Some(params)) => self.submit(deadline, params).await,
            Ok(None) => {}
            Err(PostError::Prove(ProveError::Cancelled)) => {
                debug!(open = deadline.open, "window post cancelled");
            }
            Err(e) => {
                error!(
                    deadline = deadline.index,
                    open = deadline.open,
                    "window post failed: {e:#}"
                );
                metrics::WINDOW_POST_FAILURES.get_or_create(&e.kind()).inc();
                self.state.lock().fail(deadline.open);
            }
        }
    }

    async fn submit(self: &Arc<Self>, deadline: DeadlineInfo, params: SubmitWindowedPoStParams) {
        let open = deadline.open;
        let pushed = async {
            let params = serialize_params(&params)?;
            let message = self.ctx.miner.message(Method::SubmitWindowedPoSt, params);
            Ok::<_, anyhow::Error>(self.ctx.gateway.send_message(message).await?)
        };
        let cid = match pushed.await {
            Ok(cid) => cid,
            Err(e) => {
                error!(deadline = deadline.index, open, "submitting window post failed: {e:#}");
                metrics::WINDOW_POST_FAILURES
                    .get_or_create(&values::POST_SUBMIT)
                    .inc();
                self.state.lock().fail(open);
                return;
            }
        };
        metrics::WINDOW_POST_SUBMISSIONS.inc();
        info!(deadline = deadline.index, open, message = %cid, "window post submitted");

        let this = self.clone();
        tokio::spawn(async move {
            let confidence = this.ctx.policy.message_confidence;
            let lookup = tokio::select! {
                _ = this.shutdown.cancelled() => return,
                lookup = this.ctx.gateway.wait_for_message(&cid, confidence) => lookup,
            };
            match lookup {
                Ok(lookup) if lookup.receipt.exit_code.is_success() => {
                    debug!(open, height = lookup.height, "window post landed");
                }
                Ok(lookup) => {
                    error!(
                        open,
                        message = %cid,
                        exit_code = %lookup.receipt.exit_code,
                        "window post message failed on chain"
                    );
                    metrics::WINDOW_POST_FAILURES
                        .get_or_create(&values::POST_RECEIPT)
                        .inc();
                    this.state.lock().fail(open);
                }
                Err(e) => warn!(open, message = %cid, "failed to wait for window post receipt: {e}"),
            }
        });
    }

    /// Forgets subscriptions of deadlines that are final.
    fn prune(&self, open: ChainEpoch) {
        let horizon = open - self.ctx.policy.chain_finality;
        let mut state = self.state.lock();
        let keep = state.registered.split_off(&horizon);
        let stale = std::mem::replace(&mut state.registered, keep);
        for id in stale.into_values() {
            self.events.cancel(id);
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
        }
        for id in std::mem::take(&mut state.registered).into_values() {
            self.events.cancel(id);
        }
    }
}
