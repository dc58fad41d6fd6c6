// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector lifecycle.
//!
//! Every sector is driven by its own task. The task reads the persisted
//! [`SectorInfo`], runs the handler of its current state and applies the
//! resulting [`SectorEvent`] through the store, so that a restarted process
//! resumes every sector from its last durable state.

pub mod checks;
mod fillers;
mod sector;
mod states;
mod task;
#[cfg(test)]
mod tests;

pub use fillers::fillers_from_rem;
pub use sector::*;

use std::sync::Arc;
use std::time::Duration;

use ahash::HashMap;
use anyhow::{Context as _, bail, ensure};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, info, info_span};

use self::task::SectorTask;
use crate::actors::miner::MinerConfig;
use crate::chain::ChainGateway;
use crate::chain_events::ChainEvents;
use crate::networks::{EPOCHS_IN_DAY, Policy};
use crate::sealer::Sealer;
use crate::sector_store::SectorStore;
use crate::shim::{
    ActorID,
    clock::ChainEpoch,
    sector::{SectorNumber, unpadded_capacity},
};

/// What to do when the tipset the interactive seed was drawn from is reorged out.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SeedRevertPolicy {
    /// Log and keep the drawn seed.
    #[default]
    Log,
    /// Drop the seed and wait again, unless the commit message is already out.
    Rewait,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealingConfig {
    /// Pause before repeating a step that failed on a chain API call.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub api_retry_delay: Duration,
    /// Pause before leaving a recoverable failure state.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub failure_retry_delay: Duration,
    /// Automatic retries allowed before a failed sector is parked for the operator.
    pub max_failure_retries: u64,
    pub seed_revert_policy: SeedRevertPolicy,
    /// Shortest commitment, in epochs, of a sector without deals.
    pub min_sector_lifetime: ChainEpoch,
}

impl Default for SealingConfig {
    fn default() -> Self {
        Self {
            api_retry_delay: Duration::from_secs(10),
            failure_retry_delay: Duration::from_secs(60),
            max_failure_retries: 5,
            seed_revert_policy: SeedRevertPolicy::default(),
            min_sector_lifetime: 180 * EPOCHS_IN_DAY,
        }
    }
}

/// Shared by all sector tasks.
pub(crate) struct SealingContext {
    pub gateway: Arc<dyn ChainGateway>,
    pub events: Arc<ChainEvents>,
    pub sealer: Arc<dyn Sealer>,
    pub store: Arc<dyn SectorStore>,
    pub miner: MinerConfig,
    pub miner_id: ActorID,
    pub policy: Policy,
    pub config: SealingConfig,
}

struct SectorHandle {
    events: flume::Sender<SectorEvent>,
    task: JoinHandle<()>,
}

/// Registry of sector tasks, and the operator-facing sealing operations.
pub struct Sealing {
    ctx: Arc<SealingContext>,
    tasks: Mutex<HashMap<SectorNumber, SectorHandle>>,
    shutdown: CancellationToken,
}

impl Sealing {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        events: Arc<ChainEvents>,
        sealer: Arc<dyn Sealer>,
        store: Arc<dyn SectorStore>,
        miner: MinerConfig,
        policy: Policy,
        config: SealingConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let miner_id = miner.actor_id()?;
        let configured = miner
            .seal_proof()
            .sector_size()
            .map_err(anyhow::Error::msg)?;
        ensure!(
            configured == sealer.sector_size(),
            "sealer works on {:?} sectors, miner is configured for {:?}",
            sealer.sector_size(),
            configured
        );
        Ok(Self {
            ctx: Arc::new(SealingContext {
                gateway,
                events,
                sealer,
                store,
                miner,
                miner_id,
                policy,
                config,
            }),
            tasks: Default::default(),
            shutdown,
        })
    }

    /// Creates a sector holding `pieces` and starts sealing it.
    pub fn start_sector(&self, pieces: Vec<Piece>) -> anyhow::Result<SectorNumber> {
        let capacity = unpadded_capacity(self.ctx.sealer.sector_size());
        let mut used = 0;
        for piece in &pieces {
            ensure!(piece.deal.is_some(), "only deal pieces can be added to a new sector");
            let size = piece.piece.size.unpadded();
            size.validate()
                .map_err(|e| anyhow::anyhow!("invalid piece size {}: {e}", size.0))?;
            used += size.0;
        }
        ensure!(
            used <= capacity.0,
            "pieces need {used} bytes, sector holds {}",
            capacity.0
        );

        let number = self.ctx.store.next_sector_number()?;
        let info = SectorInfo::new(number, self.ctx.miner.seal_proof(), pieces);
        self.ctx.store.put(&info)?;
        info!(sector = number, pieces = info.pieces.len(), "starting sector");
        self.ensure_task(number);
        Ok(number)
    }

    /// Starts a sector that holds no deals.
    pub fn pledge_sector(&self) -> anyhow::Result<SectorNumber> {
        self.start_sector(vec![])
    }

    pub fn sector_info(&self, number: SectorNumber) -> anyhow::Result<Option<SectorInfo>> {
        Ok(self.ctx.store.get(number)?)
    }

    pub fn list_sectors(&self, state: Option<SectorState>) -> anyhow::Result<Vec<SectorInfo>> {
        let mut sectors = self.ctx.store.list()?;
        sectors.retain(|s| state.is_none_or(|state| s.state == state));
        sectors.sort_by_key(|s| s.sector_number);
        Ok(sectors)
    }

    /// Moves a proving sector onto the fault path.
    pub fn declare_faulty(&self, number: SectorNumber) -> anyhow::Result<()> {
        let info = self.get(number)?;
        if info.state != SectorState::Proving {
            bail!(
                "sector {number} is in state {}, only proving sectors can be declared faulty",
                info.state
            );
        }
        self.send(number, SectorEvent::ReportFaulty)
    }

    /// Operator remediation: puts a sector into `state` regardless of where it is.
    pub fn force_state(&self, number: SectorNumber, state: SectorState) -> anyhow::Result<()> {
        self.get(number)?;
        info!(sector = number, %state, "forcing sector state");
        self.send(number, SectorEvent::ForceState { state })
    }

    /// Resumes every sector that has not reached a terminal state. Returns how many.
    pub fn restart(&self) -> anyhow::Result<usize> {
        let mut resumed = vec![];
        self.ctx.store.for_each(&mut |info| {
            if !info.state.is_terminal() {
                resumed.push(info.sector_number);
            }
            Ok(())
        })?;
        for number in &resumed {
            self.ensure_task(*number);
        }
        info!(count = resumed.len(), "resumed sectors");
        Ok(resumed.len())
    }

    fn get(&self, number: SectorNumber) -> anyhow::Result<SectorInfo> {
        self.ctx
            .store
            .get(number)?
            .with_context(|| format!("sector {number} not found"))
    }

    fn send(&self, number: SectorNumber, event: SectorEvent) -> anyhow::Result<()> {
        self.ensure_task(number)
            .send(event)
            .map_err(|_| anyhow::anyhow!("sector {number} task is not running"))
    }

    /// Returns the event sender of the sector's task, spawning the task if needed.
    fn ensure_task(&self, number: SectorNumber) -> flume::Sender<SectorEvent> {
        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.get(&number) {
            if !handle.task.is_finished() {
                return handle.events.clone();
            }
        }
        let (tx, rx) = flume::unbounded();
        let task = SectorTask::new(
            number,
            self.ctx.clone(),
            tx.clone(),
            rx,
            self.shutdown.child_token(),
        );
        let task = tokio::spawn(task.run().instrument(info_span!("sector", number)));
        tasks.insert(
            number,
            SectorHandle {
                events: tx.clone(),
                task,
            },
        );
        tx
    }
}
