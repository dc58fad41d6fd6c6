// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{RawBytes, strict_bytes};
use num_derive::FromPrimitive;
use serde_with::{DisplayFromStr, serde_as};

use crate::chain::MessageSpec;
use crate::networks::Policy;
use crate::shim::{
    ActorID,
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    randomness::Randomness,
    sector::{PoStProof, RegisteredSealProof, SectorNumber},
};

/// Miner actor methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = 1,
    ControlAddresses = 2,
    ChangeWorkerAddress = 3,
    ChangePeerID = 4,
    SubmitWindowedPoSt = 5,
    PreCommitSector = 6,
    ProveCommitSector = 7,
    ExtendSectorExpiration = 8,
    TerminateSectors = 9,
    DeclareFaults = 10,
    DeclareFaultsRecovered = 11,
}

impl Method {
    pub fn number(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PreCommitSectorParams {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    /// CommR
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
    pub replace_capacity: bool,
    pub replace_sector_deadline: u64,
    pub replace_sector_partition: u64,
    pub replace_sector_number: SectorNumber,
}

/// Pre-commit as recorded in the miner actor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorPreCommitOnChainInfo {
    pub info: PreCommitSectorParams,
    pub pre_commit_deposit: TokenAmount,
    pub pre_commit_epoch: ChainEpoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitSectorParams {
    pub sector_number: SectorNumber,
    #[serde(with = "strict_bytes")]
    pub proof: Vec<u8>,
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct DeclareFaultsParams {
    pub faults: Vec<FaultDeclaration>,
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct FaultDeclaration {
    /// The deadline to which the faulty sectors are assigned, in range [0..WPoStPeriodDeadlines)
    pub deadline: u64,
    /// Partition index within the deadline containing the faulty sectors.
    pub partition: u64,
    /// Sectors in the partition being declared faulty.
    pub sectors: BitField,
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct PoStPartition {
    /// Partitions are numbered per-deadline, from zero.
    pub index: u64,
    /// Sectors skipped while proving that weren't already declared faulty.
    pub skipped: BitField,
}

/// Information submitted by a miner to provide a Window PoSt.
#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SubmitWindowedPoStParams {
    /// The deadline index which the submission targets.
    pub deadline: u64,
    /// The partitions being proven.
    pub partitions: Vec<PoStPartition>,
    /// One proof per distinct registered proof type present in the sectors being proven.
    pub proofs: Vec<PoStProof>,
    /// The epoch at which these proofs are being committed to a particular chain.
    pub chain_commit_epoch: ChainEpoch,
    /// The ticket randomness on the chain at `chain_commit_epoch`.
    pub chain_commit_rand: Randomness,
}

/// Sector as recorded in the miner actor after a successful prove-commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorOnChainInfo {
    pub sector_number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
    pub sealed_cid: Cid,
    pub activation: ChainEpoch,
    pub expiration: ChainEpoch,
}

/// Location of a sector in the miner's proving schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLocation {
    pub deadline: u64,
    pub partition: u64,
}

/// Partition of a deadline.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub all_sectors: BitField,
    pub faulty_sectors: BitField,
    pub recovering_sectors: BitField,
    pub active_sectors: BitField,
}

impl Partition {
    /// Sectors expected to be proven, i.e. everything not already declared faulty.
    pub fn provable_sectors(&self) -> BitField {
        &self.all_sectors - &self.faulty_sectors
    }
}

/// Deadline calculations with respect to a current epoch.
/// "Deadline" refers to the window during which proofs may be submitted.
/// Windows are non-overlapping ranges [Open, Close), but the challenge epoch for a window occurs before
/// the window opens.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineInfo {
    /// Epoch at which this info was calculated.
    pub current_epoch: ChainEpoch,
    /// First epoch of the proving period (<= CurrentEpoch).
    pub period_start: ChainEpoch,
    /// Current deadline index, in [0..WPoStProvingPeriodDeadlines).
    pub index: u64,
    /// First epoch from which a proof may be submitted (>= CurrentEpoch).
    pub open: ChainEpoch,
    /// First epoch from which a proof may no longer be submitted (>= Open).
    pub close: ChainEpoch,
    /// Epoch at which to sample the chain for challenge (< Open).
    pub challenge: ChainEpoch,
    /// First epoch at which a fault declaration is rejected (< Open).
    pub fault_cutoff: ChainEpoch,
    pub wpost_period_deadlines: u64,
    pub wpost_proving_period: ChainEpoch,
    pub wpost_challenge_window: ChainEpoch,
}

impl DeadlineInfo {
    pub fn new(
        period_start: ChainEpoch,
        deadline_idx: u64,
        current_epoch: ChainEpoch,
        policy: &Policy,
    ) -> Self {
        let proving_period = policy.wpost_proving_period();
        let common = Self {
            current_epoch,
            period_start,
            index: deadline_idx,
            wpost_period_deadlines: policy.wpost_period_deadlines,
            wpost_proving_period: proving_period,
            wpost_challenge_window: policy.wpost_challenge_window,
            ..Default::default()
        };
        if deadline_idx < policy.wpost_period_deadlines {
            let deadline_open =
                period_start + (deadline_idx as ChainEpoch * policy.wpost_challenge_window);
            Self {
                open: deadline_open,
                close: deadline_open + policy.wpost_challenge_window,
                challenge: deadline_open - policy.wpost_challenge_lookback,
                fault_cutoff: deadline_open - policy.fault_declaration_cutoff,
                ..common
            }
        } else {
            let after_last_deadline = period_start + proving_period;
            Self {
                open: after_last_deadline,
                close: after_last_deadline,
                challenge: after_last_deadline,
                fault_cutoff: 0,
                ..common
            }
        }
    }

    /// The deadline open at `current_epoch` for a miner whose proving periods start
    /// at `period_offset` modulo the proving period.
    pub fn current(period_offset: ChainEpoch, current_epoch: ChainEpoch, policy: &Policy) -> Self {
        let proving_period = policy.wpost_proving_period();
        let offset = period_offset.rem_euclid(proving_period);
        let period_start = current_epoch - (current_epoch - offset).rem_euclid(proving_period);
        let index = ((current_epoch - period_start) / policy.wpost_challenge_window) as u64;
        Self::new(period_start, index, current_epoch, policy)
    }

    /// Whether the current deadline is currently open.
    pub fn is_open(&self) -> bool {
        self.current_epoch >= self.open && self.current_epoch < self.close
    }

    /// Whether the current deadline has already closed.
    pub fn has_elapsed(&self) -> bool {
        self.current_epoch >= self.close
    }

    /// Epoch at which the subsequent deadline opens.
    pub fn next_open(&self) -> ChainEpoch {
        self.close
    }

    /// Whether the deadline's fault cutoff has passed.
    pub fn fault_cutoff_passed(&self) -> bool {
        self.current_epoch >= self.fault_cutoff
    }
}

/// Encodes actor method parameters.
pub fn serialize_params<T: serde::Serialize>(params: &T) -> anyhow::Result<RawBytes> {
    Ok(RawBytes::serialize(params)?)
}

/// Sector sizes a miner can be configured with, by their usual names.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum ConfiguredSectorSize {
    #[strum(serialize = "2KiB")]
    _2KiB,
    #[strum(serialize = "8MiB")]
    _8MiB,
    #[strum(serialize = "512MiB")]
    _512MiB,
    #[default]
    #[strum(serialize = "32GiB")]
    _32GiB,
    #[strum(serialize = "64GiB")]
    _64GiB,
}

impl ConfiguredSectorSize {
    pub fn seal_proof(self) -> RegisteredSealProof {
        match self {
            Self::_2KiB => RegisteredSealProof::StackedDRG2KiBV1P1,
            Self::_8MiB => RegisteredSealProof::StackedDRG8MiBV1P1,
            Self::_512MiB => RegisteredSealProof::StackedDRG512MiBV1P1,
            Self::_32GiB => RegisteredSealProof::StackedDRG32GiBV1P1,
            Self::_64GiB => RegisteredSealProof::StackedDRG64GiBV1P1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GasLimits {
    pub pre_commit: u64,
    pub prove_commit: u64,
    pub declare_faults: u64,
    pub submit_post: u64,
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            pre_commit: 100_000_000,
            prove_commit: 1_000_000_000,
            declare_faults: 100_000_000,
            submit_post: 1_000_000_000,
        }
    }
}

/// The miner actor this node operates, and how messages to it are sent.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub actor: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub worker: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub sector_size: ConfiguredSectorSize,
    pub gas: GasLimits,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            actor: Address::new_id(1000),
            worker: Address::new_id(1001),
            sector_size: ConfiguredSectorSize::default(),
            gas: GasLimits::default(),
        }
    }
}

impl MinerConfig {
    pub fn actor_id(&self) -> anyhow::Result<ActorID> {
        self.actor
            .id()
            .map_err(|e| anyhow::anyhow!("miner actor {} is not an ID address: {e}", self.actor))
    }

    pub fn seal_proof(&self) -> RegisteredSealProof {
        self.sector_size.seal_proof()
    }

    /// A zero-value message from the worker to the miner actor.
    pub fn message(&self, method: Method, params: RawBytes) -> MessageSpec {
        let gas_limit = match method {
            Method::PreCommitSector => self.gas.pre_commit,
            Method::ProveCommitSector => self.gas.prove_commit,
            Method::DeclareFaults => self.gas.declare_faults,
            Method::SubmitWindowedPoSt => self.gas.submit_post,
            _ => self.gas.pre_commit,
        };
        MessageSpec {
            from: self.worker,
            to: self.actor,
            method: method.number(),
            value: TokenAmount::default(),
            gas_limit,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_numbers() {
        assert_eq!(Method::SubmitWindowedPoSt.number(), 5);
        assert_eq!(Method::PreCommitSector.number(), 6);
        assert_eq!(Method::ProveCommitSector.number(), 7);
        assert_eq!(Method::DeclareFaults.number(), 10);
    }

    #[test]
    fn deadline_windows() {
        let policy = Policy::mainnet();
        let di = DeadlineInfo::new(1000, 2, 1130, &policy);
        assert_eq!(di.open, 1120);
        assert_eq!(di.close, 1180);
        assert_eq!(di.challenge, 1100);
        assert_eq!(di.fault_cutoff, 1050);
        assert!(di.is_open());
        assert_eq!(di.next_open(), 1180);
    }

    #[test]
    fn current_deadline_tracks_epoch() {
        let policy = Policy::mainnet();
        let di = DeadlineInfo::current(100, 5000, &policy);
        assert!(di.is_open());
        assert_eq!(di.period_start, 2980);
        assert_eq!(di.index, 33);

        let di = DeadlineInfo::current(0, 59, &policy);
        assert_eq!((di.index, di.open, di.close), (0, 0, 60));
    }

    #[test]
    fn sector_size_names() {
        let size: ConfiguredSectorSize = "8MiB".parse().unwrap();
        assert_eq!(size.seal_proof(), RegisteredSealProof::StackedDRG8MiBV1P1);
        assert_eq!(ConfiguredSectorSize::_2KiB.to_string(), "2KiB");
        assert!("3MiB".parse::<ConfiguredSectorSize>().is_err());
    }

    #[test]
    fn messages_use_per_method_gas() {
        let config = MinerConfig::default();
        assert_eq!(config.actor_id().unwrap(), 1000);
        let msg = config.message(Method::ProveCommitSector, RawBytes::default());
        assert_eq!(msg.to, config.actor);
        assert_eq!(msg.from, config.worker);
        assert_eq!(msg.method, 7);
        assert_eq!(msg.gas_limit, config.gas.prove_commit);
    }

    #[test]
    fn prove_commit_params_encode_as_tuple() {
        let params = ProveCommitSectorParams {
            sector_number: 3,
            proof: vec![1, 2, 3],
        };
        let bytes = serialize_params(&params).unwrap();
        // array(2), uint(3), bytes(3)
        assert_eq!(bytes.bytes(), &[0x82, 0x03, 0x43, 1, 2, 3]);
    }
}
