// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::shim::{
    ActorID,
    clock::ChainEpoch,
    deal::DealID,
    error::ExitCode,
    piece::{PieceInfo, UnpaddedPieceSize},
    randomness::Randomness,
    sector::{RegisteredSealProof, SectorId, SectorNumber},
};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum SectorState {
    Packing,
    PreCommit1,
    PreCommit2,
    PreCommitting,
    WaitSeed,
    Committing,
    CommitWait,
    FinalizeSector,
    Proving,

    Faulty,
    FaultReported,
    FaultedFinal,

    PackingFailed,
    SealPreCommitFailed,
    ChainPreCommitFailed,
    CommitFailed,
    ComputeProofFailed,
    FinalizeFailed,
    FatalError,
}

impl SectorState {
    /// States in which a sector task has nothing left to do on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SectorState::Proving | SectorState::FaultedFinal | SectorState::FatalError
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            SectorState::PackingFailed
                | SectorState::SealPreCommitFailed
                | SectorState::ChainPreCommitFailed
                | SectorState::CommitFailed
                | SectorState::ComputeProofFailed
                | SectorState::FinalizeFailed
                | SectorState::FatalError
        )
    }

    /// The step a recoverable failure state goes back to.
    pub fn retry_target(self) -> Option<SectorState> {
        match self {
            SectorState::PackingFailed => Some(SectorState::Packing),
            SectorState::SealPreCommitFailed => Some(SectorState::PreCommit1),
            SectorState::ComputeProofFailed => Some(SectorState::Committing),
            SectorState::FinalizeFailed => Some(SectorState::FinalizeSector),
            _ => None,
        }
    }

    /// Position along the pipeline. Failure states sit at the step they failed in.
    fn stage(self) -> Option<u8> {
        use SectorState::*;
        Some(match self {
            Packing | PackingFailed => 0,
            PreCommit1 | SealPreCommitFailed => 1,
            PreCommit2 => 2,
            PreCommitting | ChainPreCommitFailed => 3,
            WaitSeed => 4,
            Committing | ComputeProofFailed | CommitFailed => 5,
            CommitWait => 6,
            FinalizeSector | FinalizeFailed => 7,
            Proving => 8,
            Faulty => 9,
            FaultReported => 10,
            FaultedFinal => 11,
            FatalError => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub deal_id: DealID,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub piece: PieceInfo,
    /// `None` for fillers.
    pub deal: Option<DealInfo>,
}

impl Piece {
    pub fn filler(piece: PieceInfo) -> Self {
        Self { piece, deal: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorLogEntry {
    /// Unix seconds.
    pub timestamp: i64,
    pub kind: String,
    pub message: String,
}

/// Error context carried by a failure event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: String,
    pub exit_code: Option<ExitCode>,
}

impl Failure {
    pub fn msg(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            exit_code: None,
        }
    }

    pub fn from_error(error: &anyhow::Error) -> Self {
        Self::msg(format!("{error:#}"))
    }

    pub fn with_exit_code(mut self, exit_code: ExitCode) -> Self {
        self.exit_code = Some(exit_code);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum SectorEvent {
    Packed {
        fillers: Vec<PieceInfo>,
    },
    PreCommit1Done {
        ticket: Randomness,
        ticket_epoch: ChainEpoch,
        out: Vec<u8>,
    },
    PreCommit2Done {
        unsealed: Cid,
        sealed: Cid,
    },
    PreCommitted {
        message: Cid,
    },
    SeedReady {
        seed: Randomness,
        epoch: ChainEpoch,
    },
    SeedReverted,
    Committed {
        message: Cid,
        proof: Vec<u8>,
    },
    CommitLanded,
    Finalized,

    ReportFaulty,
    FaultReported {
        message: Cid,
    },
    FaultedFinal,

    Retry,
    ForceState {
        state: SectorState,
    },

    PackingFailed(Failure),
    SealPreCommitFailed(Failure),
    ChainPreCommitFailed(Failure),
    CommitFailed(Failure),
    ComputeProofFailed(Failure),
    FinalizeFailed(Failure),
    Fatal(Failure),
}

impl SectorEvent {
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    fn failure(&self) -> Option<&Failure> {
        match self {
            SectorEvent::PackingFailed(f)
            | SectorEvent::SealPreCommitFailed(f)
            | SectorEvent::ChainPreCommitFailed(f)
            | SectorEvent::CommitFailed(f)
            | SectorEvent::ComputeProofFailed(f)
            | SectorEvent::FinalizeFailed(f)
            | SectorEvent::Fatal(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("event {event} is not allowed in state {state}")]
    UnexpectedEvent {
        state: SectorState,
        event: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorInfo {
    pub sector_number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
    pub state: SectorState,

    pub pieces: Vec<Piece>,

    pub ticket_value: Option<Randomness>,
    pub ticket_epoch: Option<ChainEpoch>,
    pub pre_commit1_out: Option<Vec<u8>>,
    pub comm_d: Option<Cid>,
    pub comm_r: Option<Cid>,
    pub pre_commit_message: Option<Cid>,

    pub seed_value: Option<Randomness>,
    pub seed_epoch: Option<ChainEpoch>,
    pub proof: Option<Vec<u8>>,
    pub commit_message: Option<Cid>,

    pub fault_report_message: Option<Cid>,

    pub last_error: Option<String>,
    pub last_exit_code: Option<ExitCode>,
    /// Automatic retries used since the last milestone.
    pub retries: u64,

    pub log: Vec<SectorLogEntry>,
}

impl SectorInfo {
    pub fn new(
        sector_number: SectorNumber,
        seal_proof: RegisteredSealProof,
        pieces: Vec<Piece>,
    ) -> Self {
        Self {
            sector_number,
            seal_proof,
            state: SectorState::Packing,
            pieces,
            ticket_value: None,
            ticket_epoch: None,
            pre_commit1_out: None,
            comm_d: None,
            comm_r: None,
            pre_commit_message: None,
            seed_value: None,
            seed_epoch: None,
            proof: None,
            commit_message: None,
            fault_report_message: None,
            last_error: None,
            last_exit_code: None,
            retries: 0,
            log: vec![],
        }
    }

    pub fn sector_id(&self, miner: ActorID) -> SectorId {
        SectorId {
            miner,
            number: self.sector_number,
        }
    }

    pub fn piece_infos(&self) -> Vec<PieceInfo> {
        self.pieces.iter().map(|p| p.piece.clone()).collect()
    }

    pub fn deal_ids(&self) -> Vec<DealID> {
        self.pieces
            .iter()
            .filter_map(|p| p.deal.as_ref().map(|d| d.deal_id))
            .collect()
    }

    pub fn unpadded_sizes(&self) -> Vec<UnpaddedPieceSize> {
        self.pieces.iter().map(|p| p.piece.size.unpadded()).collect()
    }

    /// Applies `event` through the transition table. A rejected event leaves
    /// the record untouched.
    pub fn apply(&mut self, event: SectorEvent) -> Result<(), PlanError> {
        use SectorEvent as E;
        use SectorState as S;

        let next = match (self.state, &event) {
            (S::Packing, E::Packed { .. }) => S::PreCommit1,
            (S::PreCommit1, E::PreCommit1Done { .. }) => S::PreCommit2,
            (S::PreCommit2, E::PreCommit2Done { .. }) => S::PreCommitting,
            (S::PreCommitting, E::PreCommitted { .. }) => S::WaitSeed,
            (S::WaitSeed, E::SeedReady { .. }) => S::Committing,
            (S::Committing, E::SeedReverted) if self.commit_message.is_none() => S::WaitSeed,
            (S::Committing, E::Committed { .. }) => S::CommitWait,
            (S::CommitWait, E::CommitLanded) => S::FinalizeSector,
            (S::FinalizeSector, E::Finalized) => S::Proving,

            (S::Proving, E::ReportFaulty) => S::Faulty,
            (S::Faulty, E::FaultReported { .. }) => S::FaultReported,
            (S::FaultReported, E::FaultedFinal) => S::FaultedFinal,

            (S::Packing | S::PreCommit1 | S::PreCommitting, E::PackingFailed(_)) => {
                S::PackingFailed
            }
            (S::PreCommit1 | S::PreCommit2 | S::PreCommitting, E::SealPreCommitFailed(_)) => {
                S::SealPreCommitFailed
            }
            (S::PreCommitting | S::WaitSeed, E::ChainPreCommitFailed(_)) => {
                S::ChainPreCommitFailed
            }
            (S::Committing | S::CommitWait, E::CommitFailed(_)) => S::CommitFailed,
            (S::Committing, E::ComputeProofFailed(_)) => S::ComputeProofFailed,
            (S::FinalizeSector, E::FinalizeFailed(_)) => S::FinalizeFailed,
            (state, E::Fatal(_)) if !state.is_terminal() => S::FatalError,
            (state, E::Retry) if state.retry_target().is_some() => {
                state.retry_target().unwrap_or(state)
            }
            (_, E::ForceState { state }) => *state,

            (state, event) => {
                return Err(PlanError::UnexpectedEvent {
                    state,
                    event: event.kind(),
                });
            }
        };

        let mut message = String::new();
        if let Some(failure) = event.failure() {
            self.last_error = Some(failure.error.clone());
            self.last_exit_code = failure.exit_code;
            message = failure.error.clone();
        }
        let kind = event.kind();
        match event {
            E::Packed { fillers } => {
                self.pieces.extend(fillers.into_iter().map(Piece::filler));
            }
            E::PreCommit1Done {
                ticket,
                ticket_epoch,
                out,
            } => {
                self.ticket_value = Some(ticket);
                self.ticket_epoch = Some(ticket_epoch);
                self.pre_commit1_out = Some(out);
            }
            E::PreCommit2Done { unsealed, sealed } => {
                self.comm_d = Some(unsealed);
                self.comm_r = Some(sealed);
            }
            E::PreCommitted { message: cid } => {
                message = cid.to_string();
                self.pre_commit_message = Some(cid);
                self.retries = 0;
            }
            E::SeedReady { seed, epoch } => {
                message = format!("seed epoch {epoch}");
                self.seed_value = Some(seed);
                self.seed_epoch = Some(epoch);
            }
            E::SeedReverted => {
                self.seed_value = None;
                self.seed_epoch = None;
            }
            E::Committed { message: cid, proof } => {
                message = cid.to_string();
                self.proof = Some(proof);
                self.commit_message = Some(cid);
                self.retries = 0;
            }
            E::Finalized => self.retries = 0,
            E::FaultReported { message: cid } => {
                message = cid.to_string();
                self.fault_report_message = Some(cid);
            }
            E::Retry => self.retries += 1,
            E::ForceState { state } => {
                message = format!("forced from {}", self.state);
                self.clear_for(state);
            }
            _ => {}
        }

        self.state = next;
        self.log.push(SectorLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            kind: kind.to_string(),
            message,
        });
        Ok(())
    }

    /// Drops failure context, and message references that belong to steps
    /// after `target`.
    fn clear_for(&mut self, target: SectorState) {
        self.last_error = None;
        self.last_exit_code = None;
        self.retries = 0;
        let Some(stage) = target.stage() else {
            return;
        };
        if stage <= 3 {
            self.pre_commit_message = None;
            self.seed_value = None;
            self.seed_epoch = None;
        }
        if stage <= 5 {
            self.commit_message = None;
            self.proof = None;
        }
        if stage <= 9 {
            self.fault_report_message = None;
        }
    }
}
