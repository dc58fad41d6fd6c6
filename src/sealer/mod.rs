// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Interfaces of the sealing and proving backends.
//!
//! Calls are expected to be idempotent: a sector task that crashes half-way
//! through a step simply repeats it.

pub mod mock;

use async_trait::async_trait;
use cid::Cid;
use tokio_util::sync::CancellationToken;

use crate::shim::{
    ActorID,
    deal::DealID,
    piece::{PieceInfo, UnpaddedPieceSize},
    randomness::Randomness,
    sector::{
        PoStProof, RegisteredSealProof, SectorId, SectorInfo, SectorNumber, SectorSize,
    },
};

/// Commitments produced by the second pre-commit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorCids {
    /// CommD
    pub unsealed: Cid,
    /// CommR
    pub sealed: Cid,
}

/// Everything needed to check a seal proof locally, before paying for it on chain.
#[derive(Debug, Clone)]
pub struct SealVerifyInfo {
    pub seal_proof: RegisteredSealProof,
    pub sector: SectorId,
    pub deal_ids: Vec<DealID>,
    pub ticket: Randomness,
    pub seed: Randomness,
    pub proof: Vec<u8>,
    pub sealed_cid: Cid,
    pub unsealed_cid: Cid,
}

#[async_trait]
pub trait Sealer: Send + Sync {
    fn sector_size(&self) -> SectorSize;

    /// Writes a zero-filled piece of `size` after the `existing` pieces.
    async fn add_piece(
        &self,
        sector: SectorId,
        existing: &[UnpaddedPieceSize],
        size: UnpaddedPieceSize,
    ) -> anyhow::Result<PieceInfo>;

    async fn seal_pre_commit1(
        &self,
        sector: SectorId,
        ticket: &Randomness,
        pieces: &[PieceInfo],
    ) -> anyhow::Result<Vec<u8>>;

    async fn seal_pre_commit2(
        &self,
        sector: SectorId,
        pre_commit1_out: &[u8],
    ) -> anyhow::Result<SectorCids>;

    async fn seal_commit1(
        &self,
        sector: SectorId,
        ticket: &Randomness,
        seed: &Randomness,
        pieces: &[PieceInfo],
        cids: &SectorCids,
    ) -> anyhow::Result<Vec<u8>>;

    async fn seal_commit2(&self, sector: SectorId, commit1_out: &[u8]) -> anyhow::Result<Vec<u8>>;

    async fn verify_seal(&self, info: &SealVerifyInfo) -> anyhow::Result<bool>;

    /// Drops sealing scratch data once the sector is committed.
    async fn finalize_sector(&self, sector: SectorId) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProveError {
    #[error("proof computation cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
pub trait Prover: Send + Sync {
    /// Returns the sectors among `sectors` that cannot be read back right now.
    async fn check_provable(
        &self,
        miner: ActorID,
        sectors: &[SectorInfo],
    ) -> anyhow::Result<Vec<SectorNumber>>;

    /// Computes a window proof over `sectors`. Must return
    /// [`ProveError::Cancelled`] promptly once `cancel` fires.
    async fn generate_window_post(
        &self,
        miner: ActorID,
        sectors: &[SectorInfo],
        randomness: &Randomness,
        faults: &[SectorNumber],
        cancel: CancellationToken,
    ) -> Result<Vec<PoStProof>, ProveError>;
}
