// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Deterministic stand-ins for the proofs backend. Commitments and proofs are
//! hashes of their inputs, so a chain simulator can reproduce them.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use ahash::HashMap;
use anyhow::{Context as _, bail};
use async_trait::async_trait;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ProveError, Prover, SealVerifyInfo, Sealer, SectorCids};
use crate::shim::{
    ActorID,
    piece::{PaddedPieceSize, PieceInfo, UnpaddedPieceSize},
    randomness::Randomness,
    sector::{
        PoStProof, RegisteredSealProof, SectorId, SectorInfo, SectorNumber, SectorSize,
        data_commitment_cid, replica_commitment_cid,
    },
};

fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let hash = Code::Blake2b256.digest(&parts.concat());
    let mut out = [0; 32];
    out.copy_from_slice(&hash.digest()[..32]);
    out
}

/// CommP of a zero-filled piece.
pub fn zero_piece_commitment(size: PaddedPieceSize) -> anyhow::Result<Cid> {
    data_commitment_cid(&digest(&[b"zero", &size.0.to_be_bytes()]))
}

/// CommD over the deal pieces of a sector. Zero pieces do not contribute.
pub fn mock_data_commitment(
    seal_proof: RegisteredSealProof,
    deal_pieces: &[PieceInfo],
) -> anyhow::Result<Cid> {
    let proof_id = i64::from(seal_proof).to_be_bytes();
    let mut parts: Vec<Vec<u8>> = vec![b"commd".to_vec(), proof_id.to_vec()];
    for piece in deal_pieces {
        parts.push(piece.cid.to_bytes());
        parts.push(piece.size.0.to_be_bytes().to_vec());
    }
    let parts: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    data_commitment_cid(&digest(&parts))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum SealStep {
    AddPiece,
    PreCommit1,
    PreCommit2,
    Commit1,
    Commit2,
    Finalize,
}

pub struct MockSealer {
    seal_proof: RegisteredSealProof,
    sector_size: SectorSize,
    failures: Mutex<HashMap<SealStep, usize>>,
    calls: Mutex<Vec<(SealStep, SectorNumber)>>,
    held: watch::Sender<BTreeSet<SealStep>>,
}

impl MockSealer {
    pub fn new(seal_proof: RegisteredSealProof) -> anyhow::Result<Self> {
        let sector_size = seal_proof
            .sector_size()
            .map_err(anyhow::Error::msg)
            .context("unsupported seal proof")?;
        Ok(Self {
            seal_proof,
            sector_size,
            failures: Default::default(),
            calls: Default::default(),
            held: watch::channel(BTreeSet::new()).0,
        })
    }

    /// Makes the next `times` invocations of `step` fail.
    pub fn fail_next(&self, step: SealStep, times: usize) {
        *self.failures.lock().entry(step).or_default() += times;
    }

    pub fn call_count(&self, step: SealStep, sector: SectorNumber) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(s, n)| *s == step && *n == sector)
            .count()
    }

    /// Parks every invocation of `step` until [`MockSealer::release`] is called.
    pub fn hold(&self, step: SealStep) {
        self.held.send_modify(|held| {
            held.insert(step);
        });
    }

    pub fn release(&self, step: SealStep) {
        self.held.send_modify(|held| {
            held.remove(&step);
        });
    }

    async fn enter(&self, step: SealStep, sector: SectorId) -> anyhow::Result<()> {
        self.calls.lock().push((step, sector.number));
        self.held
            .subscribe()
            .wait_for(|held| !held.contains(&step))
            .await?;
        let mut failures = self.failures.lock();
        if let Some(left) = failures.get_mut(&step).filter(|left| **left > 0) {
            *left -= 1;
            bail!("injected {step} failure for {sector}");
        }
        debug!(%sector, "mock sealer: {step}");
        Ok(())
    }

    fn commit1_output(sealed: &Cid, ticket: &Randomness, seed: &Randomness) -> Vec<u8> {
        digest(&[b"c1", &sealed.to_bytes(), &ticket.0, &seed.0]).to_vec()
    }

    fn commit2_output(commit1_out: &[u8]) -> Vec<u8> {
        digest(&[b"proof", commit1_out]).to_vec()
    }
}

#[async_trait]
impl Sealer for MockSealer {
    fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    async fn add_piece(
        &self,
        sector: SectorId,
        _existing: &[UnpaddedPieceSize],
        size: UnpaddedPieceSize,
    ) -> anyhow::Result<PieceInfo> {
        self.enter(SealStep::AddPiece, sector).await?;
        size.validate().map_err(anyhow::Error::msg)?;
        let padded = size.padded();
        Ok(PieceInfo {
            size: padded,
            cid: zero_piece_commitment(padded)?,
        })
    }

    async fn seal_pre_commit1(
        &self,
        sector: SectorId,
        ticket: &Randomness,
        pieces: &[PieceInfo],
    ) -> anyhow::Result<Vec<u8>> {
        self.enter(SealStep::PreCommit1, sector).await?;
        let mut deal_pieces = vec![];
        for piece in pieces {
            if piece.cid != zero_piece_commitment(piece.size)? {
                deal_pieces.push(piece.clone());
            }
        }
        let comm_d = mock_data_commitment(self.seal_proof, &deal_pieces)?;
        Ok(fvm_ipld_encoding::to_vec(&(comm_d, ticket.0.clone()))?)
    }

    async fn seal_pre_commit2(
        &self,
        sector: SectorId,
        pre_commit1_out: &[u8],
    ) -> anyhow::Result<SectorCids> {
        self.enter(SealStep::PreCommit2, sector).await?;
        let (unsealed, ticket): (Cid, Vec<u8>) = fvm_ipld_encoding::from_slice(pre_commit1_out)
            .context("malformed pre-commit phase 1 output")?;
        let sealed = replica_commitment_cid(&digest(&[
            b"commr",
            &unsealed.to_bytes(),
            &ticket,
            &sector.number.to_be_bytes(),
        ]))?;
        Ok(SectorCids { unsealed, sealed })
    }

    async fn seal_commit1(
        &self,
        sector: SectorId,
        ticket: &Randomness,
        seed: &Randomness,
        _pieces: &[PieceInfo],
        cids: &SectorCids,
    ) -> anyhow::Result<Vec<u8>> {
        self.enter(SealStep::Commit1, sector).await?;
        Ok(Self::commit1_output(&cids.sealed, ticket, seed))
    }

    async fn seal_commit2(&self, sector: SectorId, commit1_out: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.enter(SealStep::Commit2, sector).await?;
        Ok(Self::commit2_output(commit1_out))
    }

    async fn verify_seal(&self, info: &SealVerifyInfo) -> anyhow::Result<bool> {
        let expected = Self::commit2_output(&Self::commit1_output(
            &info.sealed_cid,
            &info.ticket,
            &info.seed,
        ));
        Ok(expected == info.proof)
    }

    async fn finalize_sector(&self, sector: SectorId) -> anyhow::Result<()> {
        self.enter(SealStep::Finalize, sector).await
    }
}

/// A proof generation observed by [`MockProver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPost {
    pub sectors: Vec<SectorNumber>,
    pub faults: Vec<SectorNumber>,
    pub randomness: Vec<u8>,
}

#[derive(Default)]
pub struct MockProver {
    bad_sectors: Mutex<BTreeSet<SectorNumber>>,
    delays: Mutex<VecDeque<Duration>>,
    generated: Mutex<Vec<GeneratedPost>>,
}

impl MockProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `sector` fail the provability check.
    pub fn break_sector(&self, sector: SectorNumber) {
        self.bad_sectors.lock().insert(sector);
    }

    /// Queues how long the next proof generations take.
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().push_back(delay);
    }

    pub fn generated(&self) -> Vec<GeneratedPost> {
        self.generated.lock().clone()
    }
}

#[async_trait]
impl Prover for MockProver {
    async fn check_provable(
        &self,
        _miner: ActorID,
        sectors: &[SectorInfo],
    ) -> anyhow::Result<Vec<SectorNumber>> {
        let bad = self.bad_sectors.lock();
        Ok(sectors
            .iter()
            .map(|s| s.sector_number)
            .filter(|n| bad.contains(n))
            .collect())
    }

    async fn generate_window_post(
        &self,
        miner: ActorID,
        sectors: &[SectorInfo],
        randomness: &Randomness,
        faults: &[SectorNumber],
        cancel: CancellationToken,
    ) -> Result<Vec<PoStProof>, ProveError> {
        let Some(first) = sectors.first() else {
            return Err(anyhow::anyhow!("no sectors to prove").into());
        };
        let delay = self.delays.lock().pop_front().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProveError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        let post_proof = first
            .proof
            .registered_window_post_proof()
            .map_err(anyhow::Error::msg)?;
        let numbers: Vec<SectorNumber> = sectors.iter().map(|s| s.sector_number).collect();
        self.generated.lock().push(GeneratedPost {
            sectors: numbers.clone(),
            faults: faults.to_vec(),
            randomness: randomness.0.clone(),
        });
        let numbers: Vec<u8> = numbers.iter().flat_map(|n| n.to_be_bytes()).collect();
        Ok(vec![PoStProof {
            post_proof,
            proof_bytes: digest(&[&miner.to_be_bytes(), &randomness.0, &numbers]).to_vec(),
        }])
    }
}
