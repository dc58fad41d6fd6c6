// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use cid::multihash::Multihash;
use fvm_shared4::commcid::{
    FIL_COMMITMENT_SEALED, FIL_COMMITMENT_UNSEALED, POSEIDON_BLS12_381_A1_FC1,
    SHA2_256_TRUNC254_PADDED,
};
use serde::{Deserialize, Serialize};

use super::ActorID;
use super::piece::{PaddedPieceSize, UnpaddedPieceSize};

pub use fvm_shared4::sector::{PoStProof, RegisteredSealProof, SectorInfo, SectorNumber, SectorSize};

/// A sector as addressed by the sealing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorId {
    pub miner: ActorID,
    pub number: SectorNumber,
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

/// Number of user bytes that fit in a sector once Fr32 padding is applied.
pub fn unpadded_capacity(size: SectorSize) -> UnpaddedPieceSize {
    PaddedPieceSize(size as u64).unpadded()
}

/// Wraps a raw `CommD` into its CID form.
pub fn data_commitment_cid(comm_d: &[u8; 32]) -> anyhow::Result<Cid> {
    let hash = Multihash::wrap(SHA2_256_TRUNC254_PADDED, comm_d)?;
    Ok(Cid::new_v1(FIL_COMMITMENT_UNSEALED, hash))
}

/// Wraps a raw `CommR` into its CID form.
pub fn replica_commitment_cid(comm_r: &[u8; 32]) -> anyhow::Result<Cid> {
    let hash = Multihash::wrap(POSEIDON_BLS12_381_A1_FC1, comm_r)?;
    Ok(Cid::new_v1(FIL_COMMITMENT_SEALED, hash))
}
