// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::RawBytes;

use crate::actors::market::MarketDeal;
use crate::actors::miner::{
    DeadlineInfo, Partition, SectorLocation, SectorOnChainInfo, SectorPreCommitOnChainInfo,
};
use crate::shim::{
    MethodNum,
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    error::ExitCode,
    randomness::{DomainSeparationTag, Randomness},
    sector::{RegisteredSealProof, SectorNumber},
};

/// Opaque handle on a tipset. Produced by the gateway and handed back to it, so
/// that a sequence of reads observes one consistent chain position even if the
/// head moves in between.
#[derive(Clone, PartialEq, Eq, Hash, Default, derive_more::From, derive_more::Into)]
pub struct TipsetToken(Vec<u8>);

impl TipsetToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TipsetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(8)];
        write!(f, "TipsetToken({}", hex::encode(shown))?;
        if self.0.len() > shown.len() {
            write!(f, "..")?;
        }
        write!(f, ")")
    }
}

/// A tipset as seen by the miner: where it is and how to refer back to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TipsetRef {
    pub token: TipsetToken,
    pub height: ChainEpoch,
}

impl TipsetRef {
    pub fn new(token: impl Into<TipsetToken>, height: ChainEpoch) -> Self {
        Self {
            token: token.into(),
            height,
        }
    }
}

/// One step on the path from an old head to a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadChange {
    Revert(TipsetRef),
    Apply(TipsetRef),
}

impl HeadChange {
    pub fn tipset(&self) -> &TipsetRef {
        match self {
            HeadChange::Revert(ts) | HeadChange::Apply(ts) => ts,
        }
    }
}

/// Outgoing message, before the node assigns nonce and gas premium.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSpec {
    pub from: Address,
    pub to: Address,
    pub method: MethodNum,
    pub value: TokenAmount,
    pub gas_limit: u64,
    pub params: RawBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub exit_code: ExitCode,
    pub return_data: RawBytes,
    pub gas_used: u64,
}

/// Result of waiting for a message to land on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgLookup {
    pub message: Cid,
    pub receipt: MessageReceipt,
    /// Tipset in which the message was executed.
    pub token: TipsetToken,
    pub height: ChainEpoch,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The node could not be reached or did not answer in time.
    #[error("chain api unavailable: {0}")]
    Unavailable(String),
    #[error("chain api returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Narrow read/write facade over a full node.
///
/// Every state read takes a [`TipsetToken`] obtained from an earlier call, never
/// "the current head".
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn chain_head(&self) -> GatewayResult<TipsetRef>;

    /// Reverts and applies leading from `from` to `to`, in order.
    async fn chain_get_path(
        &self,
        from: &TipsetToken,
        to: &TipsetToken,
    ) -> GatewayResult<Vec<HeadChange>>;

    async fn randomness(
        &self,
        token: &TipsetToken,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> GatewayResult<Randomness>;

    /// Raw state of an actor, as stored at `token`.
    async fn read_actor_state(&self, actor: &Address, token: &TipsetToken)
    -> GatewayResult<Vec<u8>>;

    /// Pushes a message to the node's message pool. Returns the signed message CID.
    async fn send_message(&self, message: MessageSpec) -> GatewayResult<Cid>;

    /// Blocks until `message` is executed and buried under `confidence` tipsets.
    async fn wait_for_message(
        &self,
        message: &Cid,
        confidence: ChainEpoch,
    ) -> GatewayResult<MsgLookup>;

    async fn state_sector_precommit_info(
        &self,
        miner: &Address,
        sector: SectorNumber,
        token: &TipsetToken,
    ) -> GatewayResult<Option<SectorPreCommitOnChainInfo>>;

    async fn state_market_storage_deal(
        &self,
        deal: DealID,
        token: &TipsetToken,
    ) -> GatewayResult<Option<MarketDeal>>;

    /// CommD the miner actor will expect for a sector holding `deals`.
    async fn state_compute_data_commitment(
        &self,
        miner: &Address,
        seal_proof: RegisteredSealProof,
        deals: &[DealID],
        token: &TipsetToken,
    ) -> GatewayResult<Cid>;

    async fn state_miner_proving_deadline(
        &self,
        miner: &Address,
        token: &TipsetToken,
    ) -> GatewayResult<DeadlineInfo>;

    async fn state_miner_partitions(
        &self,
        miner: &Address,
        deadline: u64,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<Partition>>;

    async fn state_miner_sectors(
        &self,
        miner: &Address,
        filter: &BitField,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<SectorOnChainInfo>>;

    async fn state_sector_partition(
        &self,
        miner: &Address,
        sector: SectorNumber,
        token: &TipsetToken,
    ) -> GatewayResult<Option<SectorLocation>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_truncated() {
        let token = TipsetToken::from(vec![0xab; 40]);
        assert_eq!(format!("{token:?}"), "TipsetToken(abababababababab..)");
        let token = TipsetToken::from(vec![1, 2]);
        assert_eq!(format!("{token:?}"), "TipsetToken(0102)");
    }
}
