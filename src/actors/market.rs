// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;

use crate::shim::{address::Address, clock::ChainEpoch, piece::PaddedPieceSize};

/// Storage deal proposal as published by the market actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealProposal {
    pub piece_cid: Cid,
    pub piece_size: PaddedPieceSize,
    pub client: Address,
    pub provider: Address,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DealState {
    /// -1 if not yet included in proven sector
    pub sector_start_epoch: ChainEpoch,
    /// -1 if deal state never updated
    pub last_updated_epoch: ChainEpoch,
    /// -1 if deal never slashed
    pub slash_epoch: ChainEpoch,
}

impl Default for DealState {
    fn default() -> Self {
        Self {
            sector_start_epoch: -1,
            last_updated_epoch: -1,
            slash_epoch: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDeal {
    pub proposal: DealProposal,
    pub state: DealState,
}
