// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The subset of the full node's JSON objects the miner reads and writes.

use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::RawBytes;
use serde::{Deserialize, Serialize};

use crate::actors::market::{DealProposal, DealState, MarketDeal};
use crate::actors::miner::{
    DeadlineInfo, Partition, PreCommitSectorParams, SectorLocation, SectorOnChainInfo,
    SectorPreCommitOnChainInfo,
};
use crate::chain::{HeadChange, MessageReceipt, MessageSpec, TipsetRef, TipsetToken};
use crate::shim::{
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    error::ExitCode,
    piece::PaddedPieceSize,
    sector::{RegisteredSealProof, SectorNumber},
};

/// Tipset keys travel between calls as their CBOR encoding.
pub fn encode_token(cids: &[Cid]) -> anyhow::Result<TipsetToken> {
    Ok(fvm_ipld_encoding::to_vec(cids)?.into())
}

pub fn decode_token(token: &TipsetToken) -> anyhow::Result<Vec<Cid>> {
    Ok(fvm_ipld_encoding::from_slice(token.as_bytes())?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TipsetLotusJson {
    #[serde(with = "crate::lotus_json")]
    pub cids: Vec<Cid>,
    pub height: ChainEpoch,
}

impl TipsetLotusJson {
    pub fn into_ref(self) -> anyhow::Result<TipsetRef> {
        Ok(TipsetRef::new(encode_token(&self.cids)?, self.height))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadChangeType {
    Revert,
    Apply,
    Current,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeadChangeLotusJson {
    pub r#type: HeadChangeType,
    pub val: TipsetLotusJson,
}

impl HeadChangeLotusJson {
    pub fn into_head_change(self) -> anyhow::Result<HeadChange> {
        let tipset = self.val.into_ref()?;
        Ok(match self.r#type {
            HeadChangeType::Revert => HeadChange::Revert(tipset),
            HeadChangeType::Apply | HeadChangeType::Current => HeadChange::Apply(tipset),
        })
    }
}

/// Unsigned message as accepted by `MpoolPushMessage`. Nonce, fee cap and
/// premium are left to the node.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageLotusJson {
    pub version: u64,
    #[serde(with = "crate::lotus_json")]
    pub to: Address,
    #[serde(with = "crate::lotus_json")]
    pub from: Address,
    pub nonce: u64,
    #[serde(with = "crate::lotus_json")]
    pub value: TokenAmount,
    pub gas_limit: u64,
    #[serde(with = "crate::lotus_json")]
    pub gas_fee_cap: TokenAmount,
    #[serde(with = "crate::lotus_json")]
    pub gas_premium: TokenAmount,
    pub method: u64,
    #[serde(with = "crate::lotus_json")]
    pub params: RawBytes,
}

impl From<MessageSpec> for MessageLotusJson {
    fn from(spec: MessageSpec) -> Self {
        let MessageSpec {
            from,
            to,
            method,
            value,
            gas_limit,
            params,
        } = spec;
        Self {
            version: 0,
            to,
            from,
            nonce: 0,
            value,
            gas_limit,
            gas_fee_cap: TokenAmount::default(),
            gas_premium: TokenAmount::default(),
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignedMessageLotusJson {
    #[serde(rename = "CID", with = "crate::lotus_json")]
    pub cid: Cid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReceiptLotusJson {
    pub exit_code: u32,
    #[serde(with = "crate::lotus_json", default)]
    pub r#return: RawBytes,
    pub gas_used: u64,
}

impl From<ReceiptLotusJson> for MessageReceipt {
    fn from(receipt: ReceiptLotusJson) -> Self {
        MessageReceipt {
            exit_code: ExitCode::new(receipt.exit_code),
            return_data: receipt.r#return,
            gas_used: receipt.gas_used,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MsgLookupLotusJson {
    #[serde(with = "crate::lotus_json")]
    pub message: Cid,
    pub receipt: ReceiptLotusJson,
    #[serde(rename = "TipSet", with = "crate::lotus_json")]
    pub tipset: Vec<Cid>,
    pub height: ChainEpoch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorLotusJson {
    #[serde(with = "crate::lotus_json")]
    pub head: Cid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorPreCommitInfoLotusJson {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    #[serde(rename = "SealedCID", with = "crate::lotus_json")]
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    #[serde(rename = "DealIDs", with = "crate::lotus_json", default)]
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorPreCommitOnChainInfoLotusJson {
    pub info: SectorPreCommitInfoLotusJson,
    #[serde(with = "crate::lotus_json")]
    pub pre_commit_deposit: TokenAmount,
    pub pre_commit_epoch: ChainEpoch,
}

impl From<SectorPreCommitOnChainInfoLotusJson> for SectorPreCommitOnChainInfo {
    fn from(it: SectorPreCommitOnChainInfoLotusJson) -> Self {
        let SectorPreCommitInfoLotusJson {
            seal_proof,
            sector_number,
            sealed_cid,
            seal_rand_epoch,
            deal_ids,
            expiration,
        } = it.info;
        SectorPreCommitOnChainInfo {
            info: PreCommitSectorParams {
                seal_proof,
                sector_number,
                sealed_cid,
                seal_rand_epoch,
                deal_ids,
                expiration,
                replace_capacity: false,
                replace_sector_deadline: 0,
                replace_sector_partition: 0,
                replace_sector_number: 0,
            },
            pre_commit_deposit: it.pre_commit_deposit,
            pre_commit_epoch: it.pre_commit_epoch,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealProposalLotusJson {
    #[serde(rename = "PieceCID", with = "crate::lotus_json")]
    pub piece_cid: Cid,
    pub piece_size: PaddedPieceSize,
    #[serde(with = "crate::lotus_json")]
    pub client: Address,
    #[serde(with = "crate::lotus_json")]
    pub provider: Address,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealStateLotusJson {
    pub sector_start_epoch: ChainEpoch,
    pub last_updated_epoch: ChainEpoch,
    pub slash_epoch: ChainEpoch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketDealLotusJson {
    pub proposal: DealProposalLotusJson,
    pub state: DealStateLotusJson,
}

impl From<MarketDealLotusJson> for MarketDeal {
    fn from(MarketDealLotusJson { proposal, state }: MarketDealLotusJson) -> Self {
        MarketDeal {
            proposal: DealProposal {
                piece_cid: proposal.piece_cid,
                piece_size: proposal.piece_size,
                client: proposal.client,
                provider: proposal.provider,
                start_epoch: proposal.start_epoch,
                end_epoch: proposal.end_epoch,
            },
            state: DealState {
                sector_start_epoch: state.sector_start_epoch,
                last_updated_epoch: state.last_updated_epoch,
                slash_epoch: state.slash_epoch,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeadlineInfoLotusJson {
    pub current_epoch: ChainEpoch,
    pub period_start: ChainEpoch,
    pub index: u64,
    pub open: ChainEpoch,
    pub close: ChainEpoch,
    pub challenge: ChainEpoch,
    pub fault_cutoff: ChainEpoch,
    #[serde(rename = "WPoStPeriodDeadlines")]
    pub wpost_period_deadlines: u64,
    #[serde(rename = "WPoStProvingPeriod")]
    pub wpost_proving_period: ChainEpoch,
    #[serde(rename = "WPoStChallengeWindow")]
    pub wpost_challenge_window: ChainEpoch,
}

impl From<DeadlineInfoLotusJson> for DeadlineInfo {
    fn from(it: DeadlineInfoLotusJson) -> Self {
        DeadlineInfo {
            current_epoch: it.current_epoch,
            period_start: it.period_start,
            index: it.index,
            open: it.open,
            close: it.close,
            challenge: it.challenge,
            fault_cutoff: it.fault_cutoff,
            wpost_period_deadlines: it.wpost_period_deadlines,
            wpost_proving_period: it.wpost_proving_period,
            wpost_challenge_window: it.wpost_challenge_window,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartitionLotusJson {
    #[serde(with = "crate::lotus_json")]
    pub all_sectors: BitField,
    #[serde(with = "crate::lotus_json")]
    pub faulty_sectors: BitField,
    #[serde(with = "crate::lotus_json")]
    pub recovering_sectors: BitField,
    #[serde(with = "crate::lotus_json")]
    pub active_sectors: BitField,
}

impl From<PartitionLotusJson> for Partition {
    fn from(it: PartitionLotusJson) -> Self {
        Partition {
            all_sectors: it.all_sectors,
            faulty_sectors: it.faulty_sectors,
            recovering_sectors: it.recovering_sectors,
            active_sectors: it.active_sectors,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorOnChainInfoLotusJson {
    pub sector_number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
    #[serde(rename = "SealedCID", with = "crate::lotus_json")]
    pub sealed_cid: Cid,
    pub activation: ChainEpoch,
    pub expiration: ChainEpoch,
}

impl From<SectorOnChainInfoLotusJson> for SectorOnChainInfo {
    fn from(it: SectorOnChainInfoLotusJson) -> Self {
        SectorOnChainInfo {
            sector_number: it.sector_number,
            seal_proof: it.seal_proof,
            sealed_cid: it.sealed_cid,
            activation: it.activation,
            expiration: it.expiration,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorLocationLotusJson {
    pub deadline: u64,
    pub partition: u64,
}

impl From<SectorLocationLotusJson> for SectorLocation {
    fn from(it: SectorLocationLotusJson) -> Self {
        SectorLocation {
            deadline: it.deadline,
            partition: it.partition,
        }
    }
}
