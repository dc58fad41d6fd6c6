// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use jsonrpsee::core::ClientError;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use super::types::{
    ActorLotusJson, DeadlineInfoLotusJson, HeadChangeLotusJson, MarketDealLotusJson,
    MessageLotusJson, MsgLookupLotusJson, PartitionLotusJson, SectorLocationLotusJson,
    SectorOnChainInfoLotusJson, SectorPreCommitOnChainInfoLotusJson, SignedMessageLotusJson,
    TipsetLotusJson, decode_token, encode_token,
};
use super::{ApiConfig, ApiInfo, Client, Params};
use crate::actors::market::MarketDeal;
use crate::actors::miner::{
    DeadlineInfo, Partition, SectorLocation, SectorOnChainInfo, SectorPreCommitOnChainInfo,
};
use crate::chain::{
    ChainGateway, GatewayError, GatewayResult, HeadChange, MessageSpec, MsgLookup, TipsetRef,
    TipsetToken,
};
use crate::lotus_json::LotusJson;
use crate::shim::{
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    randomness::{DomainSeparationTag, Randomness, RandomnessSource},
    sector::{RegisteredSealProof, SectorNumber},
};

const CHAIN_HEAD: &str = "Filecoin.ChainHead";
const CHAIN_GET_PATH: &str = "Filecoin.ChainGetPath";
const CHAIN_READ_OBJ: &str = "Filecoin.ChainReadObj";
const MPOOL_PUSH_MESSAGE: &str = "Filecoin.MpoolPushMessage";
const STATE_GET_ACTOR: &str = "Filecoin.StateGetActor";
const STATE_GET_RANDOMNESS_FROM_TICKETS: &str = "Filecoin.StateGetRandomnessFromTickets";
const STATE_GET_RANDOMNESS_FROM_BEACON: &str = "Filecoin.StateGetRandomnessFromBeacon";
const STATE_WAIT_MSG: &str = "Filecoin.StateWaitMsg";
const STATE_SECTOR_PRECOMMIT_INFO: &str = "Filecoin.StateSectorPreCommitInfo";
const STATE_MARKET_STORAGE_DEAL: &str = "Filecoin.StateMarketStorageDeal";
const STATE_COMPUTE_DATA_CID: &str = "Filecoin.StateComputeDataCID";
const STATE_MINER_PROVING_DEADLINE: &str = "Filecoin.StateMinerProvingDeadline";
const STATE_MINER_PARTITIONS: &str = "Filecoin.StateMinerPartitions";
const STATE_MINER_SECTORS: &str = "Filecoin.StateMinerSectors";
const STATE_SECTOR_PARTITION: &str = "Filecoin.StateSectorPartition";

/// Search the whole chain when waiting for a message.
const LOOKBACK_NO_LIMIT: ChainEpoch = -1;

/// [`ChainGateway`] backed by a Lotus-API compatible full node.
pub struct LotusGateway {
    client: Client,
    /// Separate connection for calls that block until the chain moves.
    waiter: Client,
}

impl LotusGateway {
    /// Connects to the node in `FULLNODE_API_INFO`, or the configured one.
    pub async fn connect(config: &ApiConfig) -> anyhow::Result<Self> {
        let info = ApiInfo::from_env_or(config.info.clone())?;
        let client = Client::from_api_info(&info, config.request_timeout).await?;
        let waiter = Client::from_api_info(&info, config.wait_timeout).await?;
        info!(url = %client.url(), "connected to full node");
        Ok(Self { client, waiter })
    }

    async fn request<R: DeserializeOwned>(
        client: &Client,
        method: &'static str,
        params: impl Serialize,
    ) -> GatewayResult<R> {
        let params = Params::new(params).map_err(|e| gateway_error(method, e))?;
        client
            .call(method, params)
            .await
            .map_err(|e| gateway_error(method, e))
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: impl Serialize,
    ) -> GatewayResult<R> {
        Self::request(&self.client, method, params).await
    }

    /// Like [`Self::call`], but a "not found" answer from the node is `None`.
    async fn call_opt<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: impl Serialize,
    ) -> GatewayResult<Option<R>> {
        let params = Params::new(params).map_err(|e| gateway_error(method, e))?;
        match self.client.call::<Option<R>>(method, params).await {
            Ok(it) => Ok(it),
            Err(ClientError::Call(e)) if is_not_found(e.message()) => {
                debug!(method, "{}", e.message());
                Ok(None)
            }
            Err(e) => Err(gateway_error(method, e)),
        }
    }
}

fn tipset_key(token: &TipsetToken) -> GatewayResult<LotusJson<Vec<Cid>>> {
    decode_token(token)
        .map(LotusJson)
        .map_err(|e| GatewayError::InvalidResponse(format!("malformed tipset token: {e}")))
}

fn is_not_found(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("not found") || message.contains("does not exist")
}

fn gateway_error(method: &str, e: ClientError) -> GatewayError {
    match e {
        ClientError::Transport(_) | ClientError::RestartNeeded(_) | ClientError::RequestTimeout => {
            GatewayError::Unavailable(format!("{method}: {e}"))
        }
        ClientError::ParseError(e) => GatewayError::InvalidResponse(format!("{method}: {e}")),
        ClientError::Call(e) => {
            GatewayError::Other(anyhow::anyhow!("{method} failed: {}", e.message()))
        }
        other => GatewayError::Other(anyhow::anyhow!("{method}: {other}")),
    }
}

fn invalid(e: anyhow::Error) -> GatewayError {
    GatewayError::InvalidResponse(format!("{e:#}"))
}

#[async_trait]
impl ChainGateway for LotusGateway {
    async fn chain_head(&self) -> GatewayResult<TipsetRef> {
        let head: TipsetLotusJson = self.call(CHAIN_HEAD, ()).await?;
        head.into_ref().map_err(invalid)
    }

    async fn chain_get_path(
        &self,
        from: &TipsetToken,
        to: &TipsetToken,
    ) -> GatewayResult<Vec<HeadChange>> {
        let path: Option<Vec<HeadChangeLotusJson>> = self
            .call(CHAIN_GET_PATH, (tipset_key(from)?, tipset_key(to)?))
            .await?;
        path.unwrap_or_default()
            .into_iter()
            .map(|change| change.into_head_change().map_err(invalid))
            .collect()
    }

    async fn randomness(
        &self,
        token: &TipsetToken,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> GatewayResult<Randomness> {
        let method = match tag.source() {
            RandomnessSource::Tickets => STATE_GET_RANDOMNESS_FROM_TICKETS,
            RandomnessSource::Beacon => STATE_GET_RANDOMNESS_FROM_BEACON,
        };
        let LotusJson(bytes): LotusJson<Vec<u8>> = self
            .call(
                method,
                (
                    tag as i64,
                    epoch,
                    LotusJson(entropy.to_vec()),
                    tipset_key(token)?,
                ),
            )
            .await?;
        Ok(Randomness(bytes))
    }

    async fn read_actor_state(
        &self,
        actor: &Address,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<u8>> {
        let Some(state) = self
            .call_opt::<ActorLotusJson>(STATE_GET_ACTOR, (LotusJson(*actor), tipset_key(token)?))
            .await?
        else {
            return Ok(vec![]);
        };
        let LotusJson(bytes): LotusJson<Vec<u8>> =
            self.call(CHAIN_READ_OBJ, (LotusJson(state.head),)).await?;
        Ok(bytes)
    }

    async fn send_message(&self, message: MessageSpec) -> GatewayResult<Cid> {
        let method = message.method;
        let signed: SignedMessageLotusJson = self
            .call(
                MPOOL_PUSH_MESSAGE,
                (MessageLotusJson::from(message), serde_json::Value::Null),
            )
            .await?;
        debug!(cid = %signed.cid, method, "message pushed");
        Ok(signed.cid)
    }

    async fn wait_for_message(
        &self,
        message: &Cid,
        confidence: ChainEpoch,
    ) -> GatewayResult<MsgLookup> {
        let lookup: MsgLookupLotusJson = Self::request(
            &self.waiter,
            STATE_WAIT_MSG,
            (LotusJson(*message), confidence, LOOKBACK_NO_LIMIT, true),
        )
        .await?;
        Ok(MsgLookup {
            message: lookup.message,
            receipt: lookup.receipt.into(),
            token: encode_token(&lookup.tipset).map_err(invalid)?,
            height: lookup.height,
        })
    }

    async fn state_sector_precommit_info(
        &self,
        miner: &Address,
        sector: SectorNumber,
        token: &TipsetToken,
    ) -> GatewayResult<Option<SectorPreCommitOnChainInfo>> {
        let info: Option<SectorPreCommitOnChainInfoLotusJson> = self
            .call_opt(
                STATE_SECTOR_PRECOMMIT_INFO,
                (LotusJson(*miner), sector, tipset_key(token)?),
            )
            .await?;
        Ok(info.map(Into::into))
    }

    async fn state_market_storage_deal(
        &self,
        deal: DealID,
        token: &TipsetToken,
    ) -> GatewayResult<Option<MarketDeal>> {
        let deal: Option<MarketDealLotusJson> = self
            .call_opt(STATE_MARKET_STORAGE_DEAL, (deal, tipset_key(token)?))
            .await?;
        Ok(deal.map(Into::into))
    }

    async fn state_compute_data_commitment(
        &self,
        miner: &Address,
        seal_proof: RegisteredSealProof,
        deals: &[DealID],
        token: &TipsetToken,
    ) -> GatewayResult<Cid> {
        let LotusJson(cid): LotusJson<Cid> = self
            .call(
                STATE_COMPUTE_DATA_CID,
                (
                    LotusJson(*miner),
                    seal_proof,
                    LotusJson(deals.to_vec()),
                    tipset_key(token)?,
                ),
            )
            .await?;
        Ok(cid)
    }

    async fn state_miner_proving_deadline(
        &self,
        miner: &Address,
        token: &TipsetToken,
    ) -> GatewayResult<DeadlineInfo> {
        let di: DeadlineInfoLotusJson = self
            .call(
                STATE_MINER_PROVING_DEADLINE,
                (LotusJson(*miner), tipset_key(token)?),
            )
            .await?;
        Ok(di.into())
    }

    async fn state_miner_partitions(
        &self,
        miner: &Address,
        deadline: u64,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<Partition>> {
        let partitions: Option<Vec<PartitionLotusJson>> = self
            .call(
                STATE_MINER_PARTITIONS,
                (LotusJson(*miner), deadline, tipset_key(token)?),
            )
            .await?;
        Ok(partitions
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn state_miner_sectors(
        &self,
        miner: &Address,
        filter: &BitField,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<SectorOnChainInfo>> {
        let sectors: Option<Vec<SectorOnChainInfoLotusJson>> = self
            .call(
                STATE_MINER_SECTORS,
                (LotusJson(*miner), LotusJson(filter.clone()), tipset_key(token)?),
            )
            .await?;
        Ok(sectors
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn state_sector_partition(
        &self,
        miner: &Address,
        sector: SectorNumber,
        token: &TipsetToken,
    ) -> GatewayResult<Option<SectorLocation>> {
        let location: Option<SectorLocationLotusJson> = self
            .call_opt(
                STATE_SECTOR_PARTITION,
                (LotusJson(*miner), sector, tipset_key(token)?),
            )
            .await?;
        Ok(location.map(Into::into))
    }
}
