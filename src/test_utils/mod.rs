// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory chain simulator implementing [`ChainGateway`].
//!
//! Tipsets are produced on demand with [`TestChain::advance`], forks with
//! [`TestChain::revert_to`]. Pushed messages are included in the next tipset
//! and executed against a minimal model of the miner actor, so that the
//! sealing pipeline and the proof scheduler can be driven end to end.

use std::collections::BTreeMap;

use ahash::HashMap;
use anyhow::anyhow;
use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_bitfield::BitField;
use fvm_ipld_encoding::{DAG_CBOR, RawBytes};
use multihash_codetable::{Code, MultihashDigest};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::actors::market::MarketDeal;
use crate::actors::miner::{
    DeadlineInfo, DeclareFaultsParams, Method, Partition, PreCommitSectorParams,
    ProveCommitSectorParams, SectorLocation, SectorOnChainInfo, SectorPreCommitOnChainInfo,
};
use crate::chain::{
    ChainGateway, GatewayError, GatewayResult, HeadChange, MessageReceipt, MessageSpec,
    MsgLookup, TipsetRef, TipsetToken,
};
use crate::networks::Policy;
use crate::sealer::mock::mock_data_commitment;
use crate::shim::{
    MethodNum,
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    error::ExitCode,
    piece::PieceInfo,
    randomness::{DomainSeparationTag, Randomness},
    sector::{RegisteredSealProof, SectorNumber, replica_commitment_cid},
};

pub const TEST_MINER: Address = Address::new_id(1000);
pub const TEST_WORKER: Address = Address::new_id(1001);

/// Miner actor state as tracked by the simulator.
#[derive(Debug, Clone, Default)]
struct MinerModel {
    precommits: BTreeMap<SectorNumber, SectorPreCommitOnChainInfo>,
    sectors: BTreeMap<SectorNumber, SectorOnChainInfo>,
    /// deadline index -> partitions
    deadlines: BTreeMap<u64, Vec<Partition>>,
}

impl MinerModel {
    fn partition_mut(&mut self, deadline: u64, partition: u64) -> &mut Partition {
        let partitions = self.deadlines.entry(deadline).or_default();
        let idx = partition as usize;
        if partitions.len() <= idx {
            partitions.resize_with(idx + 1, Partition::default);
        }
        &mut partitions[idx]
    }
}

#[derive(Debug, Clone)]
struct Block {
    token: TipsetToken,
    height: ChainEpoch,
    parent: Option<TipsetToken>,
    actors: HashMap<Address, Vec<u8>>,
    miner: MinerModel,
    /// Messages executed in this tipset.
    included: Vec<Cid>,
}

/// A message pushed to the simulator's pool.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub cid: Cid,
    pub spec: MessageSpec,
    pub exit_code: ExitCode,
}

#[derive(Default)]
struct State {
    blocks: HashMap<TipsetToken, Block>,
    canonical: Vec<TipsetToken>,
    fork_nonce: u64,
    sent: Vec<SentMessage>,
    scripted_exits: HashMap<MethodNum, Vec<ExitCode>>,
    staged_actors: HashMap<Address, Vec<u8>>,
    deals: HashMap<DealID, MarketDeal>,
    proving_period_offset: ChainEpoch,
    unavailable: bool,
}

impl State {
    fn head(&self) -> &Block {
        let token = self.canonical.last().expect("chain always holds genesis");
        &self.blocks[token]
    }

    fn block(&self, token: &TipsetToken) -> GatewayResult<&Block> {
        self.blocks
            .get(token)
            .ok_or_else(|| GatewayError::InvalidResponse(format!("unknown tipset {token:?}")))
    }

    fn canonical_includes(&self, cid: &Cid) -> Option<&Block> {
        self.canonical
            .iter()
            .map(|t| &self.blocks[t])
            .find(|b| b.included.contains(cid))
    }

    /// Ancestor of `token` at or below `height`.
    fn ancestor(&self, token: &TipsetToken, height: ChainEpoch) -> GatewayResult<&Block> {
        let mut block = self.block(token)?;
        while block.height > height {
            match &block.parent {
                Some(parent) => block = self.block(parent)?,
                None => break,
            }
        }
        Ok(block)
    }

    fn check_available(&self) -> GatewayResult<()> {
        if self.unavailable {
            return Err(GatewayError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

pub struct TestChain {
    state: Mutex<State>,
    advanced: Notify,
    policy: Policy,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChain {
    /// A chain holding only a genesis tipset at height 0.
    pub fn new() -> Self {
        Self::with_policy(Policy::devnet())
    }

    pub fn with_policy(policy: Policy) -> Self {
        let mut state = State::default();
        let genesis = Block {
            token: make_token(0, 0),
            height: 0,
            parent: None,
            actors: Default::default(),
            miner: Default::default(),
            included: vec![],
        };
        state.canonical.push(genesis.token.clone());
        state.blocks.insert(genesis.token.clone(), genesis);
        Self {
            state: Mutex::new(state),
            advanced: Notify::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn head(&self) -> TipsetRef {
        let state = self.state.lock();
        let head = state.head();
        TipsetRef::new(head.token.clone(), head.height)
    }

    /// Mines `n` tipsets on top of the head, executing pending messages in the first.
    pub fn advance(&self, n: usize) -> Vec<HeadChange> {
        let mut changes = vec![];
        {
            let mut state = self.state.lock();
            for _ in 0..n {
                let parent = state.head().clone();
                let height = parent.height + 1;
                let mut block = Block {
                    token: make_token(height, state.fork_nonce),
                    height,
                    parent: Some(parent.token.clone()),
                    actors: parent.actors.clone(),
                    miner: parent.miner.clone(),
                    included: vec![],
                };
                block.actors.extend(std::mem::take(&mut state.staged_actors));
                let pending: Vec<SentMessage> = state
                    .sent
                    .iter()
                    .filter(|m| state.canonical_includes(&m.cid).is_none())
                    .cloned()
                    .collect();
                for message in pending {
                    execute(&mut block, &message);
                    block.included.push(message.cid);
                }
                changes.push(HeadChange::Apply(TipsetRef::new(block.token.clone(), height)));
                state.canonical.push(block.token.clone());
                state.blocks.insert(block.token.clone(), block);
            }
        }
        self.advanced.notify_waiters();
        changes
    }

    /// Drops every tipset above `height` from the canonical chain. Messages they
    /// included return to the pool; the next tipsets are minted on a fresh fork.
    pub fn revert_to(&self, height: ChainEpoch) -> Vec<HeadChange> {
        let mut state = self.state.lock();
        let mut changes = vec![];
        while state.head().height > height && state.canonical.len() > 1 {
            let head = state.head();
            changes.push(HeadChange::Revert(TipsetRef::new(
                head.token.clone(),
                head.height,
            )));
            state.canonical.pop();
        }
        state.fork_nonce += 1;
        changes
    }

    /// Replaces an actor's raw state from the next tipset on.
    pub fn set_actor_state(&self, actor: Address, state: Vec<u8>) {
        self.state.lock().staged_actors.insert(actor, state);
    }

    pub fn add_deal(&self, id: DealID, deal: MarketDeal) {
        self.state.lock().deals.insert(id, deal);
    }

    pub fn set_proving_period_offset(&self, offset: ChainEpoch) {
        self.state.lock().proving_period_offset = offset;
    }

    /// Makes gateway calls fail with [`GatewayError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// The next message sent to `method` executes with `exit_code`.
    pub fn fail_next(&self, method: Method, exit_code: ExitCode) {
        self.state
            .lock()
            .scripted_exits
            .entry(method.number())
            .or_default()
            .push(exit_code);
    }

    /// Places a proven sector in the head tipset's proving schedule.
    pub fn add_proving_sector(
        &self,
        deadline: u64,
        partition: u64,
        number: SectorNumber,
        faulty: bool,
    ) {
        let mut state = self.state.lock();
        let token = state.head().token.clone();
        let Some(head) = state.blocks.get_mut(&token) else {
            return;
        };
        let sealed_cid = replica_commitment_cid(&[number as u8; 32]).expect("valid digest size");
        head.miner.sectors.insert(
            number,
            SectorOnChainInfo {
                sector_number: number,
                seal_proof: RegisteredSealProof::StackedDRG2KiBV1P1,
                sealed_cid,
                activation: head.height,
                expiration: head.height + 1_000_000,
            },
        );
        let part = head.miner.partition_mut(deadline, partition);
        part.all_sectors.set(number);
        if faulty {
            part.faulty_sectors.set(number);
        } else {
            part.active_sectors.set(number);
        }
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.state.lock().sent.clone()
    }

    pub fn messages_to(&self, method: Method) -> Vec<SentMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.spec.method == method.number())
            .collect()
    }

    /// Height of the canonical tipset that executed `cid`.
    pub fn inclusion_height(&self, cid: &Cid) -> Option<ChainEpoch> {
        self.state.lock().canonical_includes(cid).map(|b| b.height)
    }

    pub fn is_faulty(&self, deadline: u64, partition: u64, sector: SectorNumber) -> bool {
        let state = self.state.lock();
        state
            .head()
            .miner
            .deadlines
            .get(&deadline)
            .and_then(|parts| parts.get(partition as usize))
            .is_some_and(|p| p.faulty_sectors.get(sector))
    }
}

fn make_token(height: ChainEpoch, fork: u64) -> TipsetToken {
    let mut bytes = height.to_be_bytes().to_vec();
    bytes.extend_from_slice(&fork.to_be_bytes());
    TipsetToken::from(bytes)
}

fn execute(block: &mut Block, message: &SentMessage) {
    if !message.exit_code.is_success() {
        return;
    }
    let params = &message.spec.params;
    match num_traits::FromPrimitive::from_u64(message.spec.method) {
        Some(Method::PreCommitSector) => {
            if let Ok(info) = params.deserialize::<PreCommitSectorParams>() {
                block.miner.precommits.insert(
                    info.sector_number,
                    SectorPreCommitOnChainInfo {
                        info,
                        pre_commit_deposit: TokenAmount::default(),
                        pre_commit_epoch: block.height,
                    },
                );
            }
        }
        Some(Method::ProveCommitSector) => {
            if let Ok(p) = params.deserialize::<ProveCommitSectorParams>() {
                if let Some(pc) = block.miner.precommits.remove(&p.sector_number) {
                    block.miner.sectors.insert(
                        p.sector_number,
                        SectorOnChainInfo {
                            sector_number: p.sector_number,
                            seal_proof: pc.info.seal_proof,
                            sealed_cid: pc.info.sealed_cid,
                            activation: block.height,
                            expiration: pc.info.expiration,
                        },
                    );
                    let deadline = p.sector_number % 48;
                    let part = block.miner.partition_mut(deadline, 0);
                    part.all_sectors.set(p.sector_number);
                    part.active_sectors.set(p.sector_number);
                }
            }
        }
        Some(Method::DeclareFaults) => {
            if let Ok(p) = params.deserialize::<DeclareFaultsParams>() {
                for decl in p.faults {
                    let part = block.miner.partition_mut(decl.deadline, decl.partition);
                    part.faulty_sectors = &part.faulty_sectors | &decl.sectors;
                    part.active_sectors = &part.active_sectors - &decl.sectors;
                }
            }
        }
        _ => {}
    }
}

fn randomness_digest(
    tag: DomainSeparationTag,
    token: &TipsetToken,
    epoch: ChainEpoch,
    entropy: &[u8],
) -> Randomness {
    let mut buf = (tag as i64).to_be_bytes().to_vec();
    buf.extend_from_slice(token.as_bytes());
    buf.extend_from_slice(&epoch.to_be_bytes());
    buf.extend_from_slice(entropy);
    let hash = Code::Blake2b256.digest(&buf);
    Randomness(hash.digest().to_vec())
}

#[async_trait]
impl ChainGateway for TestChain {
    async fn chain_head(&self) -> GatewayResult<TipsetRef> {
        let state = self.state.lock();
        state.check_available()?;
        let head = state.head();
        Ok(TipsetRef::new(head.token.clone(), head.height))
    }

    async fn chain_get_path(
        &self,
        from: &TipsetToken,
        to: &TipsetToken,
    ) -> GatewayResult<Vec<HeadChange>> {
        let state = self.state.lock();
        state.check_available()?;
        let mut left = state.block(from)?;
        let mut right = state.block(to)?;
        let mut reverts = vec![];
        let mut applies = vec![];
        while left.token != right.token {
            if left.height >= right.height {
                reverts.push(HeadChange::Revert(TipsetRef::new(
                    left.token.clone(),
                    left.height,
                )));
                let parent = left.parent.as_ref().ok_or_else(|| {
                    GatewayError::InvalidResponse("tipsets share no ancestor".into())
                })?;
                left = state.block(parent)?;
            } else {
                applies.push(HeadChange::Apply(TipsetRef::new(
                    right.token.clone(),
                    right.height,
                )));
                let parent = right.parent.as_ref().ok_or_else(|| {
                    GatewayError::InvalidResponse("tipsets share no ancestor".into())
                })?;
                right = state.block(parent)?;
            }
        }
        applies.reverse();
        reverts.extend(applies);
        Ok(reverts)
    }

    async fn randomness(
        &self,
        token: &TipsetToken,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> GatewayResult<Randomness> {
        let state = self.state.lock();
        state.check_available()?;
        let block = state.block(token)?;
        if epoch > block.height {
            return Err(anyhow!(
                "cannot draw randomness from future epoch {epoch} at height {}",
                block.height
            )
            .into());
        }
        let source = state.ancestor(token, epoch)?;
        Ok(randomness_digest(tag, &source.token, epoch, entropy))
    }

    async fn read_actor_state(
        &self,
        actor: &Address,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<u8>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .block(token)?
            .actors
            .get(actor)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, message: MessageSpec) -> GatewayResult<Cid> {
        let mut state = self.state.lock();
        state.check_available()?;
        let nonce = state.sent.len() as u64;
        let encoded = fvm_ipld_encoding::to_vec(&(
            message.from,
            message.to,
            nonce,
            message.method,
            RawBytes::clone(&message.params),
        ))
        .map_err(anyhow::Error::from)?;
        let cid = Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&encoded));
        let exit_code = state
            .scripted_exits
            .get_mut(&message.method)
            .and_then(|codes| (!codes.is_empty()).then(|| codes.remove(0)))
            .unwrap_or(ExitCode::OK);
        state.sent.push(SentMessage {
            cid,
            spec: message,
            exit_code,
        });
        Ok(cid)
    }

    async fn wait_for_message(
        &self,
        message: &Cid,
        confidence: ChainEpoch,
    ) -> GatewayResult<MsgLookup> {
        loop {
            let notified = self.advanced.notified();
            {
                let state = self.state.lock();
                let sent = state
                    .sent
                    .iter()
                    .find(|m| &m.cid == message)
                    .ok_or_else(|| anyhow!("message {message} was never pushed"))?;
                if let Some(block) = state.canonical_includes(message) {
                    if state.head().height >= block.height + confidence {
                        return Ok(MsgLookup {
                            message: *message,
                            receipt: MessageReceipt {
                                exit_code: sent.exit_code,
                                return_data: RawBytes::default(),
                                gas_used: 1_000,
                            },
                            token: block.token.clone(),
                            height: block.height,
                        });
                    }
                }
            }
            notified.await;
        }
    }

    async fn state_sector_precommit_info(
        &self,
        _miner: &Address,
        sector: SectorNumber,
        token: &TipsetToken,
    ) -> GatewayResult<Option<SectorPreCommitOnChainInfo>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.block(token)?.miner.precommits.get(&sector).cloned())
    }

    async fn state_market_storage_deal(
        &self,
        deal: DealID,
        _token: &TipsetToken,
    ) -> GatewayResult<Option<MarketDeal>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.deals.get(&deal).cloned())
    }

    async fn state_compute_data_commitment(
        &self,
        _miner: &Address,
        seal_proof: RegisteredSealProof,
        deals: &[DealID],
        _token: &TipsetToken,
    ) -> GatewayResult<Cid> {
        let state = self.state.lock();
        state.check_available()?;
        let mut pieces = vec![];
        for id in deals {
            let deal = state
                .deals
                .get(id)
                .ok_or_else(|| anyhow!("deal {id} not found"))?;
            pieces.push(PieceInfo {
                size: deal.proposal.piece_size,
                cid: deal.proposal.piece_cid,
            });
        }
        Ok(mock_data_commitment(seal_proof, &pieces)?)
    }

    async fn state_miner_proving_deadline(
        &self,
        _miner: &Address,
        token: &TipsetToken,
    ) -> GatewayResult<DeadlineInfo> {
        let state = self.state.lock();
        state.check_available()?;
        let height = state.block(token)?.height;
        Ok(DeadlineInfo::current(
            state.proving_period_offset,
            height,
            &self.policy,
        ))
    }

    async fn state_miner_partitions(
        &self,
        _miner: &Address,
        deadline: u64,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<Partition>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .block(token)?
            .miner
            .deadlines
            .get(&deadline)
            .cloned()
            .unwrap_or_default())
    }

    async fn state_miner_sectors(
        &self,
        _miner: &Address,
        filter: &BitField,
        token: &TipsetToken,
    ) -> GatewayResult<Vec<SectorOnChainInfo>> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .block(token)?
            .miner
            .sectors
            .values()
            .filter(|s| filter.get(s.sector_number))
            .cloned()
            .collect())
    }

    async fn state_sector_partition(
        &self,
        _miner: &Address,
        sector: SectorNumber,
        token: &TipsetToken,
    ) -> GatewayResult<Option<SectorLocation>> {
        let state = self.state.lock();
        state.check_available()?;
        let block = state.block(token)?;
        for (deadline, partitions) in &block.miner.deadlines {
            for (idx, partition) in partitions.iter().enumerate() {
                if partition.all_sectors.get(sector) {
                    return Ok(Some(SectorLocation {
                        deadline: *deadline,
                        partition: idx as u64,
                    }));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reverted_messages_return_to_the_pool() {
        let chain = TestChain::new();
        chain.advance(2);
        let cid = chain
            .send_message(MessageSpec {
                from: TEST_WORKER,
                to: TEST_MINER,
                method: Method::DeclareFaults.number(),
                value: TokenAmount::default(),
                gas_limit: 0,
                params: RawBytes::default(),
            })
            .await
            .unwrap();
        chain.advance(1);
        assert_eq!(chain.inclusion_height(&cid), Some(3));
        chain.revert_to(2);
        assert_eq!(chain.inclusion_height(&cid), None);
        chain.advance(2);
        assert_eq!(chain.inclusion_height(&cid), Some(3));
        let lookup = chain.wait_for_message(&cid, 1).await.unwrap();
        assert_eq!(lookup.height, 3);
        assert!(lookup.receipt.exit_code.is_success());
    }

    #[tokio::test]
    async fn randomness_depends_on_fork() {
        let chain = TestChain::new();
        chain.advance(5);
        let a = chain.head();
        let ra = chain
            .randomness(&a.token, DomainSeparationTag::SealRandomness, 4, b"x")
            .await
            .unwrap();
        chain.revert_to(3);
        chain.advance(2);
        let b = chain.head();
        let rb = chain
            .randomness(&b.token, DomainSeparationTag::SealRandomness, 4, b"x")
            .await
            .unwrap();
        assert_ne!(ra, rb);
        // below the fork point both branches agree
        let ra = chain
            .randomness(&a.token, DomainSeparationTag::SealRandomness, 2, b"x")
            .await
            .unwrap();
        let rb = chain
            .randomness(&b.token, DomainSeparationTag::SealRandomness, 2, b"x")
            .await
            .unwrap();
        assert_eq!(ra, rb);
    }
}
