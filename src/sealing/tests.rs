// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;

use super::*;
use crate::actors::market::{DealProposal, DealState, MarketDeal};
use crate::actors::miner::{ConfiguredSectorSize, Method, PreCommitSectorParams};
use crate::chain::{ChainGateway as _, HeadChange};
use crate::sealer::mock::{MockSealer, SealStep};
use crate::sector_store::MemorySectorStore;
use crate::shim::{
    address::Address,
    error::ExitCode,
    piece::{PaddedPieceSize, PieceInfo},
    randomness::DomainSeparationTag,
    sector::{RegisteredSealProof, SectorSize, data_commitment_cid},
};
use crate::test_utils::{TEST_MINER, TEST_WORKER, TestChain};

const DEAL_ID: u64 = 1;
const DEAL_START: ChainEpoch = 1_000_000;
const DEAL_END: ChainEpoch = 1_100_000;

fn deal_piece() -> PieceInfo {
    PieceInfo {
        size: PaddedPieceSize(256 << 10),
        cid: data_commitment_cid(&[7; 32]).unwrap(),
    }
}

fn config() -> SealingConfig {
    SealingConfig {
        api_retry_delay: Duration::from_millis(10),
        failure_retry_delay: Duration::from_millis(10),
        max_failure_retries: 2,
        seed_revert_policy: SeedRevertPolicy::Log,
        min_sector_lifetime: 1_000,
    }
}

fn miner() -> MinerConfig {
    MinerConfig {
        actor: TEST_MINER,
        worker: TEST_WORKER,
        sector_size: ConfiguredSectorSize::_8MiB,
        ..Default::default()
    }
}

struct Harness {
    chain: Arc<TestChain>,
    events: Arc<ChainEvents>,
    sealer: Arc<MockSealer>,
    store: Arc<MemorySectorStore>,
    /// Stops the chain from growing while set.
    paused: Arc<AtomicBool>,
    stop_chain: CancellationToken,
    driver: JoinHandle<()>,
}

impl Harness {
    async fn new() -> Self {
        let chain = Arc::new(TestChain::new());
        chain.add_deal(
            DEAL_ID,
            MarketDeal {
                proposal: DealProposal {
                    piece_cid: deal_piece().cid,
                    piece_size: deal_piece().size,
                    client: Address::new_id(2000),
                    provider: TEST_MINER,
                    start_epoch: DEAL_START,
                    end_epoch: DEAL_END,
                },
                state: DealState::default(),
            },
        );
        chain.advance(5);
        let events = Arc::new(ChainEvents::new(
            chain.clone(),
            chain.policy().chain_finality,
        ));
        events
            .handle_head_change(HeadChange::Apply(chain.head()))
            .await;

        let paused = Arc::new(AtomicBool::new(false));
        let stop_chain = CancellationToken::new();
        let driver = {
            let (chain, events, paused, stop) = (
                chain.clone(),
                events.clone(),
                paused.clone(),
                stop_chain.clone(),
            );
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(2)) => {}
                    }
                    if paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    for change in chain.advance(1) {
                        events.handle_head_change(change).await;
                    }
                }
            })
        };
        Self {
            chain,
            events,
            sealer: Arc::new(MockSealer::new(RegisteredSealProof::StackedDRG8MiBV1P1).unwrap()),
            store: Arc::new(MemorySectorStore::default()),
            paused,
            stop_chain,
            driver,
        }
    }

    fn sealing(&self, shutdown: CancellationToken) -> Sealing {
        self.sealing_with(config(), shutdown)
    }

    fn sealing_with(&self, config: SealingConfig, shutdown: CancellationToken) -> Sealing {
        Sealing::new(
            self.chain.clone(),
            self.events.clone(),
            self.sealer.clone(),
            self.store.clone(),
            miner(),
            self.chain.policy().clone(),
            config,
            shutdown,
        )
        .unwrap()
    }

    /// Stalls the chain and feeds the reverts down to `height` straight to the events.
    async fn revert_to(&self, height: ChainEpoch) {
        self.pause(true);
        // let an in-flight tipset land first
        tokio::time::sleep(Duration::from_millis(20)).await;
        for change in self.chain.revert_to(height) {
            self.events.handle_head_change(change).await;
        }
    }

    fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    async fn stop(self) {
        self.stop_chain.cancel();
        self.driver.await.unwrap();
    }
}

fn deal_sector_pieces() -> Vec<Piece> {
    vec![Piece {
        piece: deal_piece(),
        deal: Some(DealInfo {
            deal_id: DEAL_ID,
            start_epoch: DEAL_START,
            end_epoch: DEAL_END,
        }),
    }]
}

async fn wait_until(
    sealing: &Sealing,
    number: SectorNumber,
    done: impl Fn(&SectorInfo) -> bool,
) -> SectorInfo {
    let poll = async {
        loop {
            if let Some(info) = sealing.sector_info(number).unwrap() {
                if done(&info) {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    match tokio::time::timeout(Duration::from_secs(20), poll).await {
        Ok(info) => info,
        Err(_) => panic!(
            "sector {number} stuck: {:#?}",
            sealing.sector_info(number).unwrap()
        ),
    }
}

async fn wait_for_state(sealing: &Sealing, number: SectorNumber, state: SectorState) -> SectorInfo {
    wait_until(sealing, number, |info| info.state == state).await
}

#[tokio::test]
async fn deal_sector_reaches_proving() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());

    let number = sealing.start_sector(deal_sector_pieces()).unwrap();
    let info = wait_for_state(&sealing, number, SectorState::Proving).await;

    // packed to exactly the sector's capacity, the deal piece first
    let used: u64 = info.unpadded_sizes().iter().map(|s| s.0).sum();
    assert_eq!(used, unpadded_capacity(SectorSize::_8MiB).0);
    assert_eq!(info.pieces[0].piece, deal_piece());
    assert!(info.pieces[1..].iter().all(|p| p.deal.is_none()));

    let pre_commits = h.chain.messages_to(Method::PreCommitSector);
    let commits = h.chain.messages_to(Method::ProveCommitSector);
    assert_eq!(pre_commits.len(), 1);
    assert_eq!(commits.len(), 1);
    assert_eq!(Some(pre_commits[0].cid), info.pre_commit_message);
    assert_eq!(Some(commits[0].cid), info.commit_message);

    let pre_commit_epoch = h.chain.inclusion_height(&pre_commits[0].cid).unwrap();
    assert_eq!(
        info.seed_epoch,
        Some(pre_commit_epoch + h.chain.policy().pre_commit_challenge_delay)
    );
    let params: PreCommitSectorParams = pre_commits[0].spec.params.deserialize().unwrap();
    assert_eq!(params.deal_ids, vec![DEAL_ID]);
    assert_eq!(params.expiration, DEAL_END);
    assert_eq!(params.sealed_cid, info.comm_r.unwrap());

    assert_eq!(info.last_error, None);
    assert_eq!(info.log.last().unwrap().kind, "Finalized");
    assert_eq!(h.sealer.call_count(SealStep::Finalize, number), 1);
    h.stop().await;
}

#[tokio::test]
async fn pledge_sector_is_a_single_filler() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());

    let number = sealing.pledge_sector().unwrap();
    let info = wait_for_state(&sealing, number, SectorState::Proving).await;
    assert_eq!(info.pieces.len(), 1);
    assert_eq!(info.pieces[0].piece.size, PaddedPieceSize(8 << 20));
    assert!(info.deal_ids().is_empty());

    let listed = sealing.list_sectors(Some(SectorState::Proving)).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(sealing.list_sectors(Some(SectorState::Packing)).unwrap().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn failed_pre_commit_is_not_retried() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());
    h.chain
        .fail_next(Method::PreCommitSector, ExitCode::USR_ILLEGAL_ARGUMENT);

    let number = sealing.pledge_sector().unwrap();
    let info = wait_for_state(&sealing, number, SectorState::ChainPreCommitFailed).await;
    assert_eq!(info.last_exit_code, Some(ExitCode::USR_ILLEGAL_ARGUMENT));
    assert!(info.last_error.unwrap().contains("exit code"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let info = sealing.sector_info(number).unwrap().unwrap();
    assert_eq!(info.state, SectorState::ChainPreCommitFailed);
    assert_eq!(h.chain.messages_to(Method::PreCommitSector).len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn force_state_recovers_a_failed_pre_commit() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());
    h.chain
        .fail_next(Method::PreCommitSector, ExitCode::USR_ILLEGAL_ARGUMENT);

    let number = sealing.pledge_sector().unwrap();
    wait_for_state(&sealing, number, SectorState::ChainPreCommitFailed).await;

    sealing
        .force_state(number, SectorState::PreCommitting)
        .unwrap();
    let info = wait_for_state(&sealing, number, SectorState::Proving).await;
    assert_eq!(info.last_error, None);
    assert_eq!(info.last_exit_code, None);
    let pre_commits = h.chain.messages_to(Method::PreCommitSector);
    assert_eq!(pre_commits.len(), 2);
    assert_eq!(info.pre_commit_message, Some(pre_commits[1].cid));
    h.stop().await;
}

#[tokio::test]
async fn recoverable_failure_is_retried() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());
    h.sealer.fail_next(SealStep::PreCommit2, 1);

    let number = sealing.pledge_sector().unwrap();
    let info = wait_for_state(&sealing, number, SectorState::Proving).await;
    let kinds: Vec<_> = info.log.iter().map(|e| e.kind.as_str()).collect();
    assert!(kinds.contains(&"SealPreCommitFailed"));
    assert!(kinds.contains(&"Retry"));
    // the failed step starts over from the ticket
    assert_eq!(h.sealer.call_count(SealStep::PreCommit1, number), 2);
    assert_eq!(info.retries, 0);
    h.stop().await;
}

#[tokio::test]
async fn retries_are_bounded() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());
    h.sealer.fail_next(SealStep::PreCommit1, 10);

    let number = sealing.pledge_sector().unwrap();
    wait_until(&sealing, number, |info| {
        info.state == SectorState::SealPreCommitFailed && info.retries == 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let info = sealing.sector_info(number).unwrap().unwrap();
    assert_eq!(info.state, SectorState::SealPreCommitFailed);
    assert_eq!(h.sealer.call_count(SealStep::PreCommit1, number), 3);
    h.stop().await;
}

#[tokio::test]
async fn restart_resumes_without_resubmitting() {
    let h = Harness::new().await;
    h.pause(true);
    let first_run = CancellationToken::new();
    let sealing = h.sealing(first_run.clone());

    // with the chain stalled the sector cannot get past the pre-commit receipt
    let number = sealing.pledge_sector().unwrap();
    wait_for_state(&sealing, number, SectorState::WaitSeed).await;
    first_run.cancel();
    drop(sealing);
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.pause(false);
    let sealing = h.sealing(CancellationToken::new());
    assert_eq!(sealing.restart().unwrap(), 1);
    wait_for_state(&sealing, number, SectorState::Proving).await;

    assert_eq!(h.chain.messages_to(Method::PreCommitSector).len(), 1);
    assert_eq!(h.chain.messages_to(Method::ProveCommitSector).len(), 1);
    assert_eq!(h.sealer.call_count(SealStep::PreCommit1, number), 1);
    // nothing left to resume
    assert_eq!(sealing.restart().unwrap(), 0);
    h.stop().await;
}

#[tokio::test]
async fn seed_is_drawn_at_its_epoch_after_a_late_restart() {
    let h = Harness::new().await;
    h.pause(true);
    let first_run = CancellationToken::new();
    let sealing = h.sealing(first_run.clone());

    let number = sealing.pledge_sector().unwrap();
    wait_for_state(&sealing, number, SectorState::WaitSeed).await;
    first_run.cancel();
    drop(sealing);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // the miner was down while the chain moved well past the seed epoch
    h.chain.advance(50);
    h.events
        .handle_head_change(HeadChange::Apply(h.chain.head()))
        .await;

    let sealing = h.sealing(CancellationToken::new());
    assert_eq!(sealing.restart().unwrap(), 1);
    h.pause(false);
    let info = wait_for_state(&sealing, number, SectorState::Proving).await;

    let pre_commit = h.chain.messages_to(Method::PreCommitSector)[0].cid;
    let rand_height =
        h.chain.inclusion_height(&pre_commit).unwrap() + h.chain.policy().pre_commit_challenge_delay;
    assert_eq!(info.seed_epoch, Some(rand_height));
    let expected = h
        .chain
        .randomness(
            &h.chain.head().token,
            DomainSeparationTag::InteractiveSealChallengeSeed,
            rand_height,
            &fvm_ipld_encoding::to_vec(&TEST_MINER).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(info.seed_value, Some(expected));
    h.stop().await;
}

/// Parks the sector in `Committing`, blocked on the first proof step, with its seed drawn.
async fn committing_on_a_seed(h: &Harness, sealing: &Sealing) -> (SectorNumber, SectorInfo) {
    h.sealer.hold(SealStep::Commit1);
    let number = sealing.pledge_sector().unwrap();
    let info = wait_until(sealing, number, |info| {
        info.state == SectorState::Committing
            && h.sealer.call_count(SealStep::Commit1, number) == 1
    })
    .await;
    assert!(info.seed_value.is_some());
    (number, info)
}

#[tokio::test]
async fn reverted_seed_is_kept_when_logging() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());
    let (number, before) = committing_on_a_seed(&h, &sealing).await;

    let rand_height = before.seed_epoch.unwrap();
    h.revert_to(rand_height - 1).await;
    h.pause(false);
    h.sealer.release(SealStep::Commit1);

    let info = wait_for_state(&sealing, number, SectorState::Proving).await;
    assert_eq!(info.seed_value, before.seed_value);
    assert_eq!(info.seed_epoch, Some(rand_height));
    assert!(info.log.iter().all(|e| e.kind != "SeedReverted"));
    assert_eq!(h.sealer.call_count(SealStep::Commit1, number), 1);
    assert_eq!(h.chain.messages_to(Method::ProveCommitSector).len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn reverted_seed_is_waited_for_again() {
    let h = Harness::new().await;
    let sealing = h.sealing_with(
        SealingConfig {
            seed_revert_policy: SeedRevertPolicy::Rewait,
            ..config()
        },
        CancellationToken::new(),
    );
    let (number, before) = committing_on_a_seed(&h, &sealing).await;

    let rand_height = before.seed_epoch.unwrap();
    h.revert_to(rand_height - 1).await;
    h.pause(false);
    h.sealer.release(SealStep::Commit1);

    let info = wait_for_state(&sealing, number, SectorState::Proving).await;
    let kinds: Vec<_> = info.log.iter().map(|e| e.kind.as_str()).collect();
    let reverted = kinds.iter().position(|k| *k == "SeedReverted").unwrap();
    assert!(kinds[reverted..].contains(&"SeedReady"));
    // same epoch, drawn again on the new fork
    assert_eq!(info.seed_epoch, Some(rand_height));
    assert_ne!(info.seed_value, before.seed_value);
    assert_eq!(h.sealer.call_count(SealStep::Commit1, number), 2);
    assert_eq!(h.chain.messages_to(Method::ProveCommitSector).len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn declared_fault_lands_on_chain() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());

    let number = sealing.pledge_sector().unwrap();
    wait_for_state(&sealing, number, SectorState::Proving).await;
    sealing.declare_faulty(number).unwrap();
    let info = wait_for_state(&sealing, number, SectorState::FaultedFinal).await;

    assert_eq!(h.chain.messages_to(Method::DeclareFaults).len(), 1);
    assert_eq!(
        info.fault_report_message,
        Some(h.chain.messages_to(Method::DeclareFaults)[0].cid)
    );
    assert!(h.chain.is_faulty(number % 48, 0, number));
    // only proving sectors can be declared faulty
    assert!(sealing.declare_faulty(number).is_err());
    assert!(sealing.declare_faulty(42).is_err());
    h.stop().await;
}

#[tokio::test]
async fn start_sector_validates_pieces() {
    let h = Harness::new().await;
    let sealing = h.sealing(CancellationToken::new());

    let filler = Piece::filler(deal_piece());
    assert!(sealing.start_sector(vec![filler]).is_err());

    let mut oversized = deal_sector_pieces();
    oversized[0].piece.size = PaddedPieceSize(16 << 20);
    assert!(sealing.start_sector(oversized).is_err());

    let mut bad_size = deal_sector_pieces();
    bad_size[0].piece.size = PaddedPieceSize(1000);
    assert!(sealing.start_sector(bad_size).is_err());

    assert!(sealing.list_sectors(None).unwrap().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn sealer_size_must_match_miner() {
    let h = Harness::new().await;
    let res = Sealing::new(
        h.chain.clone(),
        h.events.clone(),
        h.sealer.clone(),
        h.store.clone(),
        MinerConfig {
            sector_size: ConfiguredSectorSize::_2KiB,
            ..miner()
        },
        h.chain.policy().clone(),
        config(),
        CancellationToken::new(),
    );
    assert!(res.is_err());
    h.stop().await;
}
