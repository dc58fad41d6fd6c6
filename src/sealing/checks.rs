// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Pre-flight validation shared by the pre-commit phase 1 and pre-committing steps.

use cid::Cid;

use super::SectorInfo;
use crate::chain::{ChainGateway, GatewayError, TipsetToken};
use crate::networks::Policy;
use crate::shim::{address::Address, clock::ChainEpoch, deal::DealID};

#[derive(Debug, thiserror::Error)]
pub enum SealingCheckError {
    #[error("chain api call failed: {0}")]
    Api(#[from] GatewayError),
    #[error("invalid deal {deal_id} in piece {piece_index}: {reason}")]
    InvalidDeals {
        piece_index: usize,
        deal_id: DealID,
        reason: String,
    },
    #[error(
        "deal {deal_id} in piece {piece_index} starts at {start_epoch}, already reached at height {height}"
    )]
    ExpiredDeals {
        piece_index: usize,
        deal_id: DealID,
        start_epoch: ChainEpoch,
        height: ChainEpoch,
    },
    #[error("on-chain CommD {on_chain} does not match sealed CommD {local}")]
    BadCommD { on_chain: Cid, local: Cid },
    #[error("ticket from epoch {ticket_epoch} expired at height {height}")]
    ExpiredTicket {
        ticket_epoch: ChainEpoch,
        height: ChainEpoch,
    },
    #[error(transparent)]
    Other(anyhow::Error),
}

/// Checks that every deal piece still matches an active, unstarted deal for `miner`.
pub async fn check_pieces(
    gateway: &dyn ChainGateway,
    miner: &Address,
    info: &SectorInfo,
    token: &TipsetToken,
    height: ChainEpoch,
) -> Result<(), SealingCheckError> {
    for (piece_index, piece) in info.pieces.iter().enumerate() {
        let Some(deal) = &piece.deal else {
            continue;
        };
        let deal_id = deal.deal_id;
        let invalid = |reason: String| SealingCheckError::InvalidDeals {
            piece_index,
            deal_id,
            reason,
        };
        let Some(on_chain) = gateway.state_market_storage_deal(deal_id, token).await? else {
            return Err(invalid("deal not found on chain".into()));
        };
        let proposal = on_chain.proposal;
        if &proposal.provider != miner {
            return Err(invalid(format!(
                "deal belongs to provider {}",
                proposal.provider
            )));
        }
        if proposal.piece_cid != piece.piece.cid {
            return Err(invalid(format!(
                "piece cid {} differs from the deal's {}",
                piece.piece.cid, proposal.piece_cid
            )));
        }
        if proposal.piece_size != piece.piece.size {
            return Err(invalid(format!(
                "piece size {} differs from the deal's {}",
                piece.piece.size.0, proposal.piece_size.0
            )));
        }
        if height >= proposal.start_epoch {
            return Err(SealingCheckError::ExpiredDeals {
                piece_index,
                deal_id,
                start_epoch: proposal.start_epoch,
                height,
            });
        }
    }
    Ok(())
}

/// [`check_pieces`], then CommD against the chain's expectation, then ticket age.
pub async fn check_precommit(
    gateway: &dyn ChainGateway,
    miner: &Address,
    info: &SectorInfo,
    token: &TipsetToken,
    height: ChainEpoch,
    policy: &Policy,
) -> Result<(), SealingCheckError> {
    check_pieces(gateway, miner, info, token, height).await?;

    let on_chain = gateway
        .state_compute_data_commitment(miner, info.seal_proof, &info.deal_ids(), token)
        .await?;
    let local = info
        .comm_d
        .ok_or_else(|| SealingCheckError::Other(anyhow::anyhow!("sector has no CommD")))?;
    if on_chain != local {
        return Err(SealingCheckError::BadCommD { on_chain, local });
    }

    let ticket_epoch = info
        .ticket_epoch
        .ok_or_else(|| SealingCheckError::Other(anyhow::anyhow!("sector has no ticket")))?;
    if height - ticket_epoch > policy.max_pre_commit_randomness_lookback {
        return Err(SealingCheckError::ExpiredTicket {
            ticket_epoch,
            height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::market::{DealProposal, DealState, MarketDeal};
    use crate::sealer::mock::mock_data_commitment;
    use crate::sealing::{DealInfo, Piece};
    use crate::shim::piece::{PaddedPieceSize, PieceInfo};
    use crate::shim::sector::{RegisteredSealProof, data_commitment_cid};
    use crate::test_utils::{TEST_MINER, TestChain};
    use rstest::rstest;

    const PROOF: RegisteredSealProof = RegisteredSealProof::StackedDRG2KiBV1P1;

    fn deal_piece() -> PieceInfo {
        PieceInfo {
            size: PaddedPieceSize(1024),
            cid: data_commitment_cid(&[7; 32]).unwrap(),
        }
    }

    fn chain_with_deal(provider: Address, start_epoch: ChainEpoch) -> TestChain {
        let chain = TestChain::new();
        let piece = deal_piece();
        chain.add_deal(
            5,
            MarketDeal {
                proposal: DealProposal {
                    piece_cid: piece.cid,
                    piece_size: piece.size,
                    client: Address::new_id(2000),
                    provider,
                    start_epoch,
                    end_epoch: start_epoch + 10_000,
                },
                state: DealState::default(),
            },
        );
        chain.advance(20);
        chain
    }

    fn sector_with_deal(deal_id: DealID) -> SectorInfo {
        let mut info = SectorInfo::new(
            1,
            PROOF,
            vec![Piece {
                piece: deal_piece(),
                deal: Some(DealInfo {
                    deal_id,
                    start_epoch: 100,
                    end_epoch: 10_100,
                }),
            }],
        );
        info.comm_d = Some(mock_data_commitment(PROOF, &[deal_piece()]).unwrap());
        info.ticket_epoch = Some(10);
        info
    }

    #[derive(Debug)]
    enum Expect {
        Ok,
        Invalid,
        Expired,
        BadCommD,
        ExpiredTicket,
    }

    fn classify(res: &Result<(), SealingCheckError>) -> Expect {
        match res {
            Ok(()) => Expect::Ok,
            Err(SealingCheckError::InvalidDeals { .. }) => Expect::Invalid,
            Err(SealingCheckError::ExpiredDeals { .. }) => Expect::Expired,
            Err(SealingCheckError::BadCommD { .. }) => Expect::BadCommD,
            Err(SealingCheckError::ExpiredTicket { .. }) => Expect::ExpiredTicket,
            Err(e) => panic!("unexpected check error {e}"),
        }
    }

    #[rstest]
    #[case::valid(TEST_MINER, 100, 5, Expect::Ok)]
    #[case::unknown_deal(TEST_MINER, 100, 6, Expect::Invalid)]
    #[case::other_provider(Address::new_id(77), 100, 5, Expect::Invalid)]
    #[case::started(TEST_MINER, 15, 5, Expect::Expired)]
    #[tokio::test]
    async fn piece_checks(
        #[case] provider: Address,
        #[case] start_epoch: ChainEpoch,
        #[case] deal_id: DealID,
        #[case] expected: Expect,
    ) {
        let chain = chain_with_deal(provider, start_epoch);
        let head = chain.head();
        let res = check_pieces(
            &chain,
            &TEST_MINER,
            &sector_with_deal(deal_id),
            &head.token,
            head.height,
        )
        .await;
        assert_eq!(
            format!("{:?}", classify(&res)),
            format!("{expected:?}"),
            "{res:?}"
        );
    }

    #[tokio::test]
    async fn precommit_checks_commd_and_ticket() {
        let chain = chain_with_deal(TEST_MINER, 100);
        let head = chain.head();
        let policy = Policy::devnet();

        let info = sector_with_deal(5);
        let res = check_precommit(&chain, &TEST_MINER, &info, &head.token, head.height, &policy)
            .await;
        assert!(matches!(classify(&res), Expect::Ok));

        let mut bad = info.clone();
        bad.comm_d = Some(data_commitment_cid(&[1; 32]).unwrap());
        let res =
            check_precommit(&chain, &TEST_MINER, &bad, &head.token, head.height, &policy).await;
        assert!(matches!(classify(&res), Expect::BadCommD));

        let mut stale = info;
        stale.ticket_epoch = Some(head.height - policy.max_pre_commit_randomness_lookback - 1);
        let res =
            check_precommit(&chain, &TEST_MINER, &stale, &head.token, head.height, &policy).await;
        assert!(matches!(classify(&res), Expect::ExpiredTicket));
    }

    #[tokio::test]
    async fn unreachable_chain_is_an_api_error() {
        let chain = chain_with_deal(TEST_MINER, 100);
        let head = chain.head();
        chain.set_unavailable(true);
        let res = check_pieces(
            &chain,
            &TEST_MINER,
            &sector_with_deal(5),
            &head.token,
            head.height,
        )
        .await;
        assert!(matches!(res, Err(SealingCheckError::Api(_))));
    }
}
