// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! One handler per sector state. A handler only reads the record and talks to
//! the outside world; every change to the record goes through the event it
//! returns.

use std::sync::Arc;

use fvm_ipld_bitfield::BitField;
use futures::FutureExt as _;
use tracing::{debug, info, warn};

use super::checks::{self, SealingCheckError};
use super::task::{SectorTask, Step};
use super::{Failure, SealingContext, SectorEvent, SectorInfo, SectorState, SeedRevertPolicy};
use crate::actors::miner::{
    DeclareFaultsParams, FaultDeclaration, Method, PreCommitSectorParams, ProveCommitSectorParams,
    serialize_params,
};
use crate::chain::{GatewayError, MsgLookup, TipsetToken};
use crate::sealer::{SealVerifyInfo, SectorCids};
use crate::shim::{
    clock::ChainEpoch,
    piece::UnpaddedPieceSize,
    randomness::DomainSeparationTag,
    sector::unpadded_capacity,
};
use crate::utils::{RetryArgs, retry};

/// Failure event constructor, e.g. `SectorEvent::PackingFailed`.
type FailureEvent = fn(Failure) -> SectorEvent;

fn fail(event: FailureEvent, error: impl std::fmt::Display) -> Step {
    Step::Next(event(Failure::msg(error)))
}

fn api_error(e: GatewayError) -> Step {
    Step::Retry(e.into())
}

/// Maps a failed pre-flight check onto the sector's next move.
fn check_failed(e: SealingCheckError) -> Step {
    match e {
        SealingCheckError::Api(e) => api_error(e),
        e @ (SealingCheckError::InvalidDeals { .. } | SealingCheckError::ExpiredDeals { .. }) => {
            fail(SectorEvent::PackingFailed, e)
        }
        e @ (SealingCheckError::BadCommD { .. } | SealingCheckError::ExpiredTicket { .. }) => {
            fail(SectorEvent::SealPreCommitFailed, e)
        }
        SealingCheckError::Other(e) => fail(SectorEvent::Fatal, format!("{e:#}")),
    }
}

impl SectorTask {
    pub(super) async fn plan(&mut self, info: &SectorInfo) -> Step {
        use SectorState as S;
        match info.state {
            S::Packing => self.handle_packing(info).await,
            S::PreCommit1 => self.handle_pre_commit1(info).await,
            S::PreCommit2 => self.handle_pre_commit2(info).await,
            S::PreCommitting => self.handle_pre_committing(info).await,
            S::WaitSeed => self.handle_wait_seed(info).await,
            S::Committing => self.handle_committing(info).await,
            S::CommitWait => self.handle_commit_wait(info).await,
            S::FinalizeSector => self.handle_finalize(info).await,
            S::Faulty => self.handle_faulty(info).await,
            S::FaultReported => self.handle_fault_reported(info).await,
            S::PackingFailed | S::SealPreCommitFailed | S::ComputeProofFailed | S::FinalizeFailed => {
                self.handle_recoverable_failure(info)
            }
            S::Proving | S::FaultedFinal | S::ChainPreCommitFailed | S::CommitFailed | S::FatalError => {
                Step::Wait
            }
        }
    }

    fn entropy(&self) -> anyhow::Result<Vec<u8>> {
        Ok(fvm_ipld_encoding::to_vec(&self.ctx.miner.actor)?)
    }

    async fn handle_packing(&self, info: &SectorInfo) -> Step {
        let capacity = unpadded_capacity(self.ctx.sealer.sector_size());
        let mut existing = info.unpadded_sizes();
        let used: u64 = existing.iter().map(|s| s.0).sum();
        if used > capacity.0 {
            return fail(
                SectorEvent::PackingFailed,
                format!("too much data in sector: {used} > {}", capacity.0),
            );
        }
        let fillers = match super::fillers_from_rem(UnpaddedPieceSize(capacity.0 - used)) {
            Ok(fillers) => fillers,
            Err(e) => return fail(SectorEvent::PackingFailed, format!("{e:#}")),
        };
        if !fillers.is_empty() {
            info!(count = fillers.len(), used, "creating filler pieces");
        }

        let mut added = Vec::with_capacity(fillers.len());
        for size in fillers {
            match self.ctx.sealer.add_piece(self.sector_id(), &existing, size).await {
                Ok(piece) => added.push(piece),
                Err(e) => {
                    return fail(
                        SectorEvent::PackingFailed,
                        format!("adding filler piece: {e:#}"),
                    );
                }
            }
            existing.push(size);
        }
        Step::Next(SectorEvent::Packed { fillers: added })
    }

    async fn handle_pre_commit1(&self, info: &SectorInfo) -> Step {
        let ctx = &self.ctx;
        let head = match ctx.gateway.chain_head().await {
            Ok(head) => head,
            Err(e) => return api_error(e),
        };
        if let Err(e) =
            checks::check_pieces(ctx.gateway.as_ref(), &ctx.miner.actor, info, &head.token, head.height)
                .await
        {
            return check_failed(e);
        }

        let ticket_epoch = (head.height - ctx.policy.seal_randomness_lookback).max(0);
        let entropy = match self.entropy() {
            Ok(entropy) => entropy,
            Err(e) => return fail(SectorEvent::Fatal, format!("encoding entropy: {e:#}")),
        };
        let ticket = match ctx
            .gateway
            .randomness(
                &head.token,
                DomainSeparationTag::SealRandomness,
                ticket_epoch,
                &entropy,
            )
            .await
        {
            Ok(ticket) => ticket,
            Err(e) => return api_error(e),
        };

        match ctx
            .sealer
            .seal_pre_commit1(self.sector_id(), &ticket, &info.piece_infos())
            .await
        {
            Ok(out) => Step::Next(SectorEvent::PreCommit1Done {
                ticket,
                ticket_epoch,
                out,
            }),
            Err(e) => fail(
                SectorEvent::SealPreCommitFailed,
                format!("seal pre commit(1) failed: {e:#}"),
            ),
        }
    }

    async fn handle_pre_commit2(&self, info: &SectorInfo) -> Step {
        let Some(out) = &info.pre_commit1_out else {
            return fail(
                SectorEvent::SealPreCommitFailed,
                "missing pre commit(1) output",
            );
        };
        match self.ctx.sealer.seal_pre_commit2(self.sector_id(), out).await {
            Ok(SectorCids { unsealed, sealed }) => {
                Step::Next(SectorEvent::PreCommit2Done { unsealed, sealed })
            }
            Err(e) => fail(
                SectorEvent::SealPreCommitFailed,
                format!("seal pre commit(2) failed: {e:#}"),
            ),
        }
    }

    async fn handle_pre_committing(&self, info: &SectorInfo) -> Step {
        if let Some(message) = info.pre_commit_message {
            return Step::Next(SectorEvent::PreCommitted { message });
        }
        let ctx = &self.ctx;
        let head = match ctx.gateway.chain_head().await {
            Ok(head) => head,
            Err(e) => return api_error(e),
        };
        if let Err(e) = checks::check_precommit(
            ctx.gateway.as_ref(),
            &ctx.miner.actor,
            info,
            &head.token,
            head.height,
            &ctx.policy,
        )
        .await
        {
            return check_failed(e);
        }

        let (Some(sealed_cid), Some(seal_rand_epoch)) = (info.comm_r, info.ticket_epoch) else {
            return fail(SectorEvent::Fatal, "sector has no CommR or ticket");
        };
        let expiration = info
            .pieces
            .iter()
            .filter_map(|p| p.deal.as_ref().map(|d| d.end_epoch))
            .fold(head.height + ctx.config.min_sector_lifetime, ChainEpoch::max);
        let params = PreCommitSectorParams {
            seal_proof: info.seal_proof,
            sector_number: info.sector_number,
            sealed_cid,
            seal_rand_epoch,
            deal_ids: info.deal_ids(),
            expiration,
            replace_capacity: false,
            replace_sector_deadline: 0,
            replace_sector_partition: 0,
            replace_sector_number: 0,
        };
        let params = match serialize_params(&params) {
            Ok(params) => params,
            Err(e) => {
                return fail(
                    SectorEvent::ChainPreCommitFailed,
                    format!("could not serialize pre-commit params: {e:#}"),
                );
            }
        };
        match ctx
            .gateway
            .send_message(ctx.miner.message(Method::PreCommitSector, params))
            .await
        {
            Ok(message) => {
                info!(%message, expiration, "pre-commit message sent");
                Step::Next(SectorEvent::PreCommitted { message })
            }
            Err(e) => fail(
                SectorEvent::ChainPreCommitFailed,
                format!("pushing pre-commit message: {e}"),
            ),
        }
    }

    async fn handle_wait_seed(&mut self, info: &SectorInfo) -> Step {
        let Some(message) = info.pre_commit_message else {
            return fail(SectorEvent::ChainPreCommitFailed, "no pre-commit message");
        };
        let ctx = self.ctx.clone();
        let lookup = match ctx
            .gateway
            .wait_for_message(&message, ctx.policy.message_confidence)
            .await
        {
            Ok(lookup) => lookup,
            Err(e) => return api_error(e),
        };
        if !lookup.receipt.exit_code.is_success() {
            return Step::Next(SectorEvent::ChainPreCommitFailed(
                Failure::msg(format!(
                    "pre-commit message {message} failed with exit code {}",
                    lookup.receipt.exit_code
                ))
                .with_exit_code(lookup.receipt.exit_code),
            ));
        }
        let on_chain = match ctx
            .gateway
            .state_sector_precommit_info(&ctx.miner.actor, info.sector_number, &lookup.token)
            .await
        {
            Ok(Some(on_chain)) => on_chain,
            Ok(None) => {
                return fail(
                    SectorEvent::Fatal,
                    format!("pre-commit info not found on chain at height {}", lookup.height),
                );
            }
            Err(e) => return api_error(e),
        };

        if self.seed_subscription.is_none() {
            let rand_height = on_chain.pre_commit_epoch + ctx.policy.pre_commit_challenge_delay;
            let entropy = match self.entropy() {
                Ok(entropy) => entropy,
                Err(e) => return fail(SectorEvent::Fatal, format!("encoding entropy: {e:#}")),
            };
            debug!(rand_height, "waiting for interactive seal randomness");
            let id = ctx
                .events
                .chain_at(
                    rand_height,
                    ctx.policy.interactive_porep_confidence,
                    seed_apply_handler(ctx.clone(), self.sender.clone(), entropy, rand_height),
                    seed_revert_handler(ctx.clone(), self.sender.clone()),
                )
                .await;
            self.seed_subscription = Some(id);
        }
        Step::Wait
    }

    async fn handle_committing(&self, info: &SectorInfo) -> Step {
        if let (Some(message), Some(proof)) = (info.commit_message, &info.proof) {
            return Step::Next(SectorEvent::Committed {
                message,
                proof: proof.clone(),
            });
        }
        let (Some(ticket), Some(seed), Some(unsealed), Some(sealed)) = (
            &info.ticket_value,
            &info.seed_value,
            info.comm_d,
            info.comm_r,
        ) else {
            return fail(
                SectorEvent::Fatal,
                "sector is missing a ticket, seed or commitment",
            );
        };
        let ctx = &self.ctx;
        let cids = SectorCids { unsealed, sealed };
        let pieces = info.piece_infos();

        let c1 = match ctx
            .sealer
            .seal_commit1(self.sector_id(), ticket, seed, &pieces, &cids)
            .await
        {
            Ok(out) => out,
            Err(e) => {
                return fail(
                    SectorEvent::ComputeProofFailed,
                    format!("computing seal proof (1): {e:#}"),
                );
            }
        };
        let proof = match ctx.sealer.seal_commit2(self.sector_id(), &c1).await {
            Ok(proof) => proof,
            Err(e) => {
                return fail(
                    SectorEvent::ComputeProofFailed,
                    format!("computing seal proof (2): {e:#}"),
                );
            }
        };

        let verify = SealVerifyInfo {
            seal_proof: info.seal_proof,
            sector: self.sector_id(),
            deal_ids: info.deal_ids(),
            ticket: ticket.clone(),
            seed: seed.clone(),
            proof: proof.clone(),
            sealed_cid: sealed,
            unsealed_cid: unsealed,
        };
        match ctx.sealer.verify_seal(&verify).await {
            Ok(true) => {}
            Ok(false) => return fail(SectorEvent::CommitFailed, "local seal proof check failed"),
            Err(e) => {
                return fail(
                    SectorEvent::ComputeProofFailed,
                    format!("verifying seal proof: {e:#}"),
                );
            }
        }

        // a proof over a reverted seed would not land
        if self.take_seed_revert() {
            return Step::Next(SectorEvent::SeedReverted);
        }
        let params = ProveCommitSectorParams {
            sector_number: info.sector_number,
            proof: proof.clone(),
        };
        let params = match serialize_params(&params) {
            Ok(params) => params,
            Err(e) => {
                return fail(
                    SectorEvent::CommitFailed,
                    format!("could not serialize commit params: {e:#}"),
                );
            }
        };
        match ctx
            .gateway
            .send_message(ctx.miner.message(Method::ProveCommitSector, params))
            .await
        {
            Ok(message) => {
                info!(%message, "prove-commit message sent");
                Step::Next(SectorEvent::Committed { message, proof })
            }
            Err(e) => fail(
                SectorEvent::CommitFailed,
                format!("pushing prove-commit message: {e}"),
            ),
        }
    }

    async fn handle_commit_wait(&mut self, info: &SectorInfo) -> Step {
        // the commit is out, a seed revert can no longer move the sector back
        if let Some(id) = self.seed_subscription.take() {
            self.ctx.events.cancel(id);
        }
        let Some(message) = info.commit_message else {
            return fail(
                SectorEvent::CommitFailed,
                "entered commit wait with no commit message cid",
            );
        };
        let lookup = match self.wait_for(&message).await {
            Ok(lookup) => lookup,
            Err(e) => return api_error(e),
        };
        let exit_code = lookup.receipt.exit_code;
        if !exit_code.is_success() {
            let hex_of = |v: Option<&[u8]>| hex::encode(v.unwrap_or_default());
            return Step::Next(SectorEvent::CommitFailed(
                Failure::msg(format!(
                    "submitting sector proof failed (exit={exit_code}, msg={message}) (t:{}; s:{}; p:{})",
                    hex_of(info.ticket_value.as_ref().map(|t| t.0.as_slice())),
                    hex_of(info.seed_value.as_ref().map(|s| s.0.as_slice())),
                    hex_of(info.proof.as_deref()),
                ))
                .with_exit_code(exit_code),
            ));
        }
        Step::Next(SectorEvent::CommitLanded)
    }

    async fn handle_finalize(&self, _info: &SectorInfo) -> Step {
        match self.ctx.sealer.finalize_sector(self.sector_id()).await {
            Ok(()) => Step::Next(SectorEvent::Finalized),
            Err(e) => fail(
                SectorEvent::FinalizeFailed,
                format!("finalize sector: {e:#}"),
            ),
        }
    }

    async fn handle_faulty(&self, info: &SectorInfo) -> Step {
        if let Some(message) = info.fault_report_message {
            return Step::Next(SectorEvent::FaultReported { message });
        }
        let ctx = &self.ctx;
        let head = match ctx.gateway.chain_head().await {
            Ok(head) => head,
            Err(e) => return api_error(e),
        };
        let location = match ctx
            .gateway
            .state_sector_partition(&ctx.miner.actor, info.sector_number, &head.token)
            .await
        {
            Ok(Some(location)) => location,
            Ok(None) => {
                return fail(
                    SectorEvent::Fatal,
                    format!("sector {} is not assigned to a partition", info.sector_number),
                );
            }
            Err(e) => return api_error(e),
        };
        let mut sectors = BitField::new();
        sectors.set(info.sector_number);
        let params = DeclareFaultsParams {
            faults: vec![FaultDeclaration {
                deadline: location.deadline,
                partition: location.partition,
                sectors,
            }],
        };
        let params = match serialize_params(&params) {
            Ok(params) => params,
            Err(e) => return fail(SectorEvent::Fatal, format!("{e:#}")),
        };
        match ctx
            .gateway
            .send_message(ctx.miner.message(Method::DeclareFaults, params))
            .await
        {
            Ok(message) => {
                info!(%message, deadline = location.deadline, partition = location.partition, "fault declaration sent");
                Step::Next(SectorEvent::FaultReported { message })
            }
            Err(e) => api_error(e),
        }
    }

    async fn handle_fault_reported(&self, info: &SectorInfo) -> Step {
        let Some(message) = info.fault_report_message else {
            return fail(SectorEvent::Fatal, "no fault report message cid");
        };
        let lookup = match self.wait_for(&message).await {
            Ok(lookup) => lookup,
            Err(e) => return api_error(e),
        };
        let exit_code = lookup.receipt.exit_code;
        if !exit_code.is_success() {
            return Step::Next(SectorEvent::Fatal(
                Failure::msg(format!(
                    "declaring sector fault failed (exit={exit_code}, msg={message})"
                ))
                .with_exit_code(exit_code),
            ));
        }
        Step::Next(SectorEvent::FaultedFinal)
    }

    fn handle_recoverable_failure(&self, info: &SectorInfo) -> Step {
        let config = &self.ctx.config;
        if info.retries < config.max_failure_retries {
            Step::Delay(config.failure_retry_delay, SectorEvent::Retry)
        } else {
            warn!(
                state = %info.state,
                retries = info.retries,
                "retry limit reached, sector parked until forced"
            );
            Step::Wait
        }
    }

    async fn wait_for(&self, message: &cid::Cid) -> Result<MsgLookup, GatewayError> {
        self.ctx
            .gateway
            .wait_for_message(message, self.ctx.policy.message_confidence)
            .await
    }
}

fn seed_apply_handler(
    ctx: Arc<SealingContext>,
    sender: flume::Sender<SectorEvent>,
    entropy: Vec<u8>,
    rand_height: ChainEpoch,
) -> crate::chain_events::ApplyHandler {
    // The trigger can sit above `rand_height` (restart, null round); the seed
    // is always drawn at `rand_height`.
    Box::new(move |token: TipsetToken, _trigger_height: ChainEpoch| {
        let epoch = rand_height;
        async move {
            let args = RetryArgs {
                max_attempts: 5,
                delay: ctx.config.api_retry_delay,
            };
            let drawn = retry(args, || {
                ctx.gateway.randomness(
                    &token,
                    DomainSeparationTag::InteractiveSealChallengeSeed,
                    epoch,
                    &entropy,
                )
            })
            .await;
            let event = match drawn {
                Ok(seed) => SectorEvent::SeedReady { seed, epoch },
                Err(e) => SectorEvent::Fatal(Failure::msg(format!(
                    "drawing interactive seal randomness at {epoch}: {e}"
                ))),
            };
            sender
                .send(event)
                .map_err(|_| anyhow::anyhow!("sector task has stopped"))
        }
        .boxed()
    })
}

fn seed_revert_handler(
    ctx: Arc<SealingContext>,
    sender: flume::Sender<SectorEvent>,
) -> crate::chain_events::RevertHandler {
    Box::new(move |_token: TipsetToken| {
        async move {
            match ctx.config.seed_revert_policy {
                SeedRevertPolicy::Log => {
                    warn!("tipset of the interactive seal randomness was reverted, keeping seed");
                    Ok(())
                }
                SeedRevertPolicy::Rewait => {
                    warn!("tipset of the interactive seal randomness was reverted, waiting again");
                    sender
                        .send(SectorEvent::SeedReverted)
                        .map_err(|_| anyhow::anyhow!("sector task has stopped"))
                }
            }
        }
        .boxed()
    })
}
