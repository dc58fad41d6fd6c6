// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeSet;

use anyhow::{Context as _, ensure};
use fvm_ipld_bitfield::BitField;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{PostContext, PostError};
use crate::actors::miner::{
    DeadlineInfo, DeclareFaultsParams, FaultDeclaration, Method, Partition, PoStPartition,
    SubmitWindowedPoStParams, serialize_params,
};
use crate::chain::TipsetToken;
use crate::metrics::{self, HistogramTimerExt as _};
use crate::sealer::ProveError;
use crate::shim::{
    randomness::DomainSeparationTag,
    sector::{SectorInfo, SectorNumber},
};

fn bitfield_of(sectors: &BTreeSet<SectorNumber>) -> BitField {
    let mut bf = BitField::new();
    for sector in sectors {
        bf.set(*sector);
    }
    bf
}

/// Builds the proof for one deadline, as seen from `token`. `Ok(None)` means
/// there is nothing to prove.
pub(super) async fn run_post(
    ctx: &PostContext,
    di: &DeadlineInfo,
    token: &TipsetToken,
    cancel: CancellationToken,
) -> Result<Option<SubmitWindowedPoStParams>, PostError> {
    let miner = &ctx.miner.actor;
    let partitions = ctx
        .gateway
        .state_miner_partitions(miner, di.index, token)
        .await?;
    let mut provable = BitField::new();
    for partition in &partitions {
        provable = &provable | &partition.provable_sectors();
    }
    if provable.is_empty() {
        info!("no sectors to prove in this deadline");
        return Ok(None);
    }

    let sectors: Vec<SectorInfo> = ctx
        .gateway
        .state_miner_sectors(miner, &provable, token)
        .await?
        .into_iter()
        .map(|s| SectorInfo {
            proof: s.seal_proof,
            sector_number: s.sector_number,
            sealed_cid: s.sealed_cid,
        })
        .collect();

    let unprovable: BTreeSet<SectorNumber> = ctx
        .prover
        .check_provable(ctx.miner_id, &sectors)
        .await
        .context("checking sectors")?
        .into_iter()
        .collect();
    let bad = bitfield_of(&unprovable);
    let mut faults_declared = true;
    if !unprovable.is_empty() {
        let declared = tokio::select! {
            _ = cancel.cancelled() => return Err(ProveError::Cancelled.into()),
            res = declare_faults(ctx, di, &partitions, &bad) => res,
        };
        if let Err(e) = declared {
            warn!("failed to declare faults: {e:#}");
            faults_declared = false;
        }
    }

    let entropy = fvm_ipld_encoding::to_vec(miner).context("encoding randomness entropy")?;
    let randomness = ctx
        .gateway
        .randomness(
            token,
            DomainSeparationTag::WindowedPoStChallengeSeed,
            di.challenge,
            &entropy,
        )
        .await?;

    let to_prove: Vec<SectorInfo> = sectors
        .into_iter()
        .filter(|s| !unprovable.contains(&s.sector_number))
        .collect();
    if to_prove.is_empty() {
        warn!(faults = unprovable.len(), "every sector in the deadline is faulty");
        return Ok(None);
    }
    let faults: Vec<SectorNumber> = unprovable.iter().copied().collect();
    info!(
        sectors = to_prove.len(),
        faults = faults.len(),
        challenge = di.challenge,
        "generating window post"
    );
    let proofs = {
        let _timer = metrics::WINDOW_POST_PROOF_TIME.start_timer();
        ctx.prover
            .generate_window_post(ctx.miner_id, &to_prove, &randomness, &faults, cancel)
            .await?
    };

    let chain_commit_rand = ctx
        .gateway
        .randomness(token, DomainSeparationTag::PoStChainCommit, di.open, &entropy)
        .await?;
    let partitions = partitions
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.provable_sectors().is_empty())
        .map(|(index, p)| PoStPartition {
            index: index as u64,
            skipped: if faults_declared {
                BitField::new()
            } else {
                &p.provable_sectors() & &bad
            },
        })
        .collect();
    Ok(Some(SubmitWindowedPoStParams {
        deadline: di.index,
        partitions,
        proofs,
        chain_commit_epoch: di.open,
        chain_commit_rand,
    }))
}

/// Declares `bad` in one message, grouped by partition, and waits for the receipt.
async fn declare_faults(
    ctx: &PostContext,
    di: &DeadlineInfo,
    partitions: &[Partition],
    bad: &BitField,
) -> anyhow::Result<()> {
    let faults: Vec<FaultDeclaration> = partitions
        .iter()
        .enumerate()
        .filter_map(|(index, p)| {
            let sectors = &p.provable_sectors() & bad;
            (!sectors.is_empty()).then_some(FaultDeclaration {
                deadline: di.index,
                partition: index as u64,
                sectors,
            })
        })
        .collect();
    if faults.is_empty() {
        return Ok(());
    }
    if di.fault_cutoff_passed() {
        warn!(
            cutoff = di.fault_cutoff,
            "fault cutoff has passed, the declaration may be rejected"
        );
    }
    warn!(count = bad.len(), partitions = faults.len(), "declaring faults");

    let params = serialize_params(&DeclareFaultsParams { faults })
        .context("could not serialize declare faults parameters")?;
    let message = ctx
        .gateway
        .send_message(ctx.miner.message(Method::DeclareFaults, params))
        .await
        .context("pushing faults message")?;
    let lookup = ctx
        .gateway
        .wait_for_message(&message, ctx.policy.message_confidence)
        .await
        .context("waiting for declare faults")?;
    ensure!(
        lookup.receipt.exit_code.is_success(),
        "declare faults {message} exited with {}",
        lookup.receipt.exit_code
    );
    info!(%message, "faults declared");
    Ok(())
}
