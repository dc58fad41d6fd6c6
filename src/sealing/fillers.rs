// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::ensure;

use crate::shim::piece::{PaddedPieceSize, UnpaddedPieceSize};

/// Splits the free space of a sector into filler pieces, one per set bit of
/// the padded remainder, smallest first.
pub fn fillers_from_rem(rem: UnpaddedPieceSize) -> anyhow::Result<Vec<UnpaddedPieceSize>> {
    ensure!(
        rem.0 % 127 == 0,
        "remaining space {} is not a multiple of 127 bytes",
        rem.0
    );
    let mut to_fill = rem.0 + rem.0 / 127;
    let mut out = Vec::with_capacity(to_fill.count_ones() as usize);
    while to_fill != 0 {
        let size = 1 << to_fill.trailing_zeros();
        to_fill ^= size;
        out.push(PaddedPieceSize(size).unpadded());
    }
    Ok(out)
}
