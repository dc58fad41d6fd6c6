// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Thin re-export layer over `fvm_shared`. Everything in the crate refers to
//! ledger types through these paths, never through `fvm_shared4` directly.

pub mod randomness;
pub mod sector;

pub mod address {
    pub use fvm_shared4::address::Address;
}

pub mod clock {
    pub use fvm_shared4::clock::ChainEpoch;
}

pub mod deal {
    pub use fvm_shared4::deal::DealID;
}

pub mod econ {
    pub use fvm_shared4::econ::TokenAmount;
}

pub mod error {
    pub use fvm_shared4::error::ExitCode;
}

pub mod piece {
    pub use fvm_shared4::piece::{PaddedPieceSize, PieceInfo, UnpaddedPieceSize};
}

pub use fvm_shared4::{ActorID, MethodNum};
