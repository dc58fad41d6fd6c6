// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use fvm_shared4::randomness::Randomness;

/// Domain separation tags mixed into every randomness draw, numbered as the
/// builtin actors number them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[repr(i64)]
pub enum DomainSeparationTag {
    TicketProduction = 1,
    ElectionProofProduction = 2,
    WinningPoStChallengeSeed = 3,
    WindowedPoStChallengeSeed = 4,
    SealRandomness = 5,
    InteractiveSealChallengeSeed = 6,
    WindowedPoStDeadlineAssignment = 7,
    MarketDealCronSeed = 8,
    PoStChainCommit = 9,
}

/// Where a node draws randomness for a given tag from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomnessSource {
    /// Chain ticket randomness, can be influenced by block producers.
    Tickets,
    /// Drand beacon randomness.
    Beacon,
}

impl DomainSeparationTag {
    pub fn source(self) -> RandomnessSource {
        use DomainSeparationTag::*;
        match self {
            TicketProduction | SealRandomness | PoStChainCommit => RandomnessSource::Tickets,
            ElectionProofProduction
            | WinningPoStChallengeSeed
            | WindowedPoStChallengeSeed
            | InteractiveSealChallengeSeed
            | WindowedPoStDeadlineAssignment
            | MarketDealCronSeed => RandomnessSource::Beacon,
        }
    }
}
