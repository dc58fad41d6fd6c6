// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Wire types of the builtin actors the miner talks to.

pub mod market;
pub mod miner;
