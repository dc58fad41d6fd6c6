// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod gateway;
mod head_change;

pub use gateway::*;
pub use head_change::*;
