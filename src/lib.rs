// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

cfg_if::cfg_if! {
    if #[cfg(feature = "rustalloc")] {
    } else if #[cfg(feature = "jemalloc")] {
        use tikv_jemallocator::Jemalloc;
        #[global_allocator]
        static GLOBAL: Jemalloc = Jemalloc;
    }
}

mod actors;
mod chain;
mod chain_events;
mod cli_shared;
mod daemon;
mod lotus_json;
mod metrics;
mod networks;
mod rpc_client;
mod sealer;
mod sealing;
mod sector_store;
mod shim;
#[cfg(test)]
mod test_utils;
mod utils;
mod wdpost;

pub use cli_shared::cli::{Client, Config};
pub use daemon::main::main as forest_miner_main;
