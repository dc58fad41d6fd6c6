// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tracing_subscriber::filter::LevelFilter;

use super::client::Client;
use crate::actors::miner::MinerConfig;
use crate::networks::ChainConfig;
use crate::rpc_client::ApiConfig;
use crate::sealing::SealingConfig;
use crate::wdpost::ProvingConfig;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct LogConfig {
    pub filters: Vec<LogValue>,
}

impl LogConfig {
    pub(in crate::cli_shared) fn to_filter_string(&self) -> String {
        self.filters
            .iter()
            .map(|f| format!("{}={}", f.module, f.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filters: vec![
                LogValue::new("axum", LevelFilter::WARN),
                LogValue::new("jsonrpsee", LevelFilter::WARN),
                LogValue::new("parity_db", LevelFilter::WARN),
                LogValue::new("tracing_loki", LevelFilter::OFF),
            ],
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct LogValue {
    pub module: String,
    #[serde_as(as = "DisplayFromStr")]
    pub level: LevelFilter,
}

impl LogValue {
    pub fn new(module: &str, level: LevelFilter) -> Self {
        Self {
            module: module.to_string(),
            level,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Default, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub client: Client,
    pub chain: ChainConfig,
    pub miner: MinerConfig,
    pub sealing: SealingConfig,
    pub proving: ProvingConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
}
