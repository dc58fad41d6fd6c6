// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod cli;
pub mod logger;

use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli_shared::cli::{Config, ConfigPath, find_config_path};
use crate::networks::{ChainConfig, NetworkChain};

/// Gets the sector database directory of the configured network.
pub fn sector_db_path(config: &Config) -> PathBuf {
    config
        .client
        .data_dir
        .join(config.chain.network.to_string())
        .join("sectors")
}

pub fn read_config(
    config_path_opt: Option<&PathBuf>,
    chain_opt: Option<NetworkChain>,
) -> anyhow::Result<(Option<ConfigPath>, Config)> {
    let (path, mut config) = match find_config_path(config_path_opt) {
        Some(path) => {
            let toml = std::fs::read_to_string(path.to_path_buf())
                .with_context(|| format!("couldn't read {}", path.to_path_buf().display()))?;
            let config = toml::from_str(&toml)
                .with_context(|| format!("invalid config {}", path.to_path_buf().display()))?;
            (Some(path), config)
        }
        None => (None, Config::default()),
    };
    if let Some(chain) = chain_opt {
        config.chain = ChainConfig::from_chain(&chain);
    }
    Ok((path, config))
}
