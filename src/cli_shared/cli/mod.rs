// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod client;
mod config;

pub use self::{client::*, config::*};

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::Args;
use directories::ProjectDirs;

use crate::networks::NetworkChain;
use crate::rpc_client::ApiInfo;
use crate::utils::misc::LoggingColor;

pub const CONFIG_PATH_ENV: &str = "FOREST_MINER_CONFIG_PATH";

/// CLI options
#[derive(Default, Debug, Args)]
pub struct CliOpts {
    /// A TOML file containing relevant configurations
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Network the miner runs on, overriding the configuration
    #[arg(long)]
    pub chain: Option<NetworkChain>,
    /// Full node API, `token:multiaddr`. Overrides `FULLNODE_API_INFO`.
    #[arg(long)]
    pub api: Option<ApiInfo>,
    /// Directory holding the sector database
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Address used for metrics collection server. By defaults binds on localhost on port 6117.
    #[arg(long)]
    pub metrics_address: Option<SocketAddr>,
    /// Do not post window proofs, only seal
    #[arg(long)]
    pub no_proving: bool,
    /// Enable or disable colored logging in `stdout`
    #[arg(long, default_value = "auto")]
    pub color: LoggingColor,
    /// Directory for an hourly rotated log file. No file logging when unset.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Enable tokio-console support
    #[arg(long)]
    pub tokio_console: bool,
    /// Send telemetry to `grafana loki`
    #[arg(long)]
    pub loki: bool,
    /// Endpoint of `grafana loki`
    #[arg(long, default_value = "http://127.0.0.1:3100")]
    pub loki_endpoint: String,
}

impl CliOpts {
    /// Reads the configuration file and applies the command line overrides on top.
    pub fn to_config(&self) -> anyhow::Result<(Config, Option<ConfigPath>)> {
        let (path, mut cfg) =
            crate::cli_shared::read_config(self.config.as_ref(), self.chain.clone())?;

        cfg.api.info = match &self.api {
            Some(info) => info.clone(),
            None => ApiInfo::from_env_or(cfg.api.info)?,
        };
        if let Some(data_dir) = &self.data_dir {
            cfg.client.data_dir.clone_from(data_dir);
        }
        if let Some(metrics_address) = self.metrics_address {
            cfg.client.metrics_address = metrics_address;
        }
        if self.no_proving {
            cfg.proving.enabled = false;
        }
        Ok((cfg, path))
    }
}

/// Where the configuration file was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigPath {
    Cli(PathBuf),
    Env(PathBuf),
    Project(PathBuf),
}

impl ConfigPath {
    pub fn to_path_buf(&self) -> &PathBuf {
        match self {
            ConfigPath::Cli(path) | ConfigPath::Env(path) | ConfigPath::Project(path) => path,
        }
    }
}

/// Looks for a configuration file in order: the command line, `FOREST_MINER_CONFIG_PATH`,
/// then `config.toml` in the project configuration directory.
pub fn find_config_path(config: Option<&PathBuf>) -> Option<ConfigPath> {
    if let Some(path) = config {
        return Some(ConfigPath::Cli(path.clone()));
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(ConfigPath::Env(PathBuf::from(path)));
    }
    ProjectDirs::from("com", "ChainSafe", "ForestMiner")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .filter(|path| path_exists(path))
        .map(ConfigPath::Project)
}

fn path_exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}
