// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Client {
    /// Holds the sector database.
    pub data_dir: PathBuf,
    pub enable_metrics_endpoint: bool,
    /// Metrics bind, e.g. 127.0.0.1:6117
    pub metrics_address: SocketAddr,
    /// How often the full node is asked for its head.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub head_poll_interval: Duration,
}

impl Default for Client {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("com", "ChainSafe", "ForestMiner")
            .map(|dir| dir.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".forest-miner"));
        Self {
            data_dir,
            enable_metrics_endpoint: true,
            metrics_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6117),
            head_poll_interval: Duration::from_secs(1),
        }
    }
}
