// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shim::clock::ChainEpoch;

/// Epochs in a day at the mainnet block delay.
pub const EPOCHS_IN_DAY: ChainEpoch = 2880;

/// Builtin `filecoin` network chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum NetworkChain {
    Mainnet,
    Calibnet,
    Devnet(String),
}

impl FromStr for NetworkChain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(NetworkChain::Mainnet),
            "calibnet" => Ok(NetworkChain::Calibnet),
            name => Ok(NetworkChain::Devnet(name.to_owned())),
        }
    }
}

impl Display for NetworkChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkChain::Mainnet => write!(f, "mainnet"),
            NetworkChain::Calibnet => write!(f, "calibnet"),
            NetworkChain::Devnet(name) => write!(f, "{name}"),
        }
    }
}

/// Protocol parameters the sealing pipeline and the proof scheduler depend on.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct Policy {
    /// Depth after which a tipset is considered final.
    pub chain_finality: ChainEpoch,
    /// Delay between pre-commit inclusion and the interactive seal randomness.
    pub pre_commit_challenge_delay: ChainEpoch,
    /// Confirmations required before the interactive seal randomness is drawn.
    pub interactive_porep_confidence: ChainEpoch,
    /// Confirmations required when waiting for a message receipt.
    pub message_confidence: ChainEpoch,
    /// How far behind the head sealing tickets are drawn.
    pub seal_randomness_lookback: ChainEpoch,
    /// Oldest ticket the miner actor accepts in a pre-commit.
    pub max_pre_commit_randomness_lookback: ChainEpoch,
    pub wpost_period_deadlines: u64,
    pub wpost_challenge_window: ChainEpoch,
    pub wpost_challenge_lookback: ChainEpoch,
    pub fault_declaration_cutoff: ChainEpoch,
}

impl Default for Policy {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Policy {
    pub fn mainnet() -> Self {
        let chain_finality = 900;
        Self {
            chain_finality,
            pre_commit_challenge_delay: 150,
            interactive_porep_confidence: 6,
            message_confidence: 5,
            seal_randomness_lookback: chain_finality,
            max_pre_commit_randomness_lookback: EPOCHS_IN_DAY + chain_finality,
            wpost_period_deadlines: 48,
            wpost_challenge_window: 60,
            wpost_challenge_lookback: 20,
            fault_declaration_cutoff: 70,
        }
    }

    pub fn devnet() -> Self {
        Self {
            pre_commit_challenge_delay: 10,
            interactive_porep_confidence: 2,
            message_confidence: 1,
            seal_randomness_lookback: 10,
            ..Self::mainnet()
        }
    }

    pub fn wpost_proving_period(&self) -> ChainEpoch {
        self.wpost_challenge_window * self.wpost_period_deadlines as ChainEpoch
    }
}

/// Defines the network parameters the miner runs against.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct ChainConfig {
    pub network: NetworkChain,
    pub block_delay_secs: u32,
    pub propagation_delay_secs: u32,
    pub policy: Policy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ChainConfig {
    pub fn mainnet() -> Self {
        Self {
            network: NetworkChain::Mainnet,
            block_delay_secs: 30,
            propagation_delay_secs: 10,
            policy: Policy::mainnet(),
        }
    }

    pub fn calibnet() -> Self {
        Self {
            network: NetworkChain::Calibnet,
            ..Self::mainnet()
        }
    }

    pub fn devnet() -> Self {
        Self {
            network: NetworkChain::Devnet("devnet".to_string()),
            block_delay_secs: 4,
            propagation_delay_secs: 1,
            policy: Policy::devnet(),
        }
    }

    pub fn from_chain(network_chain: &NetworkChain) -> Self {
        match network_chain {
            NetworkChain::Mainnet => Self::mainnet(),
            NetworkChain::Calibnet => Self::calibnet(),
            NetworkChain::Devnet(name) => Self {
                network: NetworkChain::Devnet(name.clone()),
                ..Self::devnet()
            },
        }
    }
}
