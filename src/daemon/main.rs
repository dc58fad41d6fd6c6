// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ffi::OsString;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::runtime::Builder as RuntimeBuilder;
use tracing::info;

use crate::cli_shared::{
    cli::{CliOpts, ConfigPath},
    logger,
};

/// CLI structure generated when interacting with the Forest miner binary
#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), author = env!("CARGO_PKG_AUTHORS"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[clap(flatten)]
    pub opts: CliOpts,
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the miner. This is the default.
    Run {
        /// Pledge this many filler sectors after startup
        #[arg(long, default_value_t = 0)]
        pledge: usize,
    },
    /// Manage the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Dump the effective configuration to standard output
    Dump,
}

pub fn main<ArgT>(args: impl IntoIterator<Item = ArgT>) -> anyhow::Result<()>
where
    ArgT: Into<OsString> + Clone,
{
    let Cli { opts, cmd } = Cli::parse_from(args);

    let (cfg, path) = opts.to_config().context("Error parsing config")?;

    let pledge = match cmd.unwrap_or(Command::Run { pledge: 0 }) {
        Command::Config(ConfigCommand::Dump) => {
            print!("{}", toml::to_string(&cfg)?);
            return Ok(());
        }
        Command::Run { pledge } => pledge,
    };

    let background_tasks = logger::setup_logger(&cfg.log, &opts);

    match &path {
        Some(ConfigPath::Env(path)) => info!("FOREST_MINER_CONFIG_PATH loaded: {}", path.display()),
        Some(ConfigPath::Project(path)) => info!("Project config loaded: {}", path.display()),
        Some(ConfigPath::Cli(path)) => info!("Config loaded: {}", path.display()),
        None => info!("Using default {} config", cfg.chain.network),
    }

    let rt = RuntimeBuilder::new_multi_thread().enable_all().build()?;
    for task in background_tasks {
        rt.spawn(task);
    }
    let ret = rt.block_on(super::start_interruptable(cfg, pledge));
    info!("Shutting down tokio...");
    rt.shutdown_timeout(Duration::from_secs_f32(0.5));
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::parse_from(["forest-miner", "--no-proving"]);
        assert!(cli.cmd.is_none());
        assert!(cli.opts.no_proving);
    }

    #[test]
    fn parses_config_dump() {
        let cli = Cli::parse_from(["forest-miner", "--chain", "calibnet", "config", "dump"]);
        assert!(matches!(cli.cmd, Some(Command::Config(ConfigCommand::Dump))));
        assert_eq!(
            cli.opts.chain,
            Some(crate::networks::NetworkChain::Calibnet)
        );
    }

    #[test]
    fn parses_pledge_count() {
        let cli = Cli::parse_from(["forest-miner", "run", "--pledge", "3"]);
        assert!(matches!(cli.cmd, Some(Command::Run { pledge: 3 })));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory as _;
        Cli::command().debug_assert();
    }
}
