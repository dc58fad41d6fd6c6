// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use tempfile::TempDir;

pub fn miner() -> Command {
    let mut cmd = cargo_bin_cmd!("forest-miner");
    cmd.env_remove("FULLNODE_API_INFO")
        .env_remove("FOREST_MINER_CONFIG_PATH");
    cmd
}

pub fn create_tmp_config() -> (PathBuf, TempDir) {
    let temp_dir = tempfile::tempdir().expect("couldn't create temp dir");

    let config = format!(
        r#"
[client]
data_dir = "{}"

[chain]
network = {{ type = "calibnet" }}

[miner]
actor = "f01234"
worker = "f01235"
sector_size = "2KiB"

[sealing]
max_failure_retries = 2
"#,
        temp_dir.path().display()
    );

    let config_file = temp_dir.path().join("config.toml");
    std::fs::write(&config_file, config).expect("couldn't write config");
    (config_file, temp_dir)
}
