// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::pin::Pin;

use futures::Future;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use crate::cli_shared::cli::{CliOpts, LogConfig};

type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[allow(unused_mut)]
pub fn setup_logger(log_config: &LogConfig, opts: &CliOpts) -> Vec<BackgroundTask> {
    let mut background_tasks: Vec<BackgroundTask> = vec![];
    let mut layers: Vec<Box<dyn tracing_subscriber::layer::Layer<Registry> + Send + Sync>> =
        // console logger
        vec![Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(opts.color.coloring_enabled())
                .with_filter(env_filter(log_config)),
        )];

    // file logger
    if let Some(log_dir) = &opts.log_dir {
        let file_appender = tracing_appender::rolling::hourly(log_dir, "forest-miner.log");
        layers.push(Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .with_writer(file_appender)
                .with_filter(env_filter(log_config)),
        ));
    }

    if opts.tokio_console {
        #[cfg(not(feature = "tokio-console"))]
        tracing::warn!(
            "`tokio-console` is unavailable, forest-miner needs to be recompiled with `tokio-console` feature"
        );

        #[cfg(feature = "tokio-console")]
        layers.push(Box::new(
            console_subscriber::ConsoleLayer::builder()
                .with_default_env()
                .spawn(),
        ));
    }

    if opts.loki {
        #[cfg(not(feature = "tracing-loki"))]
        tracing::warn!(
            "`tracing-loki` is unavailable, forest-miner needs to be recompiled with `tracing-loki` feature"
        );

        #[cfg(feature = "tracing-loki")]
        match loki_layer(&opts.loki_endpoint) {
            Ok((layer, task)) => {
                background_tasks.push(Box::pin(task));
                layers.push(Box::new(
                    layer.with_filter(tracing_subscriber::filter::LevelFilter::INFO),
                ));
            }
            Err(e) => eprintln!("loki logging disabled: {e:#}"),
        }
    }

    tracing_subscriber::registry().with(layers).init();
    background_tasks
}

#[cfg(feature = "tracing-loki")]
fn loki_layer(
    endpoint: &str,
) -> anyhow::Result<(tracing_loki::Layer, tracing_loki::BackgroundTask)> {
    use anyhow::Context as _;

    let url = tracing_loki::url::Url::parse(endpoint)
        .with_context(|| format!("Unable to parse loki endpoint {endpoint}"))?;
    let host = gethostname::gethostname()
        .to_str()
        .unwrap_or_default()
        .to_owned();
    tracing_loki::layer(
        url,
        [("host".into(), host)].into_iter().collect(),
        Default::default(),
    )
    .context("Unable to create loki layer")
}

/// `info`, then the configured module filters, then `RUST_LOG`. Later directives win.
fn env_filter(log_config: &LogConfig) -> EnvFilter {
    let directives = [
        "info".to_owned(),
        log_config.to_filter_string(),
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default(),
    ];
    EnvFilter::builder().parse_lossy(
        directives
            .iter()
            .filter(|it| !it.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(","),
    )
}

#[test]
fn test_default_env_filter() {
    let filter = env_filter(&LogConfig::default()).to_string();
    assert!(filter.contains("jsonrpsee=warn"));
}
