// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use parking_lot::{RwLock, RwLockWriteGuard};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        gauge::Gauge,
        histogram::{Histogram, exponential_buckets},
    },
};
use std::sync::LazyLock;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tracing::warn;

static DEFAULT_REGISTRY: LazyLock<RwLock<prometheus_client::registry::Registry>> =
    LazyLock::new(Default::default);

static COLLECTOR_REGISTRY: LazyLock<RwLock<prometheus_client::registry::Registry>> =
    LazyLock::new(Default::default);

pub fn collector_registry<'a>() -> RwLockWriteGuard<'a, prometheus_client::registry::Registry> {
    COLLECTOR_REGISTRY.write()
}

pub static SECTOR_TRANSITIONS: LazyLock<Family<StateLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    DEFAULT_REGISTRY.write().register(
        "sector_state_transitions",
        "Number of sector transitions, by the state entered",
        metric.clone(),
    );
    metric
});

pub static SECTOR_FAILURES: LazyLock<Family<StateLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    DEFAULT_REGISTRY.write().register(
        "sector_failures",
        "Number of sectors entering a failure state, by state",
        metric.clone(),
    );
    metric
});

pub static CHAIN_HEAD_HEIGHT: LazyLock<Gauge> = LazyLock::new(|| {
    let metric = Gauge::default();
    DEFAULT_REGISTRY.write().register(
        "chain_head_height",
        "Height of the latest head seen by the chain event scheduler",
        metric.clone(),
    );
    metric
});

pub static WINDOW_POST_SUBMISSIONS: LazyLock<Counter> = LazyLock::new(|| {
    let metric = Counter::default();
    DEFAULT_REGISTRY.write().register(
        "window_post_submissions",
        "Number of window proofs pushed to the chain",
        metric.clone(),
    );
    metric
});

pub static WINDOW_POST_FAILURES: LazyLock<Family<KindLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    DEFAULT_REGISTRY.write().register(
        "window_post_failures",
        "Number of failed window proof deadlines, by failing phase",
        metric.clone(),
    );
    metric
});

pub static WINDOW_POST_PROOF_TIME: LazyLock<Histogram> = LazyLock::new(|| {
    // 1s up to about an hour
    let metric = Histogram::new(exponential_buckets(1.0, 2.0, 12));
    DEFAULT_REGISTRY.write().register(
        "window_post_proof_time",
        "Duration of window proof generation in seconds",
        metric.clone(),
    );
    metric
});

pub async fn init_prometheus(prometheus_listener: TcpListener) -> anyhow::Result<()> {
    // Add the process collector to the registry
    if let Err(err) = kubert_prometheus_process::register(
        collector_registry().sub_registry_with_prefix("process"),
    ) {
        warn!("Failed to register process metrics: {err}");
    }

    let app = Router::new()
        .route("/metrics", get(collect_prometheus_metrics))
        .layer(CompressionLayer::new());

    Ok(axum::serve(prometheus_listener, app.into_make_service()).await?)
}

fn encode_metrics() -> String {
    let mut metrics = String::new();
    if let Err(e) =
        prometheus_client::encoding::text::encode_registry(&mut metrics, &DEFAULT_REGISTRY.read())
    {
        warn!("failed to encode the default metrics registry: {e}");
    };
    if let Err(e) =
        prometheus_client::encoding::text::encode_registry(&mut metrics, &COLLECTOR_REGISTRY.read())
    {
        warn!("failed to encode the collector metrics registry: {e}");
    };
    if let Err(e) = prometheus_client::encoding::text::encode_eof(&mut metrics) {
        warn!("failed to encode metrics eof {e}");
    };
    metrics
}

async fn collect_prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet, derive_more::Constructor)]
pub struct StateLabel {
    state: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet, derive_more::Constructor)]
pub struct KindLabel {
    kind: &'static str,
}

pub mod values {
    use super::KindLabel;

    /// Partitions, sectors or randomness could not be read.
    pub const POST_SETUP: KindLabel = KindLabel::new("setup");
    /// The prover returned an error.
    pub const POST_COMPUTE: KindLabel = KindLabel::new("compute");
    /// The proof message could not be pushed.
    pub const POST_SUBMIT: KindLabel = KindLabel::new("submit");
    /// The proof message landed with a non-zero exit code.
    pub const POST_RECEIPT: KindLabel = KindLabel::new("receipt");
}

pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        let duration = Instant::now() - self.start;
        self.histogram.observe(duration.as_secs_f64());
    }
}

pub trait HistogramTimerExt {
    fn start_timer(&self) -> HistogramTimer<'_>;
}

impl HistogramTimerExt for Histogram {
    fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }
}
