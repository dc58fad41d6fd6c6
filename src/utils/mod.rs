// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod misc;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// How often, and how far apart, [`retry`] calls the node again.
#[derive(Debug, Clone, Copy, smart_default::SmartDefault)]
pub struct RetryArgs {
    #[default(5)]
    pub max_attempts: usize,
    #[default(Duration::from_millis(200))]
    pub delay: Duration,
}

/// Every attempt failed. Carries the error of the last one.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryError<E: Display> {
    pub attempts: usize,
    pub last: E,
}

/// Runs the future created by `make_fut` until it succeeds, sleeping
/// `args.delay` between failed attempts.
#[tracing::instrument(skip_all)]
pub async fn retry<F, T, E>(
    args: RetryArgs,
    mut make_fut: impl FnMut() -> F,
) -> Result<T, RetryError<E>>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match make_fut().await {
            Ok(ok) => return Ok(ok),
            Err(last) if attempt >= args.max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last,
                });
            }
            Err(err) => warn!(attempt, "retrying after error: {err}"),
        }
        attempt += 1;
        sleep(args.delay).await;
    }
}
