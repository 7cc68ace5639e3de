// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::{self, future::retry_notify, ExponentialBackoff};
use log::warn;
use reqwest::{Response, StatusCode};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);
pub const MAX_RETRY_PERIOD: Duration = Duration::from_secs(64);

// 2 + 4 + ... + 64 seconds, roughly two minutes of waiting in total.
pub const MAX_RETRY_ATTEMPTS: usize = 6;

/// Status codes that usually mean the server is restarting or overloaded.
pub const TRANSIENT_SERVER_ERRORS: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// When and how often a request is retried.
///
/// Connection failures are always retried. A response is retried only when
/// its status is listed in `retry_status`; every other response, success or
/// not, is handed back to the caller as-is. Once `max_retry` retries have
/// been spent, the last response (or connection error) is returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_status: Vec<StatusCode>,
    pub retry_period: Duration,
    pub max_retry_period: Duration,
    pub max_retry: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_status: TRANSIENT_SERVER_ERRORS.to_vec(),
            retry_period: DEFAULT_RETRY_PERIOD,
            max_retry_period: MAX_RETRY_PERIOD,
            max_retry: MAX_RETRY_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        if self.max_retry_period < retry_period {
            self.max_retry_period = retry_period;
        }
        self
    }

    pub fn with_max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry;
        self
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        self.retry_status.contains(&status)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.retry_period,
            initial_interval: self.retry_period,
            max_interval: self.max_retry_period,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

pub async fn send_retry_reqwest<F: Fn() -> Result<reqwest::RequestBuilder> + Send + Sync>(
    build_request: F,
    policy: &RetryPolicy,
) -> Result<Response> {
    let counter = AtomicUsize::new(0);
    let op = || async {
        let attempt_count = counter.fetch_add(1, Ordering::SeqCst);
        let request = build_request().map_err(|err| backoff::Error::Permanent(Err(err)))?;
        let result = request
            .send()
            .await
            .with_context(|| format!("request attempt {} failed", attempt_count + 1));

        match result {
            Err(x) => {
                if attempt_count >= policy.max_retry {
                    Err(backoff::Error::Permanent(Err(x)))
                } else {
                    Err(backoff::Error::transient(Err(x)))
                }
            }
            Ok(x) => {
                if !policy.should_retry(x.status()) {
                    Ok(x)
                } else if attempt_count >= policy.max_retry {
                    Err(backoff::Error::Permanent(Ok(x)))
                } else {
                    Err(backoff::Error::transient(Ok(x)))
                }
            }
        }
    };

    let result = retry_notify(
        policy.backoff(),
        op,
        |err: Result<Response, anyhow::Error>, dur| match err {
            Ok(response) => warn!(
                "request to {} returned {}, retrying in {:?}",
                response.url(),
                response.status(),
                dur
            ),
            Err(err) => warn!("request attempt failed, retrying in {:?}: {:?}", dur, err),
        },
    )
    .await;

    match result {
        Ok(response) | Err(Ok(response)) => Ok(response),
        Err(Err(err)) => Err(err),
    }
}

#[async_trait]
pub trait SendRetry {
    async fn send_retry(self, policy: &RetryPolicy) -> Result<Response>;
}

#[async_trait]
impl SendRetry for reqwest::RequestBuilder {
    async fn send_retry(self, policy: &RetryPolicy) -> Result<Response> {
        let result = send_retry_reqwest(
            || {
                self.try_clone().ok_or_else(|| {
                    anyhow::Error::msg("This request cannot be retried because it cannot be cloned")
                })
            },
            policy,
        )
        .await?;

        Ok(result)
    }
}
