// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Bounded retries with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{FetchError, FetchRequest, FetchedSecret, SecretFetcher};

/// Configuration for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub minimum_delay_secs: f32,
    /// Upper bound of a single delay.
    pub maximum_delay_secs: f32,
    /// Factor by which the delay grows per attempt.
    pub factor: f32,
    /// Random jitter added to each delay.
    pub jitter_secs: f32,
}

/// Upper bound of configurable backoff delays and jitter.
const MAX_DELAY_SECS: f32 = 3600.0;
const MAX_DELAY: Duration = Duration::from_secs(3600);

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            minimum_delay_secs: 0.2,
            maximum_delay_secs: 2.0,
            factor: 2.0,
            jitter_secs: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        let values = [
            self.minimum_delay_secs,
            self.maximum_delay_secs,
            self.factor,
            self.jitter_secs,
        ];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err("backoff values must be finite and non-negative");
        }
        if self.maximum_delay_secs > MAX_DELAY_SECS || self.jitter_secs > MAX_DELAY_SECS {
            return Err("backoff delays must not exceed one hour");
        }
        if self.minimum_delay_secs > self.maximum_delay_secs {
            return Err("minimum_delay_secs must not exceed maximum_delay_secs");
        }
        if self.factor < 1.0 {
            return Err("backoff factor must be at least 1");
        }
        Ok(())
    }
}

/// Exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] from the given configuration.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Returns the delay after the given (zero based) failed attempt.
    pub fn duration(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff = self.config.minimum_delay_secs * self.config.factor.powi(exponent);
        let backoff = backoff + rand::random::<f32>() * self.config.jitter_secs;
        let maximum = Duration::try_from_secs_f32(self.config.maximum_delay_secs)
            .map_or(MAX_DELAY, |maximum| maximum.min(MAX_DELAY));
        Duration::try_from_secs_f32(backoff)
            .map_or(maximum, |backoff| backoff.min(maximum))
    }
}

/// Retry policy of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Timeout of a single attempt.
    pub attempt_timeout: Duration,
    /// Delay between attempts.
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Validates the policy.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1");
        }
        if self.attempt_timeout.is_zero() {
            return Err("attempt_timeout must be greater than zero");
        }
        self.backoff.validate()
    }
}

/// A [SecretFetcher] that bounds every attempt by a timeout and retries transient failures.
///
/// [FetchError::ServiceRejected], [FetchError::MalformedResponse] and
/// [FetchError::InvalidRequest] are returned without retrying.
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
    backoff: ExponentialBackoff,
}

impl<F: SecretFetcher> RetryingFetcher<F> {
    /// Wraps `inner` with the given retry policy.
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        let backoff = ExponentialBackoff::new(policy.backoff);
        Self {
            inner,
            policy,
            backoff,
        }
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<FetchedSecret, FetchError> {
        match tokio::time::timeout(
            self.policy.attempt_timeout,
            self.inner.fetch_secret(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => {
                Err(FetchError::Timeout {
                    server: request.server_address.clone(),
                    timeout: self.policy.attempt_timeout,
                })
            }
        }
    }
}

#[async_trait]
impl<F: SecretFetcher> SecretFetcher for RetryingFetcher<F> {
    async fn fetch_secret(&self, request: &FetchRequest) -> Result<FetchedSecret, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(secret) => return Ok(secret),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.backoff.duration(attempt);
                    attempt += 1;
                    tracing::warn!(
                        server = %request.server_address,
                        src = %request.src,
                        dst = %request.dst,
                        attempt,
                        max_attempts,
                        ?delay,
                        error = %e,
                        "Fetching delegation secret failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
