// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exponential backoff policy, passed to each driver instead of ad-hoc
/// sleeps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Runs `action` until it succeeds, the error is not retriable, or
/// `config.max_attempts` is exhausted.
pub async fn with_retries<'a, T, E, F>(
    target: &str,
    op: &str,
    config: &RetryConfig,
    action: F,
    is_retriable: fn(&E) -> bool,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>,
{
    let mut delay = config.min_delay;
    let mut attempt = 1u32;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < config.max_attempts && is_retriable(&error) => {
                warn!(
                    target_name = target,
                    op,
                    attempt,
                    "retrying in {delay:?} after error: {error}"
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(config.multiplier).min(config.max_delay);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
