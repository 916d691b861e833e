// Copyright 2025 jonefeewang@gmail.com
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

//! Retry policies for a congested producer queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// Decides how long to drain the producer queue before the next send attempt.
pub trait RetryPolicy: Send {
    /// Wait before retry number `retry` (1-based), or `None` to give up.
    fn backoff(&self, retry: u32) -> Option<Duration>;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Box<P> {
    fn backoff(&self, retry: u32) -> Option<Duration> {
        (**self).backoff(retry)
    }
}

/// Retry forever with a constant drain wait.
///
/// A broker that never drains the queue keeps the caller here until the
/// producer's shutdown token fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnboundedRetry {
    pub drain_wait: Duration,
}

impl Default for UnboundedRetry {
    fn default() -> Self {
        Self {
            drain_wait: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy for UnboundedRetry {
    fn backoff(&self, _retry: u32) -> Option<Duration> {
        Some(self.drain_wait)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRetry {
    pub max_retries: u32,
    pub drain_wait: Duration,
}

impl RetryPolicy for BoundedRetry {
    fn backoff(&self, retry: u32) -> Option<Duration> {
        (retry <= self.max_retries).then_some(self.drain_wait)
    }
}

/// Doubling drain wait, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: Option<u32>,
}

impl RetryPolicy for ExponentialBackoff {
    fn backoff(&self, retry: u32) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| retry > max) {
            return None;
        }
        let shift = retry.saturating_sub(1).min(31);
        let wait = self.initial.saturating_mul(1_u32 << shift);
        Some(wait.min(self.max))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    #[default]
    Unbounded,
    Bounded,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    /// poll timeout while waiting for the queue to drain; the first wait of
    /// the exponential strategy
    pub drain_wait_ms: u64,
    /// required by `bounded`, optional for `exponential`
    pub max_retries: Option<u32>,
    /// cap for the exponential strategy
    pub max_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            strategy: RetryStrategy::Unbounded,
            drain_wait_ms: 1000,
            max_retries: None,
            max_wait_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.drain_wait_ms == 0 {
            return Err(AppError::InvalidValue(
                "producer.retry.drain_wait_ms must be greater than 0".to_string(),
            ));
        }
        match self.strategy {
            RetryStrategy::Bounded if self.max_retries.is_none() => Err(AppError::InvalidValue(
                "producer.retry.max_retries is required by the bounded strategy".to_string(),
            )),
            RetryStrategy::Exponential if self.max_wait_ms < self.drain_wait_ms => {
                Err(AppError::InvalidValue(format!(
                    "producer.retry.max_wait_ms ({}) is below drain_wait_ms ({})",
                    self.max_wait_ms, self.drain_wait_ms
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn build(&self) -> Box<dyn RetryPolicy> {
        let drain_wait = Duration::from_millis(self.drain_wait_ms);
        match self.strategy {
            RetryStrategy::Unbounded => Box::new(UnboundedRetry { drain_wait }),
            RetryStrategy::Bounded => Box::new(BoundedRetry {
                max_retries: self.max_retries.unwrap_or(0),
                drain_wait,
            }),
            RetryStrategy::Exponential => Box::new(ExponentialBackoff {
                initial: drain_wait,
                max: Duration::from_millis(self.max_wait_ms),
                max_retries: self.max_retries,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const MS: fn(u64) -> Duration = Duration::from_millis;

    #[rstest]
    #[case(1, Some(MS(100)))]
    #[case(2, Some(MS(200)))]
    #[case(3, Some(MS(400)))]
    #[case(4, Some(MS(500)))]
    #[case(40, Some(MS(500)))]
    fn test_exponential_backoff(#[case] retry: u32, #[case] expected: Option<Duration>) {
        let policy = ExponentialBackoff {
            initial: MS(100),
            max: MS(500),
            max_retries: None,
        };
        assert_eq!(policy.backoff(retry), expected);
    }

    #[rstest]
    #[case(1, Some(MS(50)))]
    #[case(3, Some(MS(50)))]
    #[case(4, None)]
    fn test_bounded_retry(#[case] retry: u32, #[case] expected: Option<Duration>) {
        let policy = BoundedRetry {
            max_retries: 3,
            drain_wait: MS(50),
        };
        assert_eq!(policy.backoff(retry), expected);
    }

    #[test]
    fn test_unbounded_never_gives_up() {
        let policy = UnboundedRetry::default();
        assert_eq!(policy.backoff(1), Some(MS(1000)));
        assert_eq!(policy.backoff(u32::MAX), Some(MS(1000)));
    }

    #[test]
    fn test_exponential_respects_max_retries() {
        let policy = ExponentialBackoff {
            initial: MS(10),
            max: MS(1000),
            max_retries: Some(2),
        };
        assert!(policy.backoff(2).is_some());
        assert_eq!(policy.backoff(3), None);
    }

    #[test]
    fn test_build_from_config() {
        let config = RetryConfig {
            strategy: RetryStrategy::Bounded,
            drain_wait_ms: 20,
            max_retries: Some(1),
            max_wait_ms: 5000,
        };
        config.validate().unwrap();
        let policy = config.build();
        assert_eq!(policy.backoff(1), Some(MS(20)));
        assert_eq!(policy.backoff(2), None);

        let missing_cap = RetryConfig {
            max_retries: None,
            ..config
        };
        assert!(missing_cap.validate().is_err());
    }
}
