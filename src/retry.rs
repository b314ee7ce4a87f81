// 🔁 Retry Policy - exponential backoff with a hard per-attempt timeout
//
// Every outbound call (index fetch, document download, notification) runs
// through one of these. Exhaustion surfaces as a typed NetworkError.

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Hard timeout applied to each attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&NetworkConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &NetworkConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            timeout: config.timeout(),
        }
    }

    /// Single attempt, no waiting between failures
    pub fn no_retry(timeout: Duration) -> Self {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            timeout,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `call` until it succeeds, the attempts run out, or every attempt times out
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, NetworkError>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (message, timed_out) = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => (e.to_string(), false),
                Err(_) => (format!("timed out after {:?}", self.timeout), true),
            };

            if attempt >= max_attempts {
                warn!(operation, attempt, "giving up: {}", message);
                return Err(NetworkError {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message,
                    timed_out,
                });
            }

            let delay = self.backoff(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying: {}",
                message
            );
            tokio::time::sleep(delay).await;
        }
    }
}
