//! Retry configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempt budget and per-attempt acknowledgment timeout
///
/// ```toml
/// [retry]
/// retries = 3
/// attempt_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts; 0 fails without sending
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    5000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            retries,
            attempt_timeout_ms: attempt_timeout.as_millis() as u64,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}
