use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Tunables for retry budget, policy timeout, and dispatch concurrency.
/// Every field falls back to an environment variable, then a hardcoded
/// default, so embedding services can construct this with `from_env()`.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound on one dispatched operation, retries and delays included.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_ops")]
    pub max_concurrent_ops: usize,
}

fn default_max_attempts() -> u32 {
    std::env::var("VM_LIFECYCLE_MAX_ATTEMPTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3)
}

fn default_retry_delay_ms() -> u64 {
    std::env::var("VM_LIFECYCLE_RETRY_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2000)
}

fn default_op_timeout_secs() -> u64 {
    std::env::var("VM_LIFECYCLE_OP_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300) // 5 minutes
}

fn default_max_concurrent_ops() -> usize {
    std::env::var("VM_LIFECYCLE_MAX_CONCURRENT_OPS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(16)
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            op_timeout_secs: default_op_timeout_secs(),
            max_concurrent_ops: default_max_concurrent_ops(),
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}
