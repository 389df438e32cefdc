use std::time::Duration;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::context::JobContext;
use crate::error::Result;

/// A typed job handler.
pub trait CaskJob: Send + Sync + 'static {
    /// Payload type, deserialized from the queued JSON.
    type Args: DeserializeOwned + Serialize + Send + Sync + 'static;

    /// Job type name used for routing.
    const NAME: &'static str;

    /// Execute the job.
    fn execute(ctx: JobContext, args: Self::Args) -> BoxFuture<'static, Result<()>>;
}

/// Retry configuration applied by queue backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts before a job is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Maximum backoff in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::Exponential,
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_backoff_secs() -> u64 {
    300 // 5 minutes
}

impl RetryConfig {
    /// Calculate backoff duration after the given (1-based) attempt.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(1);
        let backoff = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * attempt.max(1),
            BackoffStrategy::Exponential => {
                base * 2u32.saturating_pow(attempt.saturating_sub(1).min(31))
            }
        };
        backoff.min(self.max_backoff())
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay each time.
    Fixed,
    /// Delay increases linearly.
    Linear,
    /// Delay doubles each time.
    #[default]
    Exponential,
}
