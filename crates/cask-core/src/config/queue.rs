use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};
use crate::job::RetryConfig;

/// Which queue implementation backs the dispatcher and workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process queue. Jobs do not survive a restart.
    #[default]
    Memory,
    /// Postgres table shared by every process.
    Postgres,
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,

    /// Connection URL (postgres backend).
    #[serde(default)]
    pub url: Option<String>,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,

    /// Delay between claim attempts while a lease call waits (postgres backend).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Seconds before an unacknowledged lease is handed out again.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            url: None,
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
            poll_interval_ms: default_poll_interval(),
            lease_ttl_secs: default_lease_ttl(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    250
}

fn default_lease_ttl() -> u64 {
    300
}

impl QueueConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.backend == QueueBackend::Postgres
            && self.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(CaskError::Config(
                "queue.url is required for the postgres backend".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(CaskError::Config(
                "queue.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(CaskError::Config(
                "queue.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.lease_ttl_secs == 0 {
            return Err(CaskError::Config(
                "queue.lease_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
