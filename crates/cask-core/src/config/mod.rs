mod observability;
mod queue;

pub use observability::{LoggingConfig, ObservabilityConfig};
pub use queue::{QueueBackend, QueueConfig};

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cron::{parse_timezone, CronSchedule};
use crate::error::{CaskError, Result};

/// Root configuration for CASK.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaskConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Cron scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Queue backend configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Recurring tasks that enqueue a job on every fire.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl CaskConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CaskError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| CaskError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(CaskError::Config(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(CaskError::Config(
                "scheduler.tick_interval_ms must be positive".to_string(),
            ));
        }

        self.queue.validate()?;

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.name.as_str()) {
                return Err(CaskError::DuplicateRegistration(format!(
                    "task '{}' is defined more than once",
                    task.name
                )));
            }
            task.validate()?;
        }

        Ok(())
    }

    /// Tasks that should register in the configured environment.
    pub fn active_tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        let environment = self.project.environment.as_str();
        self.tasks
            .iter()
            .filter(move |task| task.enabled_in(environment))
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name.
    #[serde(default = "default_project_name")]
    pub name: String,

    /// Deployment environment, used to filter tasks.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            environment: default_environment(),
        }
    }
}

fn default_project_name() -> String {
    "cask".to_string()
}

fn default_environment() -> String {
    std::env::var("CASK_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Cron scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether this process runs the scheduler.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often schedules are evaluated, in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Grace period for in-flight task runs on shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_drain_timeout() -> u64 {
    30
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether this process runs a worker pool.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum concurrent jobs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long a single lease call may block, in milliseconds.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_ms: u64,

    /// Grace period for in-flight jobs on shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            lease_timeout_ms: default_lease_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}

fn default_lease_timeout() -> u64 {
    5000
}

/// A configured recurring task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task name, also the monitor slug.
    pub name: String,

    /// Cron expression.
    pub schedule: String,

    /// IANA timezone the expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Skip a fire while the previous one is still running.
    #[serde(default = "default_true")]
    pub prevent_overrun: bool,

    /// Job type enqueued on every fire.
    pub job_type: String,

    /// Payload enqueued with the job.
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,

    /// Environments the task registers in. Empty means all.
    #[serde(default)]
    pub environments: Vec<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TaskConfig {
    /// Whether the task registers in `environment`.
    pub fn enabled_in(&self, environment: &str) -> bool {
        self.environments.is_empty() || self.environments.iter().any(|e| e == environment)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CaskError::Config("task name must not be empty".to_string()));
        }
        if self.job_type.trim().is_empty() {
            return Err(CaskError::Config(format!(
                "task '{}' has an empty job_type",
                self.name
            )));
        }
        CronSchedule::new(&self.schedule)?;
        parse_timezone(&self.timezone)?;
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") else {
        return result;
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => result = result.replace(&cap[0], &value),
            Err(_) => tracing::warn!(
                variable = var_name,
                "Environment variable referenced in config is not set"
            ),
        }
    }

    result
}
