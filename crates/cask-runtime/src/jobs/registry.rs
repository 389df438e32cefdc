use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use cask_core::job::{CaskJob, JobContext};
use cask_core::{CaskError, Result};
use futures::future::BoxFuture;
use serde_json::Value;

/// Type-erased job handler.
pub type JobHandler = Arc<dyn Fn(JobContext, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Registry of job handlers, keyed by job type.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type.
    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: JobHandler =
            Arc::new(move |ctx, payload| -> BoxFuture<'static, Result<()>> {
                Box::pin(handler(ctx, payload))
            });
        self.insert(job_type.into(), handler)
    }

    /// Register a typed job. The payload is deserialized into `J::Args`.
    pub fn register_job<J: CaskJob>(&mut self) -> Result<()> {
        let handler: JobHandler =
            Arc::new(|ctx, payload| -> BoxFuture<'static, Result<()>> {
                Box::pin(async move {
                    let args: J::Args = serde_json::from_value(payload).map_err(|e| {
                        CaskError::HandlerExecution(format!(
                            "invalid payload for {}: {}",
                            J::NAME,
                            e
                        ))
                    })?;
                    J::execute(ctx, args).await
                })
            });
        self.insert(J::NAME.to_string(), handler)
    }

    fn insert(&mut self, job_type: String, handler: JobHandler) -> Result<()> {
        if self.handlers.contains_key(&job_type) {
            return Err(CaskError::DuplicateRegistration(format!(
                "job type '{}' already has a handler",
                job_type
            )));
        }
        tracing::debug!(job_type = %job_type, "Job handler registered");
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Look up the handler for a job type.
    pub fn resolve(&self, job_type: &str) -> Result<JobHandler> {
        self.handlers
            .get(job_type)
            .cloned()
            .ok_or_else(|| CaskError::UnregisteredHandler(job_type.to_string()))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
