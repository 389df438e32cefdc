use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use serde_json::Value;

use cask_core::config::QueueBackend;
use cask_runtime::jobs::Dispatcher;

use crate::runtime::open_queue;

/// Enqueue a single job.
#[derive(Parser)]
pub struct EnqueueCommand {
    /// Job type to enqueue.
    pub job_type: String,

    /// JSON payload (defaults to `{}`).
    pub payload: Option<String>,

    /// Configuration file path.
    #[arg(short, long, default_value = "cask.toml")]
    pub config: String,
}

impl EnqueueCommand {
    /// Execute the enqueue command.
    pub async fn execute(self) -> Result<()> {
        let config = super::load_config(&self.config)?;
        if config.queue.backend == QueueBackend::Memory {
            anyhow::bail!(
                "The memory queue lives inside `cask run`; set queue.backend = \"postgres\" to enqueue from the CLI"
            );
        }

        let payload = parse_payload(self.payload.as_deref())?;
        let dispatcher = Dispatcher::new(open_queue(&config.queue).await?);
        let handle = dispatcher.enqueue(&self.job_type, payload).await?;

        println!(
            "  {} Enqueued {} ({})",
            style("+").green(),
            style(&handle.job_type).bold(),
            handle.id
        );
        Ok(())
    }
}

fn parse_payload(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Object(serde_json::Map::new())),
        Some(raw) => serde_json::from_str(raw).context("Payload must be valid JSON"),
    }
}
