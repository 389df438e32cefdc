use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use console::style;

use cask_core::config::{CaskConfig, TaskConfig};
use cask_core::cron::{parse_timezone, CronSchedule};

/// Check a configuration file and list its tasks.
#[derive(Parser)]
pub struct ValidateCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "cask.toml")]
    pub config: String,
}

/// One row of the validate report.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TaskSummary {
    pub name: String,
    pub schedule: String,
    pub job_type: String,
    pub next_fire: Option<String>,
    pub active: bool,
}

impl ValidateCommand {
    /// Execute the validate command.
    pub async fn execute(self) -> Result<()> {
        let config = super::load_config(&self.config)?;

        println!();
        println!(
            "  {} {} is valid ({} environment, {} queue)",
            style("ok").green().bold(),
            self.config,
            config.project.environment,
            format!("{:?}", config.queue.backend).to_lowercase()
        );
        println!();

        for summary in summarize(&config)? {
            if summary.active {
                println!(
                    "  {} {:<28} {:<16} -> {:<24} next {}",
                    style("*").cyan(),
                    summary.name,
                    summary.schedule,
                    summary.job_type,
                    summary.next_fire.as_deref().unwrap_or("never")
                );
            } else {
                println!(
                    "  {} {:<28} {}",
                    style("-").dim(),
                    style(&summary.name).dim(),
                    style("not registered in this environment").dim()
                );
            }
        }
        println!();
        Ok(())
    }
}

pub(crate) fn summarize(config: &CaskConfig) -> Result<Vec<TaskSummary>> {
    let now = Utc::now();
    config
        .tasks
        .iter()
        .map(|task| summarize_task(task, config.project.environment.as_str(), now))
        .collect()
}

fn summarize_task(
    task: &TaskConfig,
    environment: &str,
    now: chrono::DateTime<Utc>,
) -> Result<TaskSummary> {
    let schedule = CronSchedule::new(&task.schedule)?;
    let timezone = parse_timezone(&task.timezone)?;

    Ok(TaskSummary {
        name: task.name.clone(),
        schedule: task.schedule.clone(),
        job_type: task.job_type.clone(),
        next_fire: schedule
            .next_after_in_tz(now, timezone)
            .map(|t| t.with_timezone(&timezone).to_rfc3339()),
        active: task.enabled_in(environment),
    })
}
