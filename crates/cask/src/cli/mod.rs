mod enqueue;
mod run;
mod validate;

pub use enqueue::EnqueueCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cask_core::config::CaskConfig;

/// CASK - cron scheduling and background jobs
#[derive(Parser)]
#[command(name = "cask")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and worker pool.
    Run(RunCommand),

    /// Enqueue a single job.
    Enqueue(EnqueueCommand),

    /// Check a configuration file and list its tasks.
    Validate(ValidateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Enqueue(cmd) => cmd.execute().await,
            Commands::Validate(cmd) => cmd.execute().await,
        }
    }
}

/// Load `.env` and the configuration file.
pub(crate) fn load_config(path: &str) -> Result<CaskConfig> {
    dotenvy::dotenv().ok();

    if !Path::new(path).exists() {
        anyhow::bail!("Configuration file not found: {}", path);
    }

    Ok(CaskConfig::from_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["cask", "run", "--dev"]).unwrap();
        match cli.command {
            Commands::Run(cmd) => {
                assert_eq!(cmd.config, "cask.toml");
                assert!(cmd.dev);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "cask",
            "enqueue",
            "SendEmail",
            r#"{"to":"a@b.com"}"#,
            "--config",
            "prod.toml",
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue(cmd) => {
                assert_eq!(cmd.job_type, "SendEmail");
                assert_eq!(cmd.payload.as_deref(), Some(r#"{"to":"a@b.com"}"#));
                assert_eq!(cmd.config, "prod.toml");
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_cli_parse_validate() {
        assert!(Cli::try_parse_from(["cask", "validate"]).is_ok());
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["cask", "deploy"]).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/cask.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cask.toml");
        std::fs::write(&path, "[project]\nname = \"bottle-tracker\"\n").unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.project.name, "bottle-tracker");
    }
}
