use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use crate::logging;
use crate::runtime::Cask;

/// Run the scheduler and worker pool.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "cask.toml")]
    pub config: String,

    /// Enable development mode (verbose logging).
    #[arg(long)]
    pub dev: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        let config = super::load_config(&self.config)?;
        logging::init(&config.observability.logging, self.dev)?;

        println!();
        println!(
            "  {}  v{}",
            style("CASK").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "  {} {} ({})",
            style("project").dim(),
            style(&config.project.name).bold(),
            config.project.environment
        );
        if self.dev {
            println!("  {} Development mode enabled", style("*").yellow());
        }
        println!();

        info!(config = %self.config, "Configuration loaded");

        let cask = Cask::builder().config(config).build().await?;
        cask.run().await?;

        println!("\n  {}", style("Stopped").dim());
        Ok(())
    }
}
