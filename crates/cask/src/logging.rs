use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cask_core::config::LoggingConfig;

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(config: &LoggingConfig, dev: bool) -> String {
    if dev {
        "debug".to_string()
    } else {
        config.level.clone()
    }
}

/// Install the global tracing subscriber.
pub fn init(config: &LoggingConfig, dev: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config, dev)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(dev))
            .try_init()?;
    }
    Ok(())
}
