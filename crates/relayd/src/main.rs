//! relayd - message pipeline daemon
//!
//! # Usage
//!
//! ```bash
//! relayd --config configs/relay.toml
//! relayd --config configs/relay.toml --log-level debug
//! ```
//!
//! Loads the configuration, builds the plugin graph and runs it until
//! ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_config::Config;
use relay_pipeline::{PipelineConfig, PluginRegistry};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// relayd - message pipeline daemon
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "configs/relay.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level)?;

    let registry = PluginRegistry::with_builtins();
    let mut pipeline = PipelineConfig::new(registry, config.global.clone());
    pipeline
        .load_from_config(&config)
        .context("loading plugins")?;

    let pipeline = Arc::new(pipeline);
    pipeline.start().context("starting pipeline")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");

    pipeline.shutdown().await;
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
