mod cli;
mod config;
mod setup;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use config::MacbotConfig;
use macbot_core::start_message_loop;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = MacbotConfig::load(cli.config.as_deref())?;
    let services = setup::build_services(&config, cli.debug)?;
    let router = Arc::new(setup::build_router(&services)?);

    let channel = setup::setup_slack_channel(&config)
        .context("Slack is not configured: set SLACK_BOT_TOKEN and SLACK_APP_TOKEN")?;
    channel.connect().await?;

    let shutdown = CancellationToken::new();
    let message_loop = start_message_loop(Arc::new(channel), router, shutdown.clone());

    info!("macbot running. Press Ctrl+C to stop.");
    wait_for_shutdown_signal().await?;

    info!("Shutting down");
    shutdown.cancel();
    message_loop.await?;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => {}
            result = tokio::signal::ctrl_c() => result?,
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
