use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::info;

use macbot_core::channel::SlackChannel;
use macbot_core::images::{ImageBuilds, TwirpImagesClient};
use macbot_core::job_board::{ImageRegistry, JobBoard, JobBoards};
use macbot_core::{DebugBackend, HostCoordinator, Router, Services, register_commands};

use crate::config::MacbotConfig;

const DEFAULT_DEBUG_HOST: &str = "1.2.3.4";

/// Build the collaborators the commands talk to.
///
/// Only the debug backend ships with this binary, so `debug` must be set.
pub fn build_services(config: &MacbotConfig, debug: bool) -> Result<Services> {
    if !debug {
        bail!("No provisioning backend is available in this build; run with --debug");
    }

    let host_name = config
        .debug
        .host_name
        .as_deref()
        .unwrap_or(DEFAULT_DEBUG_HOST);
    info!(host = host_name, "Using debug backend");
    let hosts = Arc::new(HostCoordinator::new(Arc::new(DebugBackend::new(host_name))));

    let images = config
        .imaged
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .map(|url| Arc::new(TwirpImagesClient::new(url)) as Arc<dyn ImageBuilds>);
    if images.is_none() {
        info!("imaged is not configured, image build commands disabled");
    }

    let mut job_boards = JobBoards::new();
    for (env, board) in &config.job_boards {
        if board.url.is_empty() {
            continue;
        }
        let client = JobBoard::new(&board.url, &board.password)
            .with_context(|| format!("Failed to set up job board for {}", env))?;
        job_boards.insert(env.clone(), Arc::new(client) as Arc<dyn ImageRegistry>);
    }

    Ok(Services {
        hosts,
        images,
        job_boards: Arc::new(job_boards),
    })
}

pub fn build_router(services: &Services) -> Result<Router> {
    let mut router = Router::new();
    register_commands(&mut router, services)?;
    Ok(router)
}

/// Set up the Slack channel. Requires both tokens.
pub fn setup_slack_channel(config: &MacbotConfig) -> Option<SlackChannel> {
    let bot_token = config.slack.bot_token.as_deref().filter(|t| !t.is_empty())?;
    let app_token = config.slack.app_token.as_deref().filter(|t| !t.is_empty())?;
    Some(SlackChannel::with_tokens(bot_token, app_token))
}
