//! Configuration file support
//!
//! Loads configuration from ~/.config/macbot/config.toml, then lets
//! environment variables override individual settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environments whose job board can be configured from the environment.
const JOB_BOARD_ENVS: [&str; 2] = ["production", "staging"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacbotConfig {
    #[serde(default)]
    pub slack: SlackSection,
    #[serde(default)]
    pub imaged: ImagedSection,
    /// Job board instances keyed by environment name
    #[serde(default)]
    pub job_boards: BTreeMap<String, JobBoardSection>,
    #[serde(default)]
    pub debug: DebugSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackSection {
    /// Bot User OAuth Token (xoxb-...)
    pub bot_token: Option<String>,
    /// App-Level Token for Socket Mode (xapp-...)
    pub app_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagedSection {
    /// Twirp service prefix of the image-build service
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobBoardSection {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugSection {
    /// Name of the fake host the debug backend hands out
    pub host_name: Option<String>,
}

impl MacbotConfig {
    /// Load from `path`, or the default location, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("macbot").join("config.toml"))
    }

    /// Override settings from variables returned by `lookup`. Empty values
    /// are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = var("SLACK_BOT_TOKEN") {
            self.slack.bot_token = Some(token);
        }
        if let Some(token) = var("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(token);
        }
        if let Some(url) = var("IMAGED_URL") {
            self.imaged.url = Some(url);
        }

        for env in JOB_BOARD_ENVS {
            let prefix = format!("JOB_BOARD_{}", env.to_uppercase());
            let url = var(&format!("{}_URL", prefix));
            let password = var(&format!("{}_PASSWORD", prefix));
            if url.is_none() && password.is_none() {
                continue;
            }

            let board = self.job_boards.entry(env.to_string()).or_default();
            if let Some(url) = url {
                board.url = url;
            }
            if let Some(password) = password {
                board.password = password;
            }
        }
    }
}
