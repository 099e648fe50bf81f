//! Job board client
//!
//! Job board keeps the list of VM images that build jobs can request. The
//! bot registers macOS images there under an `osx_image` tag.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Infrastructure name macOS images are registered under.
const INFRA: &str = "jupiterbrain";
const BASIC_AUTH_USER: &str = "macbot";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum JobBoardError {
    #[error("request to job board failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("job board responded with status {0}")]
    Status(u16),

    #[error("unexpected job board response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A macOS image registered in job board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBoardImage {
    pub id: i64,
    /// Value of the image's `osx_image` tag
    pub tag: String,
    pub name: String,
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn list_images(&self) -> Result<Vec<JobBoardImage>, JobBoardError>;

    /// Register `image` as a macOS image with the given `osx_image` tag.
    async fn register_image(&self, image: &str, tag: &str) -> Result<(), JobBoardError>;
}

/// Job board instances keyed by environment name (`production`, `staging`, ...).
pub type JobBoards = HashMap<String, std::sync::Arc<dyn ImageRegistry>>;

pub struct JobBoard {
    url: String,
    password: String,
    client: Client,
}

impl JobBoard {
    pub fn new(url: &str, password: &str) -> Result<Self, JobBoardError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            password: password.to_string(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct ImageListPayload {
    #[serde(default)]
    data: Vec<ImagePayload>,
}

#[derive(Deserialize)]
struct ImagePayload {
    id: i64,
    name: String,
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn parse_image_list(body: &str) -> Result<Vec<JobBoardImage>, JobBoardError> {
    let payload: ImageListPayload = serde_json::from_str(body)?;
    Ok(payload
        .data
        .into_iter()
        .map(|image| JobBoardImage {
            id: image.id,
            tag: image.tags.get("osx_image").cloned().unwrap_or_default(),
            name: image.name,
        })
        .collect())
}

fn registration_form(image: &str, tag: &str) -> [(&'static str, String); 3] {
    [
        ("infra", INFRA.to_string()),
        ("name", image.to_string()),
        ("tags", format!("os:osx,osx_image:{}", tag)),
    ]
}

#[async_trait]
impl ImageRegistry for JobBoard {
    async fn list_images(&self) -> Result<Vec<JobBoardImage>, JobBoardError> {
        let resp = self
            .client
            .get(format!("{}/images?infra={}", self.url, INFRA))
            .basic_auth(BASIC_AUTH_USER, Some(&self.password))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(JobBoardError::Status(resp.status().as_u16()));
        }

        let images = parse_image_list(&resp.text().await?)?;
        debug!(count = images.len(), "Listed job board images");
        Ok(images)
    }

    async fn register_image(&self, image: &str, tag: &str) -> Result<(), JobBoardError> {
        let resp = self
            .client
            .post(format!("{}/images", self.url))
            .basic_auth(BASIC_AUTH_USER, Some(&self.password))
            .form(&registration_form(image, tag))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(JobBoardError::Status(resp.status().as_u16()));
        }

        info!(image, tag, "Registered image with job board");
        Ok(())
    }
}
