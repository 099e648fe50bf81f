//! Image builds
//!
//! The image-build service (imaged) runs packer template builds and keeps
//! their records. The bot only starts builds and reads their state.

mod twirp;

pub use twirp::TwirpImagesClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagesError {
    #[error("request to imaged failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("imaged returned {code}: {msg}")]
    Twirp { code: String, msg: String },

    #[error("imaged response did not include a build")]
    MissingBuild,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    #[default]
    Created,
    Started,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One build of an image template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Build {
    #[serde(deserialize_with = "int64")]
    pub id: i64,
    pub name: String,
    /// Branch or ref the build was requested for
    pub revision: String,
    /// Commit the ref resolved to
    pub full_revision: String,
    pub status: BuildStatus,
    #[serde(deserialize_with = "int64")]
    pub created_at: i64,
    #[serde(deserialize_with = "int64")]
    pub started_at: i64,
    /// Unix seconds; zero while the build is still running
    #[serde(deserialize_with = "int64")]
    pub finished_at: i64,
}

impl Build {
    pub fn created_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_at, 0).unwrap_or_default()
    }

    pub fn finished_time(&self) -> Option<DateTime<Utc>> {
        if self.finished_at == 0 {
            return None;
        }
        DateTime::from_timestamp(self.finished_at, 0)
    }

    /// The first seven characters of the resolved commit.
    pub fn short_revision(&self) -> &str {
        match self.full_revision.char_indices().nth(7) {
            Some((end, _)) => &self.full_revision[..end],
            None => &self.full_revision,
        }
    }
}

/// Protobuf JSON encodes 64-bit integers as strings; accept both forms.
fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        Text(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Operations the bot needs from the image-build service.
#[async_trait]
pub trait ImageBuilds: Send + Sync {
    /// The most recent build of the named template.
    async fn last_build(&self, name: &str) -> Result<Build, ImagesError>;

    /// Start building the named template at a branch or commit.
    async fn start_build(&self, name: &str, revision: &str) -> Result<Build, ImagesError>;

    async fn build(&self, id: i64) -> Result<Build, ImagesError>;

    /// A link to one of the files recorded for a build, e.g. its log.
    async fn record_url(&self, build_id: i64, file_name: &str) -> Result<String, ImagesError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_from_protobuf_json() {
        let build: Build = serde_json::from_str(
            r#"{
                "id": "42",
                "name": "xcode11",
                "revision": "master",
                "full_revision": "0123456789abcdef",
                "status": "SUCCEEDED",
                "created_at": "1500000000",
                "finished_at": 1500000600
            }"#,
        )
        .unwrap();

        assert_eq!(build.id, 42);
        assert_eq!(build.status, BuildStatus::Succeeded);
        assert_eq!(build.started_at, 0);
        assert_eq!(build.short_revision(), "0123456");
        assert_eq!(build.finished_time().unwrap().timestamp(), 1_500_000_600);
    }

    #[test]
    fn test_zero_values_are_omitted() {
        let build: Build = serde_json::from_str(r#"{"id": "7", "name": "base"}"#).unwrap();
        assert_eq!(build.status, BuildStatus::Created);
        assert!(build.finished_time().is_none());
        assert_eq!(build.short_revision(), "");
    }

    #[test]
    fn test_unknown_status() {
        let build: Build = serde_json::from_str(r#"{"status": "EXPLODED"}"#).unwrap();
        assert_eq!(build.status, BuildStatus::Unknown);
        assert!(!build.status.is_finished());
    }

    #[test]
    fn test_bad_integer_is_rejected() {
        assert!(serde_json::from_str::<Build>(r#"{"id": "forty-two"}"#).is_err());
    }
}
