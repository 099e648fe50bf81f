//! Twirp JSON client for the imaged `Images` service.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::{Build, ImageBuilds, ImagesError};

/// Client for imaged's Twirp endpoint.
///
/// `service_url` is the full service prefix, e.g.
/// `https://imaged.example.com/twirp/travisci.imaged.images.Images`.
pub struct TwirpImagesClient {
    service_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct BuildResponse {
    build: Option<Build>,
}

#[derive(Deserialize)]
struct RecordUrlResponse {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct TwirpError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
}

impl TwirpImagesClient {
    pub fn new(service_url: &str) -> Self {
        Self {
            service_url: service_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.service_url, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ImagesError> {
        debug!(method, "Calling imaged");
        let resp = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(twirp_error(status.as_u16(), &text));
        }

        Ok(resp.json().await?)
    }

    async fn call_build(&self, method: &str, body: Value) -> Result<Build, ImagesError> {
        let resp: BuildResponse = self.call(method, body).await?;
        resp.build.ok_or(ImagesError::MissingBuild)
    }
}

/// Decode a Twirp error body, falling back to the HTTP status.
fn twirp_error(status: u16, body: &str) -> ImagesError {
    match serde_json::from_str::<TwirpError>(body) {
        Ok(err) if !err.code.is_empty() => ImagesError::Twirp {
            code: err.code,
            msg: err.msg,
        },
        _ => ImagesError::Twirp {
            code: format!("http_{}", status),
            msg: body.trim().to_string(),
        },
    }
}

#[async_trait]
impl ImageBuilds for TwirpImagesClient {
    async fn last_build(&self, name: &str) -> Result<Build, ImagesError> {
        self.call_build("GetLastBuild", json!({ "name": name })).await
    }

    async fn start_build(&self, name: &str, revision: &str) -> Result<Build, ImagesError> {
        self.call_build(
            "StartBuild",
            json!({ "name": name, "revision": revision }),
        )
        .await
    }

    async fn build(&self, id: i64) -> Result<Build, ImagesError> {
        self.call_build("GetBuild", json!({ "id": id.to_string() }))
            .await
    }

    async fn record_url(&self, build_id: i64, file_name: &str) -> Result<String, ImagesError> {
        let resp: RecordUrlResponse = self
            .call(
                "GetRecordURL",
                json!({ "build_id": build_id.to_string(), "file_name": file_name }),
            )
            .await?;
        Ok(resp.url)
    }
}
