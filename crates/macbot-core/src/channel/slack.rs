//! Slack channel implementation.
//!
//! Uses Slack Socket Mode (WebSocket) for receiving messages and the Web API
//! for sending and updating them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::traits::{Channel, InboundStream};
use super::types::{InboundMessage, OutboundMessage};

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack channel configuration.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot User OAuth Token (xoxb-...)
    pub bot_token: String,
    /// App-Level Token for Socket Mode (xapp-...)
    pub app_token: String,
}

/// Slack channel using Socket Mode for receiving and Web API for sending.
pub struct SlackChannel {
    config: SlackConfig,
    client: Client,
    bot_user_id: OnceLock<String>,
    polling: Arc<AtomicBool>,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            bot_user_id: OnceLock::new(),
            polling: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_tokens(bot_token: &str, app_token: &str) -> Self {
        Self::new(SlackConfig {
            bot_token: bot_token.to_string(),
            app_token: app_token.to_string(),
        })
    }

    /// Check that both tokens are present
    pub fn is_configured(&self) -> bool {
        !self.config.bot_token.is_empty() && !self.config.app_token.is_empty()
    }

    /// Resolve the bot's own user ID via `auth.test`.
    ///
    /// Must succeed before inbound messages can be told apart from the bot's own.
    pub async fn connect(&self) -> Result<String> {
        if let Some(id) = self.bot_user_id.get() {
            return Ok(id.clone());
        }

        let body = self.call("auth.test", &json!({})).await?;
        let user_id = body["user_id"]
            .as_str()
            .map(|s| s.to_string())
            .context("Missing 'user_id' in Slack auth.test response")?;

        info!(bot_user_id = %user_id, "Authenticated with Slack");
        Ok(self.bot_user_id.get_or_init(|| user_id).clone())
    }

    /// Call a Web API method with the bot token and check the `ok` flag.
    async fn call(&self, method: &str, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(format!("{}/{}", SLACK_API_BASE, method))
            .header(
                "Authorization",
                format!("Bearer {}", self.config.bot_token),
            )
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call Slack {}", method))?;

        let result: Value = resp.json().await?;
        if result["ok"].as_bool() != Some(true) {
            let err = result["error"].as_str().unwrap_or("unknown");
            anyhow::bail!("Slack {} failed: {}", method, err);
        }
        Ok(result)
    }

    /// Open a Socket Mode connection and return a message stream.
    fn start_socket_mode(&self) -> Option<InboundStream> {
        let app_token = self.config.app_token.clone();
        let client = self.client.clone();
        let polling = self.polling.clone();

        if polling.swap(true, Ordering::SeqCst) {
            warn!("Slack Socket Mode already running");
            return None;
        }

        let (tx, rx) = mpsc::channel::<InboundMessage>(256);

        tokio::spawn(async move {
            let _guard = scopeguard::guard((), |_| {
                polling.store(false, Ordering::SeqCst);
            });

            let wss_url = match Self::open_connection(&client, &app_token).await {
                Ok(url) => url,
                Err(e) => {
                    error!("Failed to open Slack Socket Mode connection: {}", e);
                    return;
                }
            };

            info!("Connecting to Slack Socket Mode");

            let ws_stream = match tokio_tungstenite::connect_async(&wss_url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!("Failed to connect to Slack Socket Mode: {}", e);
                    return;
                }
            };

            let (mut ws_write, mut ws_read) = ws_stream.split();

            while let Some(msg_result) = ws_read.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Slack WebSocket error: {}", e);
                        break;
                    }
                };

                let Ok(text) = msg.to_text() else {
                    continue;
                };
                let Ok(payload) = serde_json::from_str::<Value>(text) else {
                    continue;
                };

                // ACK all envelopes
                if let Some(envelope_id) = payload["envelope_id"].as_str() {
                    let ack = json!({"envelope_id": envelope_id});
                    use futures::SinkExt;
                    use tokio_tungstenite::tungstenite::Message as WsMessage;
                    if let Err(e) = ws_write
                        .send(WsMessage::Text(ack.to_string().into()))
                        .await
                    {
                        warn!("Failed to ACK Slack envelope: {}", e);
                    }
                }

                if payload["type"].as_str() == Some("disconnect") {
                    info!("Slack requested disconnect, will reconnect");
                    break;
                }

                let Some(inbound) = parse_socket_event(&payload) else {
                    continue;
                };

                if tx.send(inbound).await.is_err() {
                    debug!("Slack message channel closed");
                    break;
                }
            }

            info!("Slack Socket Mode connection ended");
        });

        Some(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn open_connection(client: &Client, app_token: &str) -> Result<String> {
        let resp = client
            .post(format!("{}/apps.connections.open", SLACK_API_BASE))
            .header("Authorization", format!("Bearer {}", app_token))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await
            .context("Failed to open Slack Socket Mode connection")?;

        let body: Value = resp.json().await?;
        if body["ok"].as_bool() != Some(true) {
            let err = body["error"].as_str().unwrap_or("unknown");
            anyhow::bail!("Slack apps.connections.open failed: {}", err);
        }

        body["url"]
            .as_str()
            .map(|s| s.to_string())
            .context("Missing 'url' in Slack connection response")
    }
}

/// Extract a user message from a Socket Mode envelope.
///
/// Bot messages and message subtypes (edits, joins, ...) are skipped.
fn parse_socket_event(payload: &Value) -> Option<InboundMessage> {
    if payload["type"].as_str() != Some("events_api") {
        return None;
    }

    let event = &payload["payload"]["event"];
    if event["type"].as_str() != Some("message") {
        return None;
    }
    if event["bot_id"].as_str().is_some() || event["subtype"].as_str().is_some() {
        return None;
    }

    let text = event["text"].as_str().unwrap_or("");
    if text.is_empty() {
        return None;
    }

    let mut inbound = InboundMessage::new(
        event["ts"].as_str().unwrap_or(""),
        event["user"].as_str().unwrap_or(""),
        event["channel"].as_str().unwrap_or(""),
        text,
    );
    if let Some(thread_ts) = event["thread_ts"].as_str() {
        inbound = inbound.with_thread(thread_ts);
    }
    Some(inbound)
}

/// Build the Web API payload for a message.
///
/// Messages are always sent as the bot user so they show the bot's name.
fn message_payload(message: &OutboundMessage) -> Value {
    let mut body = json!({
        "channel": message.channel_id,
        "as_user": true,
    });

    let text = message.rendered_text();
    if !text.is_empty() {
        if message.is_attachment {
            let mut attachment = json!({ "text": text });
            if let Some(color) = message.color.as_deref().filter(|c| !c.is_empty()) {
                attachment["color"] = json!(color);
            }
            if !message.fields.is_empty() {
                attachment["fields"] = message
                    .fields
                    .iter()
                    .map(|f| json!({ "title": f.title, "value": f.value, "short": f.short }))
                    .collect();
            }
            if let Some(footer) = &message.footer {
                attachment["footer"] = json!(footer.text);
                attachment["ts"] = json!(footer.time.timestamp());
            }
            body["attachments"] = json!([attachment]);
        } else {
            body["text"] = json!(text);
        }
    }

    if let Some(ts) = &message.update_ts {
        body["ts"] = json!(ts);
    }

    body
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "Slack"
    }

    fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.get().cloned()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<String> {
        let method = if message.is_update() {
            "chat.update"
        } else {
            "chat.postMessage"
        };
        let result = self.call(method, &message_payload(message)).await?;
        result["ts"]
            .as_str()
            .map(|s| s.to_string())
            .with_context(|| format!("Missing 'ts' in Slack {} response", method))
    }

    fn start_receiving(&self) -> Option<InboundStream> {
        self.start_socket_mode()
    }
}
