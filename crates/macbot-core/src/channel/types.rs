//! Channel Message Types
//!
//! Transport-agnostic message shapes exchanged with the chat service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attachment color for successful outcomes.
pub const COLOR_GOOD: &str = "good";
/// Attachment color for failures.
pub const COLOR_DANGER: &str = "danger";

/// Inbound message from the chat service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message timestamp as assigned by the chat service (doubles as its ID)
    pub id: String,
    /// Sender identifier (user ID in the workspace)
    pub sender_id: String,
    /// Channel identifier (`D...` for direct messages)
    pub channel_id: String,
    /// Raw message text
    pub text: String,
    /// Thread the message was posted in, if any
    pub thread_ts: Option<String>,
    /// Timestamp (milliseconds since epoch)
    pub received_at: i64,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            channel_id: channel_id.into(),
            text: text.into(),
            thread_ts: None,
            received_at: Utc::now().timestamp_millis(),
        }
    }

    /// Set the thread timestamp
    pub fn with_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }
}

/// A titled value shown in a message attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageField {
    pub title: String,
    pub value: String,
    /// Short fields may be rendered side by side.
    pub short: bool,
}

impl MessageField {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
            short: false,
        }
    }

    pub fn short(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            short: true,
            ..Self::new(title, value)
        }
    }
}

/// Footer line of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFooter {
    pub text: String,
    pub time: DateTime<Utc>,
}

/// Outbound message to the chat service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel_id: String,
    /// Message text
    pub text: String,
    /// Error detail rendered below the text in a code block
    pub error: Option<String>,
    /// Render as an attachment instead of plain text
    pub is_attachment: bool,
    /// Attachment color (`good`, `danger` or a hex value)
    pub color: Option<String>,
    /// Attachment fields
    pub fields: Vec<MessageField>,
    /// Attachment footer
    pub footer: Option<MessageFooter>,
    /// Timestamp of a previously sent message to update in place
    pub update_ts: Option<String>,
}

impl OutboundMessage {
    /// Create a new plain text message
    pub fn new(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Text as it should be displayed, including any error detail.
    pub fn rendered_text(&self) -> String {
        match &self.error {
            Some(err) => format!("{}\n```{}```", self.text, err),
            None => self.text.clone(),
        }
    }

    /// Whether this message replaces an earlier one.
    pub fn is_update(&self) -> bool {
        self.update_ts.is_some()
    }
}
