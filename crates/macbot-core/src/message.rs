//! Reply builder
//!
//! Fluent construction of replies to a [`Conversation`]. A builder remembers
//! the timestamp of the message it sent, so sending it again edits that
//! message in place instead of posting a new one.
//!
//! ```ignore
//! let msg = reply_to(&conv).attach_text("Working on it…").send().await;
//! // later
//! msg.attach_text("Done!").color(COLOR_GOOD).send().await;
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::sync::Arc;

use crate::channel::{COLOR_DANGER, MessageField, MessageFooter, OutboundMessage};
use crate::conversation::Conversation;

/// Start an empty reply to a conversation.
pub fn reply_to(conversation: &Arc<dyn Conversation>) -> MessageBuilder {
    MessageBuilder {
        message: OutboundMessage::new(conversation.channel(), ""),
        conversation: conversation.clone(),
        timestamp: None,
    }
}

pub struct MessageBuilder {
    conversation: Arc<dyn Conversation>,
    message: OutboundMessage,
    timestamp: Option<String>,
}

impl MessageBuilder {
    /// Set the text of the message.
    ///
    /// Outside direct messages the text gets an @mention of the user who
    /// started the conversation, unless it already mentions them.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let mention = format!("<@{}>", self.conversation.user());
        self.message.text = if !self.conversation.is_direct_message() && !text.contains(&mention)
        {
            format!("{}: {}", mention, text)
        } else {
            text
        };
        self
    }

    /// Set an apologetic error text, sent as a red attachment.
    pub fn error_text(mut self, text: impl Display) -> Self {
        self.message.text = format!("Sorry, <@{}>! {}", self.conversation.user(), text);
        self.message.is_attachment = true;
        self.message.color = Some(COLOR_DANGER.to_string());
        self
    }

    /// Attach an error whose description is shown in a code block.
    pub fn error(mut self, err: impl Display) -> Self {
        self.message.error = Some(err.to_string());
        self
    }

    /// Set the text and force the message to be sent as an attachment.
    pub fn attach_text(mut self, text: impl Into<String>) -> Self {
        self.message.is_attachment = true;
        self.text(text)
    }

    /// Set the attachment color. An empty color clears it.
    pub fn color(mut self, color: &str) -> Self {
        self.message.color = (!color.is_empty()).then(|| color.to_string());
        self.message.is_attachment = true;
        self
    }

    /// Add a full-width field.
    pub fn field(mut self, title: &str, value: impl Into<String>) -> Self {
        self.message.is_attachment = true;
        self.message.fields.push(MessageField::new(title, value));
        self
    }

    /// Add a field that can be shown side by side with another short field.
    pub fn short_field(mut self, title: &str, value: impl Into<String>) -> Self {
        self.message.is_attachment = true;
        self.message.fields.push(MessageField::short(title, value));
        self
    }

    pub fn clear_fields(mut self) -> Self {
        self.message.fields.clear();
        self
    }

    pub fn footer(mut self, text: &str, time: DateTime<Utc>) -> Self {
        self.message.footer = Some(MessageFooter {
            text: text.to_string(),
            time,
        });
        self
    }

    /// Send the message, or update it in place if this builder sent before.
    pub async fn send(mut self) -> Self {
        self.message.update_ts = self.timestamp.clone();
        if let Some(ts) = self.conversation.send(&self.message).await {
            self.timestamp = Some(ts);
        }
        self
    }

    /// The message as it will be sent.
    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    /// Timestamp of the sent message, if any.
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }
}
