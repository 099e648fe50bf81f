//! Conversations
//!
//! A [`Conversation`] is one inbound message together with the means to reply
//! to it. Command handlers only ever talk to users through this trait.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::channel::{Channel, InboundMessage, OutboundMessage};

/// The reply side of one inbound command.
#[async_trait]
pub trait Conversation: Send + Sync {
    /// ID of the user who initiated the conversation
    fn user(&self) -> &str;

    /// ID of the channel the conversation is happening in
    fn channel(&self) -> &str;

    /// The command addressed to the bot, or an empty string if the message
    /// was not meant for it.
    fn command_text(&self) -> String;

    /// Whether the conversation is a direct message with the bot
    fn is_direct_message(&self) -> bool {
        self.channel().starts_with('D')
    }

    /// Send a message, returning its timestamp if it was delivered.
    async fn send(&self, message: &OutboundMessage) -> Option<String>;
}

/// A conversation backed by a [`Channel`].
pub struct ChannelConversation {
    message: InboundMessage,
    channel: Arc<dyn Channel>,
}

impl ChannelConversation {
    pub fn new(message: InboundMessage, channel: Arc<dyn Channel>) -> Self {
        Self { message, channel }
    }
}

#[async_trait]
impl Conversation for ChannelConversation {
    fn user(&self) -> &str {
        &self.message.sender_id
    }

    fn channel(&self) -> &str {
        &self.message.channel_id
    }

    fn command_text(&self) -> String {
        let Some(bot_user_id) = self.channel.bot_user_id() else {
            return String::new();
        };
        extract_command(
            &self.message.text,
            self.user(),
            &bot_user_id,
            self.is_direct_message(),
        )
    }

    async fn send(&self, message: &OutboundMessage) -> Option<String> {
        match self.channel.send(message).await {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(
                    channel = %self.message.channel_id,
                    error = %e,
                    "Failed to send message via {}",
                    self.channel.name()
                );
                None
            }
        }
    }
}

/// Extract the command out of the message text.
///
/// Messages the bot sent are never commands. Outside direct messages, only
/// messages that start by mentioning the bot are.
fn extract_command(text: &str, sender_id: &str, bot_user_id: &str, is_direct: bool) -> String {
    if sender_id == bot_user_id {
        return String::new();
    }

    let text = text.trim();
    let mention_prefix = format!("<@{}> ", bot_user_id);
    let text = match text.strip_prefix(&mention_prefix) {
        Some(rest) => rest,
        None if is_direct => text,
        None => return String::new(),
    };

    text.trim().to_lowercase()
}
