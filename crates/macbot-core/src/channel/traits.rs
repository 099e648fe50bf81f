//! Channel Trait Definitions

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::types::{InboundMessage, OutboundMessage};

/// Stream of inbound messages produced by a channel.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// A chat transport that can send messages and optionally receive them.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Display name for logs
    fn name(&self) -> &str;

    /// User ID of the bot itself, once known
    fn bot_user_id(&self) -> Option<String>;

    /// Send a message, returning the timestamp the service assigned to it.
    ///
    /// When `message.update_ts` is set, the earlier message is edited in place
    /// and its timestamp is returned.
    async fn send(&self, message: &OutboundMessage) -> Result<String>;

    /// Start receiving messages (returns None if the channel cannot receive)
    ///
    /// The returned stream ends when the underlying connection closes.
    fn start_receiving(&self) -> Option<InboundStream>;
}

/// Test/mock channel for unit testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::{Mutex, mpsc};

    /// A mock channel that records everything it sends
    pub struct MockChannel {
        bot_user_id: String,
        next_ts: AtomicU64,
        sent_messages: Arc<Mutex<Vec<OutboundMessage>>>,
        inbound: std::sync::Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    }

    impl MockChannel {
        /// Create a new mock channel with a sender to inject inbound messages
        pub fn new(bot_user_id: &str) -> (Self, mpsc::UnboundedSender<InboundMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let channel = Self {
                bot_user_id: bot_user_id.to_string(),
                next_ts: AtomicU64::new(1),
                sent_messages: Arc::new(Mutex::new(Vec::new())),
                inbound: std::sync::Mutex::new(Some(rx)),
            };
            (channel, tx)
        }

        /// Get all sent messages
        pub async fn get_sent_messages(&self) -> Vec<OutboundMessage> {
            self.sent_messages.lock().await.clone()
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            "mock"
        }

        fn bot_user_id(&self) -> Option<String> {
            Some(self.bot_user_id.clone())
        }

        async fn send(&self, message: &OutboundMessage) -> Result<String> {
            self.sent_messages.lock().await.push(message.clone());
            if let Some(ts) = &message.update_ts {
                return Ok(ts.clone());
            }
            let ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{ts}.000100"))
        }

        fn start_receiving(&self) -> Option<InboundStream> {
            let rx = self.inbound.lock().ok()?.take()?;
            Some(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mock::MockChannel;

    #[tokio::test]
    async fn test_mock_channel_send_assigns_timestamps() {
        let (channel, _tx) = MockChannel::new("UBOT");

        let first = channel.send(&OutboundMessage::new("C1", "one")).await.unwrap();
        let second = channel.send(&OutboundMessage::new("C1", "two")).await.unwrap();
        assert_ne!(first, second);

        let sent = channel.get_sent_messages().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "one");
    }

    #[tokio::test]
    async fn test_mock_channel_update_keeps_timestamp() {
        let (channel, _tx) = MockChannel::new("UBOT");

        let mut msg = OutboundMessage::new("C1", "first");
        let ts = channel.send(&msg).await.unwrap();
        msg.update_ts = Some(ts.clone());
        assert_eq!(channel.send(&msg).await.unwrap(), ts);
    }

    #[tokio::test]
    async fn test_mock_channel_receives_once() {
        let (channel, tx) = MockChannel::new("UBOT");
        let mut stream = channel.start_receiving().unwrap();
        assert!(channel.start_receiving().is_none());

        tx.send(InboundMessage::new("1", "U1", "D1", "help")).unwrap();
        let msg = stream.next().await.unwrap();
        assert_eq!(msg.text, "help");
    }
}
