//! Inbound message loop
//!
//! Reads messages from a channel and hands each one to the router as a
//! [`ChannelConversation`]. Handlers run on their own tasks, so a slow
//! command never holds up the next message.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::conversation::ChannelConversation;
use crate::router::Router;

#[cfg(test)]
const STREAM_RECONNECT_DELAY: Duration = Duration::from_millis(20);
#[cfg(not(test))]
const STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Spawn the loop that feeds `channel`'s messages into `router`.
///
/// The receive stream is restarted whenever it ends. The loop exits once
/// `shutdown` is cancelled; commands already dispatched keep running.
pub fn start_message_loop(
    channel: Arc<dyn Channel>,
    router: Arc<Router>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Listening for messages on {}", channel.name());

        loop {
            let Some(mut stream) = channel.start_receiving() else {
                warn!(
                    "Failed to start message stream for {}, retrying in {:?}",
                    channel.name(),
                    STREAM_RECONNECT_DELAY
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(STREAM_RECONNECT_DELAY) => {}
                }
                continue;
            };

            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Message loop for {} stopped", channel.name());
                        return;
                    }
                    next = stream.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                };

                debug!(
                    "Received message {} from {} in {}",
                    message.id, message.sender_id, message.channel_id
                );
                let conversation = Arc::new(ChannelConversation::new(message, channel.clone()));
                router.dispatch(conversation);
            }

            warn!(
                "Message stream ended for {}, restarting in {:?}",
                channel.name(),
                STREAM_RECONNECT_DELAY
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(STREAM_RECONNECT_DELAY) => {}
            }
        }

        info!("Message loop for {} stopped", channel.name());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{InboundMessage, OutboundMessage};
    use crate::channel::mock::MockChannel;
    use crate::message::reply_to;
    use crate::router::Request;
    use tokio::time::timeout;

    fn echo_router() -> Arc<Router> {
        let mut router = Router::new();
        router
            .register("echo <words>", |request: Request| async move {
                let words = request.params.string("words").to_string();
                reply_to(&request.conversation).text(words).send().await;
            })
            .unwrap();
        Arc::new(router)
    }

    async fn wait_for_sent(channel: &MockChannel, count: usize) -> Vec<OutboundMessage> {
        for _ in 0..200 {
            let sent = channel.get_sent_messages().await;
            if sent.len() >= count {
                return sent;
            }
            sleep(Duration::from_millis(5)).await;
        }
        channel.get_sent_messages().await
    }

    #[tokio::test]
    async fn test_messages_are_dispatched() {
        let (mock, tx) = MockChannel::new("UBOT");
        let mock = Arc::new(mock);
        let shutdown = CancellationToken::new();
        let handle = start_message_loop(mock.clone(), echo_router(), shutdown.clone());

        tx.send(InboundMessage::new("1", "U1", "D1", "Echo Hello There"))
            .unwrap();
        tx.send(InboundMessage::new("2", "U1", "C1", "echo not for me"))
            .unwrap();
        tx.send(InboundMessage::new("3", "U2", "C1", "<@UBOT> echo hi"))
            .unwrap();

        let sent = wait_for_sent(&mock, 2).await;
        let mut texts: Vec<_> = sent.iter().map(|m| m.text.as_str()).collect();
        texts.sort();
        assert_eq!(texts, vec!["<@U2>: hi", "hello there"]);

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bot_messages_are_ignored() {
        let (mock, tx) = MockChannel::new("UBOT");
        let mock = Arc::new(mock);
        let shutdown = CancellationToken::new();
        let handle = start_message_loop(mock.clone(), echo_router(), shutdown.clone());

        tx.send(InboundMessage::new("1", "UBOT", "D1", "echo loop"))
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(mock.get_sent_messages().await.is_empty());

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_after_stream_ends() {
        let (mock, tx) = MockChannel::new("UBOT");
        let shutdown = CancellationToken::new();
        let handle = start_message_loop(Arc::new(mock), echo_router(), shutdown.clone());

        // Ending the stream sends the loop into its retry path.
        drop(tx);
        sleep(STREAM_RECONNECT_DELAY * 3).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
