//! Chat Channel Layer
//!
//! The transport boundary of the bot. A [`Channel`] sends [`OutboundMessage`]s
//! (returning the timestamp the chat service assigned, so the message can be
//! updated in place later) and produces a stream of [`InboundMessage`]s.
//!
//! ```text
//!   SlackChannel ──start_receiving()──▶ InboundStream
//!        ▲                                  │
//!        │ send(OutboundMessage)            ▼
//!   ChannelConversation ◀──────── message loop / Router
//! ```

pub mod slack;
mod traits;
mod types;

pub use slack::{SlackChannel, SlackConfig};
pub use traits::{Channel, InboundStream};
pub use types::{
    COLOR_DANGER, COLOR_GOOD, InboundMessage, MessageField, MessageFooter, OutboundMessage,
};

#[cfg(any(test, feature = "test-utils"))]
pub use traits::mock;
