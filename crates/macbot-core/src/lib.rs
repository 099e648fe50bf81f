pub mod channel;
pub mod commands;
pub mod conversation;
pub mod handler;
pub mod host;
pub mod images;
pub mod job_board;
pub mod message;
pub mod progress;
pub mod router;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use commands::{Services, register_commands};
pub use conversation::{ChannelConversation, Conversation};
pub use handler::start_message_loop;
pub use host::{Backend, BackendError, DebugBackend, Host, HostCoordinator};
pub use message::reply_to;
pub use progress::{ProgressReport, ProgressSender, ProgressSink};
pub use router::{CommandPattern, Params, PatternError, Request, Router};
