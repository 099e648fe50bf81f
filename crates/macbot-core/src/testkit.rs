//! Test doubles for exercising commands without Slack, imaged or job board.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::channel::OutboundMessage;
use crate::conversation::Conversation;
use crate::host::{Backend, BackendError, BaseImage, Host};
use crate::images::{Build, BuildStatus, ImageBuilds, ImagesError};
use crate::job_board::{ImageRegistry, JobBoardError, JobBoardImage};
use crate::progress::ProgressSender;

/// A conversation that records every message sent to it.
///
/// Defaults to user `user` in channel `test`. Each new message gets the
/// timestamp `ts-N`; updates keep the timestamp of the message they edit.
pub struct RecordingConversation {
    user: String,
    channel: String,
    command: String,
    sent: Mutex<Vec<OutboundMessage>>,
    next_ts: AtomicUsize,
}

impl RecordingConversation {
    pub fn new(command: &str) -> Self {
        Self {
            user: "user".to_string(),
            channel: "test".to_string(),
            command: command.to_string(),
            sent: Mutex::new(Vec::new()),
            next_ts: AtomicUsize::new(1),
        }
    }

    pub fn in_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn from_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    /// Everything sent so far, in order.
    pub fn replies(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages were sent, or two seconds passed.
    pub async fn wait_for_replies(&self, count: usize) -> Vec<OutboundMessage> {
        for _ in 0..400 {
            let replies = self.replies();
            if replies.len() >= count {
                return replies;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.replies()
    }
}

#[async_trait]
impl Conversation for RecordingConversation {
    fn user(&self) -> &str {
        &self.user
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn command_text(&self) -> String {
        self.command.clone()
    }

    async fn send(&self, message: &OutboundMessage) -> Option<String> {
        let ts = match &message.update_ts {
            Some(ts) => ts.clone(),
            None => format!("ts-{}", self.next_ts.fetch_add(1, Ordering::SeqCst)),
        };
        self.sent.lock().unwrap().push(message.clone());
        Some(ts)
    }
}

/// Which backend call a [`FailingBackend`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Query,
    Select,
    CheckOut,
    CheckIn,
    Restore,
}

/// A backend that answers the state query with a fixed value and fails at
/// one chosen step.
pub struct FailingBackend {
    checked_out: bool,
    fail_at: FailAt,
}

impl FailingBackend {
    pub fn new(checked_out: bool, fail_at: FailAt) -> Self {
        Self {
            checked_out,
            fail_at,
        }
    }

    fn check(&self, step: FailAt, operation: &'static str) -> Result<(), BackendError> {
        if self.fail_at == step {
            return Err(BackendError::Operation {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FailingBackend {
    async fn is_host_checked_out(&self) -> Result<bool, BackendError> {
        if self.fail_at == FailAt::Query {
            return Err(BackendError::Unreachable("connection refused".to_string()));
        }
        Ok(self.checked_out)
    }

    async fn select_host(&self) -> Result<Host, BackendError> {
        self.check(FailAt::Select, "select host")?;
        Ok(Host::new("mac-1"))
    }

    async fn check_out_host(
        &self,
        _host: &Host,
        _progress: ProgressSender,
    ) -> Result<(), BackendError> {
        self.check(FailAt::CheckOut, "check out")
    }

    async fn check_in_host(&self, _progress: ProgressSender) -> Result<Host, BackendError> {
        self.check(FailAt::CheckIn, "check in")?;
        Ok(Host::new("mac-1"))
    }

    async fn base_images(&self) -> Result<Vec<BaseImage>, BackendError> {
        if self.fail_at == FailAt::Query {
            return Err(BackendError::Unreachable("connection refused".to_string()));
        }
        Ok(vec![BaseImage::new("mac-base-1")])
    }

    async fn restore_backup(&self, _image: &str) -> Result<(), BackendError> {
        self.check(FailAt::Restore, "restore backup")
    }
}

/// Build a finished or running build record for tests.
pub fn build(id: i64, name: &str, status: BuildStatus) -> Build {
    let finished = matches!(status, BuildStatus::Succeeded | BuildStatus::Failed);
    Build {
        id,
        name: name.to_string(),
        revision: "master".to_string(),
        full_revision: "0123456789abcdef".to_string(),
        status,
        created_at: 1_500_000_000,
        started_at: 1_500_000_010,
        finished_at: if finished { 1_500_000_600 } else { 0 },
    }
}

/// An image-build service that replays a scripted sequence of build states.
///
/// `start_build` returns the first state; every `build` call pops the next
/// one, repeating the last once the script runs out.
pub struct ScriptedImageBuilds {
    last: Option<Build>,
    script: Mutex<VecDeque<Build>>,
    started: Mutex<Vec<(String, String)>>,
    fail_start: bool,
}

impl ScriptedImageBuilds {
    pub fn new(script: Vec<Build>) -> Self {
        Self {
            last: None,
            script: Mutex::new(script.into()),
            started: Mutex::new(Vec::new()),
            fail_start: false,
        }
    }

    pub fn with_last_build(mut self, build: Build) -> Self {
        self.last = Some(build);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// `(name, revision)` of every build started.
    pub fn started(&self) -> Vec<(String, String)> {
        self.started.lock().unwrap().clone()
    }

    fn next(&self) -> Result<Build, ImagesError> {
        let mut script = self.script.lock().unwrap();
        match script.len() {
            0 => Err(ImagesError::MissingBuild),
            1 => Ok(script[0].clone()),
            _ => Ok(script.pop_front().unwrap()),
        }
    }
}

#[async_trait]
impl ImageBuilds for ScriptedImageBuilds {
    async fn last_build(&self, _name: &str) -> Result<Build, ImagesError> {
        self.last.clone().ok_or_else(|| ImagesError::Twirp {
            code: "not_found".to_string(),
            msg: "no builds".to_string(),
        })
    }

    async fn start_build(&self, name: &str, revision: &str) -> Result<Build, ImagesError> {
        if self.fail_start {
            return Err(ImagesError::Twirp {
                code: "internal".to_string(),
                msg: "queue is full".to_string(),
            });
        }
        self.started
            .lock()
            .unwrap()
            .push((name.to_string(), revision.to_string()));
        self.next()
    }

    async fn build(&self, _id: i64) -> Result<Build, ImagesError> {
        self.next()
    }

    async fn record_url(&self, build_id: i64, file_name: &str) -> Result<String, ImagesError> {
        Ok(format!("https://imaged.test/builds/{}/{}", build_id, file_name))
    }
}

/// An in-memory job board.
#[derive(Default)]
pub struct MemoryRegistry {
    images: Mutex<Vec<JobBoardImage>>,
    unavailable: bool,
}

impl MemoryRegistry {
    pub fn new(images: Vec<JobBoardImage>) -> Self {
        Self {
            images: Mutex::new(images),
            unavailable: false,
        }
    }

    /// A registry whose every call fails.
    pub fn unavailable() -> Self {
        Self {
            images: Mutex::new(Vec::new()),
            unavailable: true,
        }
    }

    pub fn images(&self) -> Vec<JobBoardImage> {
        self.images.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageRegistry for MemoryRegistry {
    async fn list_images(&self) -> Result<Vec<JobBoardImage>, JobBoardError> {
        if self.unavailable {
            return Err(JobBoardError::Status(503));
        }
        Ok(self.images())
    }

    async fn register_image(&self, image: &str, tag: &str) -> Result<(), JobBoardError> {
        if self.unavailable {
            return Err(JobBoardError::Status(503));
        }
        let mut images = self.images.lock().unwrap();
        let id = images.len() as i64 + 1;
        images.push(JobBoardImage {
            id,
            tag: tag.to_string(),
            name: image.to_string(),
        });
        Ok(())
    }
}
