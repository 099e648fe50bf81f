//! Provisioning backend
//!
//! The backend moves hosts between the production cluster and the exclusive
//! image-development cluster. It is slow (tens of seconds per move) and is
//! treated as an opaque collaborator; [`DebugBackend`] stands in for it when
//! exercising the bot without real hardware.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::progress::{ProgressReport, ProgressSender, SinkError};

/// A host machine that can be checked in or out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    name: String,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name of the host, for display in chat messages.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A base VM image in the datacenter.
///
/// Image names end in a timestamp after their last `-`, which is what they
/// are ordered by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    name: String,
}

impl BaseImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The part of the name after its last `-`.
    pub fn timestamp(&self) -> &str {
        self.name
            .rsplit_once('-')
            .map_or(self.name.as_str(), |(_, ts)| ts)
    }
}

/// Sort images oldest first by the timestamp in their names.
pub fn sort_by_timestamp(images: &mut [BaseImage]) {
    images.sort_by(|a, b| a.timestamp().cmp(b.timestamp()));
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no host is available in the production cluster")]
    NoHostAvailable,

    #[error("no host is checked out")]
    NothingCheckedOut,

    #[error("no backup found for {0}")]
    NoBackup(String),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    #[error("progress reporting unavailable: {0}")]
    Progress(#[from] SinkError),
}

/// Operations the bot performs against the host inventory.
///
/// `check_out_host` and `check_in_host` emit progress into the given sender
/// and drop it when they finish.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn is_host_checked_out(&self) -> Result<bool, BackendError>;

    async fn select_host(&self) -> Result<Host, BackendError>;

    async fn check_out_host(&self, host: &Host, progress: ProgressSender)
    -> Result<(), BackendError>;

    async fn check_in_host(&self, progress: ProgressSender) -> Result<Host, BackendError>;

    async fn base_images(&self) -> Result<Vec<BaseImage>, BackendError>;

    /// Copy the backup of `image` over the production base image.
    async fn restore_backup(&self, image: &str) -> Result<(), BackendError>;
}

/// Simulated durations of the debug backend's operations.
#[derive(Debug, Clone, Copy)]
pub struct DebugDelays {
    pub select: Duration,
    pub check_out: Duration,
    pub check_in: Duration,
}

impl Default for DebugDelays {
    fn default() -> Self {
        Self {
            select: Duration::from_secs(1),
            check_out: Duration::from_secs(10),
            check_in: Duration::from_secs(1),
        }
    }
}

impl DebugDelays {
    pub fn none() -> Self {
        Self {
            select: Duration::ZERO,
            check_out: Duration::ZERO,
            check_in: Duration::ZERO,
        }
    }
}

/// Base images served by the debug backend, in datastore order.
const DEBUG_BASE_IMAGES: [&str; 3] = [
    "debug-base-image-2",
    "debug-base-image-3",
    "debug-base-image-1",
];

/// A fake backend with a single host that is not checked out at start.
///
/// Selecting always picks that host; checking it in or out always succeeds.
/// Any of its base images can be restored from backup.
pub struct DebugBackend {
    host: Host,
    checked_out: Mutex<bool>,
    delays: DebugDelays,
}

impl DebugBackend {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self::with_delays(host_name, DebugDelays::default())
    }

    pub fn with_delays(host_name: impl Into<String>, delays: DebugDelays) -> Self {
        Self {
            host: Host::new(host_name),
            checked_out: Mutex::new(false),
            delays,
        }
    }

    fn set_checked_out(&self, value: bool) -> Result<(), BackendError> {
        let mut checked_out = self
            .checked_out
            .lock()
            .map_err(|_| BackendError::Unreachable("debug state poisoned".to_string()))?;
        *checked_out = value;
        Ok(())
    }

    /// Sleep for `total`, reporting progress halfway through.
    async fn simulate(progress: &ProgressSender, total: Duration, detail: &str) {
        progress
            .report(ProgressReport::new(0.0).with_detail(detail))
            .await;
        sleep(total / 2).await;
        progress.report(ProgressReport::new(50.0)).await;
        sleep(total / 2).await;
        progress.report(ProgressReport::new(100.0)).await;
    }
}

#[async_trait]
impl Backend for DebugBackend {
    async fn is_host_checked_out(&self) -> Result<bool, BackendError> {
        self.checked_out
            .lock()
            .map(|checked_out| *checked_out)
            .map_err(|_| BackendError::Unreachable("debug state poisoned".to_string()))
    }

    async fn select_host(&self) -> Result<Host, BackendError> {
        sleep(self.delays.select).await;
        Ok(self.host.clone())
    }

    async fn check_out_host(
        &self,
        host: &Host,
        progress: ProgressSender,
    ) -> Result<(), BackendError> {
        Self::simulate(&progress, self.delays.check_out, host.name()).await;
        self.set_checked_out(true)
    }

    async fn check_in_host(&self, progress: ProgressSender) -> Result<Host, BackendError> {
        Self::simulate(&progress, self.delays.check_in, self.host.name()).await;
        self.set_checked_out(false)?;
        Ok(self.host.clone())
    }

    async fn base_images(&self) -> Result<Vec<BaseImage>, BackendError> {
        Ok(DEBUG_BASE_IMAGES.into_iter().map(BaseImage::new).collect())
    }

    async fn restore_backup(&self, image: &str) -> Result<(), BackendError> {
        if !DEBUG_BASE_IMAGES.contains(&image) {
            return Err(BackendError::NoBackup(image.to_string()));
        }
        sleep(self.delays.check_in).await;
        Ok(())
    }
}
