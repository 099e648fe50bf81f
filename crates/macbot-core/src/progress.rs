//! Progress sink
//!
//! Long-running provisioning calls report progress through a fresh channel
//! per invocation. A [`ProgressSink`] owns one background worker that accepts
//! those channels one at a time and drains each until its producer closes it,
//! so a producer never stalls on an unread channel.
//!
//! ```text
//!   producer ──channel()──▶ handoff (rendezvous) ──▶ worker
//!      │                                               │
//!      └──── ProgressSender ───── events ─────────────▶ drain until closed
//! ```
//!
//! The sink does not support overlapping operations: a second `channel()`
//! call waits until the worker has finished draining the previous one.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Events buffered per operation before the producer waits on the worker.
const PROGRESS_BUFFER: usize = 32;

/// One progress report from a long-running operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub percentage: f32,
    pub detail: Option<String>,
    pub error: Option<String>,
}

impl ProgressReport {
    pub fn new(percentage: f32) -> Self {
        Self {
            percentage,
            detail: None,
            error: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// A report carrying a terminal error.
    pub fn failed(percentage: f32, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(percentage)
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("progress sink is closed")]
    Closed,
}

/// Callback invoked by the worker for every drained report.
pub type ProgressObserver = Arc<dyn Fn(&ProgressReport) + Send + Sync>;

/// Send-only endpoint for one operation. Dropping it closes the channel.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressReport>,
}

impl ProgressSender {
    /// Report progress. Returns false if the sink went away; callers may
    /// ignore that, progress is advisory.
    pub async fn report(&self, report: ProgressReport) -> bool {
        self.tx.send(report).await.is_ok()
    }
}

struct Handoff {
    events: mpsc::Receiver<ProgressReport>,
    accepted: oneshot::Sender<()>,
}

/// Background drain for progress reports.
///
/// Dropping the sink without [`close`](Self::close) also stops the worker
/// once its current drain finishes, but nothing waits for it.
pub struct ProgressSink {
    handoff: mpsc::Sender<Handoff>,
    shutdown: CancellationToken,
    worker: JoinHandle<Option<String>>,
}

impl ProgressSink {
    /// Start a sink whose worker only logs what it drains.
    pub fn new() -> Self {
        Self::start(None)
    }

    /// Start a sink that forwards every drained report to `observer`.
    pub fn with_observer(observer: impl Fn(&ProgressReport) + Send + Sync + 'static) -> Self {
        Self::start(Some(Arc::new(observer)))
    }

    fn start(observer: Option<ProgressObserver>) -> Self {
        // Capacity 1 plus the acceptance ack below gives rendezvous semantics.
        let (handoff, handoff_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run_worker(handoff_rx, shutdown.clone(), observer));

        Self {
            handoff,
            shutdown,
            worker,
        }
    }

    /// Hand a fresh channel to the worker and return its sending side.
    ///
    /// Waits until the worker is idle, i.e. until any previous channel has
    /// been closed by its producer and fully drained.
    pub async fn channel(&self) -> Result<ProgressSender, SinkError> {
        let (tx, events) = mpsc::channel(PROGRESS_BUFFER);
        let (accepted, accepted_rx) = oneshot::channel();

        self.handoff
            .send(Handoff { events, accepted })
            .await
            .map_err(|_| SinkError::Closed)?;
        accepted_rx.await.map_err(|_| SinkError::Closed)?;

        Ok(ProgressSender { tx })
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A channel that is being drained is drained to the end first. Returns
    /// the last error any drained report carried.
    pub async fn close(self) -> Option<String> {
        self.shutdown.cancel();
        match self.worker.await {
            Ok(last_error) => last_error,
            Err(e) => {
                warn!(error = %e, "Progress sink worker did not exit cleanly");
                None
            }
        }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    mut handoff_rx: mpsc::Receiver<Handoff>,
    shutdown: CancellationToken,
    observer: Option<ProgressObserver>,
) -> Option<String> {
    let mut last_error = None;

    loop {
        let handoff = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = handoff_rx.recv() => match next {
                Some(handoff) => handoff,
                None => break,
            },
        };

        // The caller stopped waiting; nobody holds the sending side.
        if handoff.accepted.send(()).is_err() {
            continue;
        }

        if let Some(err) = drain(handoff.events, observer.as_ref()).await {
            last_error = Some(err);
        }
    }

    debug!("Progress sink worker stopped");
    last_error
}

/// Read until the producer closes the channel. Errors are recorded, never
/// short-circuited on.
async fn drain(
    mut events: mpsc::Receiver<ProgressReport>,
    observer: Option<&ProgressObserver>,
) -> Option<String> {
    let mut last_error = None;

    while let Some(report) = events.recv().await {
        debug!(
            percentage = report.percentage,
            detail = report.detail.as_deref().unwrap_or(""),
            "Progress"
        );
        if let Some(observer) = observer {
            observer(&report);
        }
        if let Some(err) = report.error {
            warn!(error = %err, "Operation reported an error");
            last_error = Some(err);
        }
    }

    last_error
}
