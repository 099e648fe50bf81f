//! Exclusive host coordination
//!
//! Only one checkout or check-in may talk to the backend at a time. The
//! guard is a single-permit semaphore acquired with `try_acquire`, so a
//! contended request is turned away immediately instead of queueing.
//!
//! Whether a host is currently checked out is a separate, unguarded query:
//! it can be answered while an operation is in flight, and its answer is
//! only an advisory snapshot.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::backend::{Backend, BackendError, BaseImage, Host, sort_by_timestamp};
use crate::progress::{ProgressSender, ProgressSink};

/// The right to run one checkout or check-in. Released on drop, including
/// when the owning task errors out, panics or is cancelled.
#[derive(Debug)]
pub struct OperationPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct HostCoordinator {
    backend: Arc<dyn Backend>,
    guard: Arc<Semaphore>,
}

impl HostCoordinator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            guard: Arc::new(Semaphore::new(1)),
        }
    }

    /// Ask the backend whether a host is checked out. Never waits on the guard.
    pub async fn is_checked_out(&self) -> Result<bool, BackendError> {
        self.backend.is_host_checked_out().await
    }

    /// Try to start a state-changing operation without waiting.
    ///
    /// Returns `None` if another checkout or check-in is in flight.
    pub fn try_begin_operation(&self) -> Option<OperationPermit> {
        match self.guard.clone().try_acquire_owned() {
            Ok(permit) => {
                debug!("Host operation permit acquired");
                Some(OperationPermit { _permit: permit })
            }
            Err(_) => {
                debug!("Host operation already in flight");
                None
            }
        }
    }

    /// Choose a production host to check out.
    pub async fn select_host(&self, _permit: &OperationPermit) -> Result<Host, BackendError> {
        self.backend.select_host().await
    }

    /// Move `host` into the development cluster.
    pub async fn check_out(
        &self,
        _permit: &OperationPermit,
        host: &Host,
    ) -> Result<(), BackendError> {
        info!(host = host.name(), "Checking out host");
        self.with_progress("check out", |progress| {
            self.backend.check_out_host(host, progress)
        })
        .await
    }

    /// Return the checked out host to the production cluster.
    pub async fn check_in(&self, _permit: &OperationPermit) -> Result<Host, BackendError> {
        info!("Checking in host");
        self.with_progress("check in", |progress| self.backend.check_in_host(progress))
            .await
    }

    /// Base images in the datacenter, oldest first.
    pub async fn base_images(&self) -> Result<Vec<BaseImage>, BackendError> {
        let mut images = self.backend.base_images().await?;
        sort_by_timestamp(&mut images);
        Ok(images)
    }

    /// Replace a production base image with its backup. Touches the
    /// datastore only, so it does not take the operation permit.
    pub async fn restore_backup(&self, image: &str) -> Result<(), BackendError> {
        info!(image, "Restoring base image backup");
        self.backend.restore_backup(image).await
    }

    /// Run one backend call with a dedicated progress sink, closing the sink
    /// once the call has returned and its channel is drained.
    async fn with_progress<T, F, Fut>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, BackendError>
    where
        F: FnOnce(ProgressSender) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let sink = ProgressSink::new();
        let progress = sink.channel().await?;
        let result = call(progress).await;

        if let Some(err) = sink.close().await {
            warn!(operation, error = %err, "Progress stream reported an error");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DebugBackend, DebugDelays};
    use std::time::Duration;
    use tokio::time::timeout;

    fn coordinator() -> HostCoordinator {
        HostCoordinator::new(Arc::new(DebugBackend::with_delays(
            "1.2.3.4",
            DebugDelays::none(),
        )))
    }

    #[tokio::test]
    async fn test_only_one_permit_at_a_time() {
        let coordinator = coordinator();

        let first = coordinator.try_begin_operation();
        let second = coordinator.try_begin_operation();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let coordinator = coordinator();

        let permit = coordinator.try_begin_operation().unwrap();
        drop(permit);
        assert!(coordinator.try_begin_operation().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_attempts_resolve_without_waiting() {
        let coordinator = Arc::new(coordinator());
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let attempts: Vec<_> = (0..2)
            .map(|_| {
                let coordinator = coordinator.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    // Hold on to the permit, never release it within the test.
                    coordinator.try_begin_operation().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            let acquired = timeout(Duration::from_secs(1), attempt)
                .await
                .expect("try_begin_operation must not block")
                .unwrap();
            successes += usize::from(acquired);
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_permit_released_when_task_panics() {
        let coordinator = Arc::new(coordinator());

        let holder = coordinator.clone();
        let result = tokio::spawn(async move {
            let _permit = holder.try_begin_operation().unwrap();
            panic!("handler blew up");
        })
        .await;
        assert!(result.is_err());

        assert!(coordinator.try_begin_operation().is_some());
    }

    #[tokio::test]
    async fn test_check_out_and_in_flip_state() {
        let coordinator = coordinator();
        let permit = coordinator.try_begin_operation().unwrap();

        let host = coordinator.select_host(&permit).await.unwrap();
        coordinator.check_out(&permit, &host).await.unwrap();
        assert!(coordinator.is_checked_out().await.unwrap());

        let returned = coordinator.check_in(&permit).await.unwrap();
        assert_eq!(returned.name(), "1.2.3.4");
        assert!(!coordinator.is_checked_out().await.unwrap());
    }

    #[tokio::test]
    async fn test_state_query_ignores_guard() {
        let coordinator = coordinator();
        let _permit = coordinator.try_begin_operation().unwrap();

        let checked_out = timeout(Duration::from_secs(1), coordinator.is_checked_out()).await;
        assert!(!checked_out.unwrap().unwrap());
    }
}
