// ABOUTME: Bounded supervision of concurrent relay runs.
// ABOUTME: Caps in-flight streams, tracks their tasks and cancels them all on shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::{GatewayError, Result};

/// Owns every spawned relay task.
///
/// Submissions beyond `max_in_flight` are rejected with [`GatewayError::Busy`]
/// rather than queued. Each task receives a token that is cancelled when the
/// supervisor shuts down, or when the caller-supplied parent token fires.
#[derive(Clone)]
pub struct RelaySupervisor {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl RelaySupervisor {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn a supervised task.
    pub fn submit<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.submit_linked(&self.shutdown, task)
    }

    /// Spawn a supervised task that is also cancelled with `parent`.
    pub fn submit_linked<F, Fut>(&self, parent: &CancellationToken, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| GatewayError::Busy {
                in_flight: self.in_flight(),
            })?;

        let cancel = parent.child_token();
        let shutdown = self.shutdown.clone();
        let fut = task(cancel.clone());

        self.tracker.spawn(async move {
            tokio::pin!(fut);
            tokio::select! {
                _ = &mut fut => {}
                _ = shutdown.cancelled() => {
                    cancel.cancel();
                    fut.await;
                }
            }
            drop(permit);
        });
        debug!(in_flight = self.in_flight(), "Relay task submitted");
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every in-flight task and wait for all of them to finish.
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "Stopping relay tasks");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_rejects_when_full() {
        let supervisor = RelaySupervisor::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        supervisor
            .submit(|_| async move {
                let _ = release_rx.await;
            })
            .unwrap();
        assert_eq!(supervisor.in_flight(), 1);

        let err = supervisor.submit(|_| async {}).unwrap_err();
        assert!(matches!(err, GatewayError::Busy { in_flight: 1 }));

        release_tx.send(()).unwrap();
        supervisor.shutdown().await;
        assert_eq!(supervisor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_tasks() {
        let supervisor = RelaySupervisor::new(4);
        let observed = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let observed = Arc::clone(&observed);
            supervisor
                .submit(move |cancel| async move {
                    cancel.cancelled().await;
                    observed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        // let the tasks park on their tokens
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), supervisor.shutdown())
            .await
            .unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.in_flight(), 0);
        assert!(supervisor.submit(|_| async {}).is_err());
    }

    #[tokio::test]
    async fn test_parent_token_cancels_only_its_tasks() {
        let supervisor = RelaySupervisor::new(4);
        let connection = CancellationToken::new();
        let (linked_tx, linked_rx) = oneshot::channel();
        let (other_tx, mut other_rx) = oneshot::channel::<()>();

        supervisor
            .submit_linked(&connection, move |cancel| async move {
                cancel.cancelled().await;
                let _ = linked_tx.send(());
            })
            .unwrap();
        supervisor
            .submit(move |cancel| async move {
                cancel.cancelled().await;
                let _ = other_tx.send(());
            })
            .unwrap();

        connection.cancel();
        tokio::time::timeout(Duration::from_secs(2), linked_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(other_rx.try_recv().is_err());

        supervisor.shutdown().await;
    }
}
