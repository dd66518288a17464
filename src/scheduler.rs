//! Bounded pool for deferred work: response delays, callback timeouts, and
//! retry timers.
//!
//! Shutdown refuses new work and wakes every pending delay; tasks already
//! running complete. Scheduler shutdown is ordered before listener
//! shutdown.

use crate::error::MockError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::debug;

pub struct Scheduler {
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(worker_limit: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            permits: Arc::new(Semaphore::new(worker_limit.max(1))),
            shutdown_tx,
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run a task after a delay on the bounded pool. The delay is cancelled
    /// by shutdown; a cancelled task never runs.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<(), MockError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(MockError::Stopped);
        }
        let permits = Arc::clone(&self.permits);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.wait_for(|stopped| *stopped) => return,
            }
            let Ok(_permit) = permits.acquire().await else {
                return;
            };
            task.await;
        });
        Ok(())
    }

    /// Sleep that ends early with `Stopped` when the scheduler shuts down.
    pub async fn delay(&self, duration: Duration) -> Result<(), MockError> {
        if self.is_shutdown() {
            return Err(MockError::Stopped);
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = shutdown_rx.wait_for(|stopped| *stopped) => Err(MockError::Stopped),
        }
    }

    /// Run a future under a deadline; exceeding it yields `DeadlineExceeded`.
    pub async fn with_deadline<F, T>(&self, deadline: Duration, fut: F) -> Result<T, MockError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| MockError::DeadlineExceeded(deadline.as_millis() as u64))
    }

    /// Cancel pending timers and refuse new work. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        self.permits.close();
        debug!("scheduler shut down, pending timers cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn scheduled_task_runs_after_delay() {
        let scheduler = Scheduler::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let task_counter = Arc::clone(&counter);
        scheduler
            .schedule(Duration::from_millis(10), async move {
                task_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_and_refuses_new_work() {
        let scheduler = Scheduler::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let task_counter = Arc::clone(&counter);
        scheduler
            .schedule(Duration::from_secs(60), async move {
                task_counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        scheduler.shutdown();
        assert!(matches!(
            scheduler.schedule(Duration::ZERO, async {}),
            Err(MockError::Stopped)
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delay_is_interrupted_by_shutdown() {
        let scheduler = Arc::new(Scheduler::new(4));
        let waiter = Arc::clone(&scheduler);
        let handle =
            tokio::spawn(async move { waiter.delay(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.shutdown();
        assert!(matches!(handle.await.unwrap(), Err(MockError::Stopped)));
    }

    #[tokio::test]
    async fn deadline_expires() {
        let scheduler = Scheduler::new(4);
        let result = scheduler
            .with_deadline(Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                1
            })
            .await;
        assert!(matches!(result, Err(MockError::DeadlineExceeded(_))));

        let ok = scheduler
            .with_deadline(Duration::from_millis(100), async { 7 })
            .await;
        assert_eq!(ok.unwrap(), 7);
    }
}
