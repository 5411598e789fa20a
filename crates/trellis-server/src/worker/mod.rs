//! Supervised background tasks.
//!
//! Every background task the server owns is spawned through the
//! [`Supervisor`]: failures are logged with structure instead of vanishing,
//! and long-lived tasks observe the shared shutdown signal.

pub mod sweeper;
pub mod verification;

use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, error};

use trellis_core::error::CoreError;

/// Owner of the process's background tasks
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx }
    }

    /// Spawn a supervised task. Errors are logged with the task name;
    /// cancellation (shutdown) is not an error.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!(task = name, "background task finished"),
                Err(e) => error!(task = name, "background task failed: {}", e),
            }
        });
    }

    /// Receiver that flips to `true` exactly once, at shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every long-lived task to wind down
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawned_task_runs() {
        let supervisor = Supervisor::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        supervisor.spawn("probe", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_task_does_not_bring_down_supervisor() {
        let supervisor = Supervisor::new();
        supervisor.spawn("doomed", async {
            Err(CoreError::Internal("expected failure".to_string()))
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Still usable afterwards
        supervisor.spawn("fine", async { Ok(()) });
    }

    #[tokio::test]
    async fn test_shutdown_signal_observed() {
        let supervisor = Supervisor::new();
        let mut signal = supervisor.shutdown_signal();
        assert!(!*signal.borrow());

        supervisor.shutdown();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }
}
