//! Periodic removal of aged rate samples.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use trellis_core::domain::repository::PolicyRepository;
use trellis_core::error::CoreError;

/// Samples older than this are irrelevant to any quota window
const SAMPLE_RETENTION_HOURS: i64 = 24;

/// Loop until shutdown, deleting rate samples older than 24 h each pass.
pub async fn run_rate_sample_sweep(
    policy: Arc<dyn PolicyRepository>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CoreError> {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }

        let cutoff = Utc::now() - chrono::Duration::hours(SAMPLE_RETENTION_HOURS);
        match policy.delete_samples_before(cutoff).await {
            Ok(removed) if removed > 0 => debug!(removed, "swept aged rate samples"),
            Ok(_) => {}
            Err(e) => warn!("rate sample sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;
    use trellis_core::ApiRateSample;
    use trellis_store_memory::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_removes_old_samples_and_stops_on_shutdown() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let mut old = ApiRateSample::new(user, "/flows", None);
        old.timestamp = Utc::now() - chrono::Duration::hours(30);
        store.insert_sample(&old).await.unwrap();
        store
            .insert_sample(&ApiRateSample::new(user, "/flows", None))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let policy: Arc<dyn PolicyRepository> = Arc::new(store.clone());
        let handle = tokio::spawn(run_rate_sample_sweep(
            policy,
            Duration::from_millis(50),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let remaining = store
            .count_samples_since(user, Utc::now() - chrono::Duration::hours(48))
            .await
            .unwrap();
        assert_eq!(remaining, 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper exits on shutdown")
            .unwrap()
            .unwrap();
    }
}
