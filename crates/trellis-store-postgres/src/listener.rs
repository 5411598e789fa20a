//! LISTEN/NOTIFY bridge for the event bus.
//!
//! One dedicated task holds a `PgListener` on `notifications_channel` and
//! forwards `{org_id}` events to the bus dispatcher over an mpsc channel.
//! The loop reconnects forever with bounded backoff; while disconnected it
//! misses notifications, so subscribers re-fetch on reconnect.

use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel name the store trigger notifies on
pub const NOTIFICATIONS_CHANNEL: &str = "notifications_channel";

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Spawn the listener task. Returns the receiving half carrying the org ids
/// of inserted notifications.
pub fn spawn_notification_listener(pool: PgPool) -> mpsc::Receiver<Uuid> {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            match run_listener(&pool, &tx).await {
                Ok(()) => {
                    // The send half is gone: the bus shut down
                    info!("notification listener stopping");
                    return;
                }
                Err(e) => {
                    warn!("notification listener error, reconnecting in {:?}: {}", backoff, e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    });

    rx
}

/// One connection lifetime. Ok(()) means the consumer hung up; Err means
/// reconnect.
async fn run_listener(pool: &PgPool, tx: &mpsc::Sender<Uuid>) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(NOTIFICATIONS_CHANNEL).await?;
    info!("listening on {}", NOTIFICATIONS_CHANNEL);

    loop {
        let notification = listener.recv().await?;
        let Some(org_id) = parse_org_id(notification.payload()) else {
            error!("unparseable payload on {}: {}", NOTIFICATIONS_CHANNEL, notification.payload());
            continue;
        };

        debug!(org_id = %org_id, "store notification");
        // Never block the upstream listener: a full queue drops the event
        if tx.try_send(org_id).is_err() && tx.is_closed() {
            return Ok(());
        }
    }
}

fn parse_org_id(payload: &str) -> Option<Uuid> {
    let value: Value = serde_json::from_str(payload).ok()?;
    value
        .get("org_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}
