//! Per-tenant event bus.
//!
//! Subscribers join rooms keyed `org:<uuid>`. Each room is a broadcast
//! channel: publishing never blocks, and a consumer that falls more than
//! the queue depth behind loses its oldest events rather than stalling the
//! room or the store listener. A slow consumer in one room cannot affect
//! another room.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use trellis_core::types::{BusEvent, BusPublisher};

/// Room fan-out for org-scoped events
pub struct EventBus {
    rooms: DashMap<Uuid, broadcast::Sender<BusEvent>>,
    queue_depth: usize,
}

impl EventBus {
    /// `queue_depth` is the per-subscriber buffer before old events drop
    pub fn new(queue_depth: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            queue_depth: queue_depth.max(1),
        }
    }

    fn room(&self, org_id: Uuid) -> broadcast::Sender<BusEvent> {
        self.rooms
            .entry(org_id)
            .or_insert_with(|| broadcast::channel(self.queue_depth).0)
            .clone()
    }

    /// Join the `org:<uuid>` room
    pub fn subscribe(&self, org_id: Uuid) -> broadcast::Receiver<BusEvent> {
        self.room(org_id).subscribe()
    }

    /// Number of live subscribers in a room
    pub fn subscriber_count(&self, org_id: Uuid) -> usize {
        self.rooms
            .get(&org_id)
            .map(|r| r.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BusPublisher for EventBus {
    async fn publish(&self, org_id: Uuid, event: BusEvent) {
        // send() only fails when the room has no subscribers; that is not
        // an error for a fan-out bus
        let _ = self.room(org_id).send(event);
        debug!(org_id = %org_id, event = event.as_str(), "bus publish");
    }
}

/// Drive one WebSocket subscriber: forward room events as text frames until
/// the peer goes away. Lagged receivers skip dropped events and continue.
pub async fn run_subscriber(mut socket: WebSocket, bus: &EventBus, org_id: Uuid) {
    let mut receiver = bus.subscribe(org_id);
    debug!(org_id = %org_id, "subscriber joined room");

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    if socket
                        .send(Message::Text(event.as_str().to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Back-pressure policy: oldest events were dropped for
                    // this consumer; it re-reads collections on receipt, so
                    // just keep going
                    warn!(org_id = %org_id, skipped, "slow bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // pings and stray frames are ignored
                Some(Err(_)) => break,
            },
        }
    }

    debug!(org_id = %org_id, "subscriber left room");
}
