use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::models::ServerMessage;

/// A message fanned out to every connection bound to a session.
#[derive(Clone, Debug)]
pub struct RoomEvent {
    /// Connection that caused the event. Its own forwarder skips it.
    pub origin: Option<String>,
    pub message: Arc<ServerMessage>,
}

/// Broadcast channels keyed by session id.
pub struct RoomRegistry {
    capacity: usize,
    rooms: RwLock<HashMap<String, broadcast::Sender<RoomEvent>>>,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), rooms: RwLock::new(HashMap::new()) }
    }

    /// Get or create the room's channel and subscribe to it.
    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!("Opened room {}", session_id);
                let (bc, _rx) = broadcast::channel::<RoomEvent>(self.capacity);
                bc
            })
            .subscribe()
    }

    /// Send to every member of the room. Returns how many receivers got it.
    pub async fn publish(&self, session_id: &str, origin: Option<&str>, message: ServerMessage) -> usize {
        let rooms = self.rooms.read().await;
        let Some(bc) = rooms.get(session_id) else {
            return 0;
        };
        let event = RoomEvent { origin: origin.map(str::to_string), message: Arc::new(message) };
        // Err only means nobody is listening
        bc.send(event).unwrap_or(0)
    }

    /// Drop the room if no receiver is left.
    pub async fn release(&self, session_id: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(session_id).is_some_and(|bc| bc.receiver_count() == 0) {
            rooms.remove(session_id);
            debug!("Closed empty room {}", session_id);
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Total receivers across all rooms.
    pub async fn member_count(&self) -> usize {
        self.rooms.read().await.values().map(|bc| bc.receiver_count()).sum()
    }
}
