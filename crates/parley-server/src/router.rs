use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, trace};

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{RoomId, SessionId};

/// Outbound queue of one session. Events are shared between recipients.
pub type Outbox = mpsc::Sender<Arc<ServerEvent>>;

/// Enqueue without waiting. A full outbox drops the event for that session
/// only; publishers never block on a slow reader.
pub fn deliver(session: SessionId, outbox: &Outbox, event: Arc<ServerEvent>) -> bool {
    match outbox.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(session = %session.short(), "Dropping event for slow session");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!(session = %session.short(), "Outbox closed");
            false
        }
    }
}

struct Room {
    id: RoomId,
    subscribers: Mutex<HashMap<SessionId, Outbox>>,
}

/// Named fan-out groups of sessions.
///
/// Rooms exist while they have at least one subscriber. Lock order is always
/// room map first, then the room's subscriber set.
#[derive(Default)]
pub struct RoomRouter {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session, creating the room if needed. Idempotent.
    pub async fn join(&self, room: RoomId, session: SessionId, outbox: Outbox) {
        {
            let rooms = self.rooms.read().await;
            if let Some(existing) = rooms.get(&room) {
                // The map read guard stays held so the room cannot be
                // removed between lookup and insert.
                existing.subscribers.lock().await.insert(session, outbox);
                return;
            }
        }

        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .entry(room)
            .or_insert_with(|| {
                debug!(room = %room, "Created room");
                Arc::new(Room {
                    id: room,
                    subscribers: Mutex::new(HashMap::new()),
                })
            })
            .clone();
        entry.subscribers.lock().await.insert(session, outbox);
    }

    /// Unsubscribe a session. Returns whether it was subscribed.
    pub async fn leave(&self, room: RoomId, session: SessionId) -> bool {
        let (removed, now_empty) = {
            let rooms = self.rooms.read().await;
            let Some(existing) = rooms.get(&room) else {
                return false;
            };
            let mut subscribers = existing.subscribers.lock().await;
            let removed = subscribers.remove(&session).is_some();
            (removed, subscribers.is_empty())
        };

        if now_empty {
            let mut rooms = self.rooms.write().await;
            let still_empty = match rooms.get(&room) {
                Some(existing) => existing.subscribers.lock().await.is_empty(),
                None => false,
            };
            if still_empty {
                rooms.remove(&room);
                debug!(room = %room, "Removed empty room");
            }
        }

        removed
    }

    /// Deliver to every current subscriber. Returns how many accepted it.
    pub async fn publish(&self, room: RoomId, event: ServerEvent) -> usize {
        self.publish_shared(room, Arc::new(event)).await
    }

    pub async fn publish_shared(&self, room: RoomId, event: Arc<ServerEvent>) -> usize {
        let Some(target) = self.rooms.read().await.get(&room).cloned() else {
            trace!(room = %room, "Publish to room with no subscribers");
            return 0;
        };

        let subscribers = target.subscribers.lock().await;
        let mut delivered = 0;
        for (session, outbox) in subscribers.iter() {
            if deliver(*session, outbox, event.clone()) {
                delivered += 1;
            }
        }
        trace!(room = %target.id, delivered, "Published event");
        delivered
    }

    /// Drop a room and all its subscriptions. Returns the evicted sessions.
    pub async fn close_room(&self, room: RoomId) -> Vec<SessionId> {
        let Some(removed) = self.rooms.write().await.remove(&room) else {
            return Vec::new();
        };
        let evicted: Vec<SessionId> = removed.subscribers.lock().await.drain().map(|(s, _)| s).collect();
        info!(room = %room, evicted = evicted.len(), "Closed room");
        evicted
    }

    #[cfg(test)]
    pub async fn is_subscribed(&self, room: RoomId, session: SessionId) -> bool {
        let Some(target) = self.rooms.read().await.get(&room).cloned() else {
            return false;
        };
        let subscribed = target.subscribers.lock().await.contains_key(&session);
        subscribed
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, room: RoomId) -> usize {
        let Some(target) = self.rooms.read().await.get(&room).cloned() else {
            return 0;
        };
        let count = target.subscribers.lock().await.len();
        count
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
