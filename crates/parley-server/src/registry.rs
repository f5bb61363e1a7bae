use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ParticipantId, RoomId, SessionId};

use crate::router::{deliver, Outbox, RoomRouter};

/// One authenticated connection.
pub struct Session {
    id: SessionId,
    participant: ParticipantId,
    outbox: Outbox,
    rooms: Mutex<Rooms>,
}

#[derive(Default)]
struct Rooms {
    joined: HashSet<RoomId>,
    closed: bool,
}

pub type SessionHandle = Arc<Session>;

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("participant", &self.participant)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(participant: ParticipantId, outbox: Outbox) -> SessionHandle {
        Arc::new(Self {
            id: SessionId::new(),
            participant,
            outbox,
            rooms: Mutex::new(Rooms::default()),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Deliver directly to this session, bypassing rooms.
    pub fn send(&self, event: ServerEvent) -> bool {
        deliver(self.id, &self.outbox, Arc::new(event))
    }

    pub(crate) fn send_shared(&self, event: Arc<ServerEvent>) -> bool {
        deliver(self.id, &self.outbox, event)
    }

    /// Subscribe to a room. A shut session stays unsubscribed.
    pub(crate) async fn subscribe(&self, router: &RoomRouter, room: RoomId) -> bool {
        let mut rooms = self.rooms.lock().await;
        if rooms.closed {
            return false;
        }
        router.join(room, self.id, self.outbox.clone()).await;
        rooms.joined.insert(room)
    }

    pub(crate) async fn unsubscribe(&self, router: &RoomRouter, room: RoomId) -> bool {
        let mut rooms = self.rooms.lock().await;
        router.leave(room, self.id).await;
        rooms.joined.remove(&room)
    }

    /// Forget a room that was closed underneath this session.
    pub(crate) async fn forget_room(&self, room: RoomId) {
        self.rooms.lock().await.joined.remove(&room);
    }

    /// Leave every room and refuse later subscriptions.
    pub(crate) async fn shut(&self, router: &RoomRouter) -> usize {
        let mut rooms = self.rooms.lock().await;
        rooms.closed = true;
        let joined: Vec<RoomId> = rooms.joined.drain().collect();
        for room in &joined {
            router.leave(*room, self.id).await;
        }
        joined.len()
    }

    pub async fn has_joined(&self, room: RoomId) -> bool {
        self.rooms.lock().await.joined.contains(&room)
    }

    #[cfg(test)]
    pub async fn joined_rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().await.joined.iter().copied().collect()
    }
}

#[derive(Default)]
struct Index {
    sessions: HashMap<SessionId, SessionHandle>,
    by_participant: HashMap<ParticipantId, HashSet<SessionId>>,
}

/// Live sessions, indexed by id and by participant.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Index>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the participant's first live session.
    pub async fn insert(&self, session: SessionHandle) -> bool {
        let mut index = self.inner.write().await;
        let owned = index.by_participant.entry(session.participant()).or_default();
        let first = owned.is_empty();
        owned.insert(session.id());
        debug!(
            session = %session.id().short(),
            participant = %session.participant().short(),
            sessions = owned.len(),
            "Session registered"
        );
        index.sessions.insert(session.id(), session);
        first
    }

    /// Returns the removed session and whether it was the participant's last.
    pub async fn remove(&self, id: SessionId) -> Option<(SessionHandle, bool)> {
        let mut index = self.inner.write().await;
        let session = index.sessions.remove(&id)?;
        let participant = session.participant();
        let last = match index.by_participant.get_mut(&participant) {
            Some(owned) => {
                owned.remove(&id);
                owned.is_empty()
            }
            None => true,
        };
        if last {
            index.by_participant.remove(&participant);
        }
        Some((session, last))
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner.read().await.sessions.get(&id).cloned()
    }

    pub async fn sessions_of(&self, participant: ParticipantId) -> Vec<SessionHandle> {
        let index = self.inner.read().await;
        index
            .by_participant
            .get(&participant)
            .into_iter()
            .flatten()
            .filter_map(|id| index.sessions.get(id).cloned())
            .collect()
    }

    pub async fn is_online(&self, participant: ParticipantId) -> bool {
        self.inner.read().await.by_participant.contains_key(&participant)
    }

    /// Deliver to every live session. Returns how many accepted it.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let index = self.inner.read().await;
        index
            .sessions
            .values()
            .filter(|s| deliver(s.id, &s.outbox, event.clone()))
            .count()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn participant_count(&self) -> usize {
        self.inner.read().await.by_participant.len()
    }
}
