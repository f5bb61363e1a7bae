//! In-memory collaborators and fixtures for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};

use parley_shared::credential::{TokenIssuer, TokenVerifier};
use parley_shared::crypto::KeyPair;
use parley_shared::protocol::ServerEvent;
use parley_shared::types::{
    Group, GroupId, MessageId, MessageRecord, NewMessage, Participant, ParticipantId, Presence,
};
use parley_store::{Result as StoreResult, StoreError};

use crate::backend::{Directory, Ledger};
use crate::hub::{Hub, HubSettings};
use crate::registry::SessionHandle;

#[derive(Default)]
pub struct MemoryBackend {
    participants: Mutex<HashMap<ParticipantId, Participant>>,
    groups: Mutex<HashMap<GroupId, Group>>,
    messages: Mutex<Vec<MessageRecord>>,
    ledger_down: AtomicBool,
    append_gate: Arc<AsyncMutex<()>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ledger_down(&self, down: bool) {
        self.ledger_down.store(down, Ordering::SeqCst);
    }

    /// Appends wait until the returned guard is dropped.
    pub async fn hold_appends(&self) -> OwnedMutexGuard<()> {
        self.append_gate.clone().lock_owned().await
    }

    pub fn stored_messages(&self) -> Vec<MessageRecord> {
        self.messages.lock().unwrap().clone()
    }

    fn check_ledger(&self) -> StoreResult<()> {
        if self.ledger_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }
}

impl Directory for MemoryBackend {
    async fn participant(&self, id: ParticipantId) -> StoreResult<Participant> {
        self.participants
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn register_participant(&self, participant: Participant) -> StoreResult<()> {
        self.participants
            .lock()
            .unwrap()
            .insert(participant.id, participant);
        Ok(())
    }

    async fn set_presence(&self, id: ParticipantId, status: Presence) -> StoreResult<()> {
        let mut participants = self.participants.lock().unwrap();
        let entry = participants.get_mut(&id).ok_or(StoreError::NotFound)?;
        entry.status = status;
        Ok(())
    }

    async fn participant_names(
        &self,
        ids: Vec<ParticipantId>,
    ) -> StoreResult<Vec<(ParticipantId, String)>> {
        let participants = self.participants.lock().unwrap();
        Ok(ids
            .into_iter()
            .filter_map(|id| participants.get(&id).map(|p| (id, p.name.clone())))
            .collect())
    }

    async fn group(&self, id: GroupId) -> StoreResult<Group> {
        self.groups
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn groups_for(&self, who: ParticipantId) -> StoreResult<Vec<Group>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .values()
            .filter(|g| g.includes(who))
            .cloned()
            .collect())
    }

    async fn save_group(&self, group: Group) -> StoreResult<()> {
        self.groups.lock().unwrap().insert(group.id, group);
        Ok(())
    }

    async fn delete_group(&self, id: GroupId) -> StoreResult<bool> {
        Ok(self.groups.lock().unwrap().remove(&id).is_some())
    }
}

impl Ledger for MemoryBackend {
    async fn append(&self, message: NewMessage) -> StoreResult<MessageRecord> {
        drop(self.append_gate.lock().await);
        self.check_ledger()?;
        let record = MessageRecord {
            id: MessageId::new(),
            sender: message.sender,
            destination: message.destination,
            body: message.body,
            timestamp: Utc::now(),
            is_read: false,
        };
        self.messages.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn message(&self, id: MessageId) -> StoreResult<MessageRecord> {
        self.check_ledger()?;
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn mark_read(&self, id: MessageId) -> StoreResult<bool> {
        self.check_ledger()?;
        let mut messages = self.messages.lock().unwrap();
        let record = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound)?;
        let changed = !record.is_read;
        record.is_read = true;
        Ok(changed)
    }

    async fn conversation(
        &self,
        a: ParticipantId,
        b: ParticipantId,
    ) -> StoreResult<Vec<MessageRecord>> {
        self.check_ledger()?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| match m.destination.recipient() {
                Some(r) => (m.sender == a && r == b) || (m.sender == b && r == a),
                None => false,
            })
            .cloned()
            .collect())
    }

    async fn group_history(&self, group: GroupId) -> StoreResult<Vec<MessageRecord>> {
        self.check_ledger()?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.destination.group() == Some(group))
            .cloned()
            .collect())
    }
}

pub type TestHub = Hub<TokenVerifier, MemoryBackend, MemoryBackend>;

pub struct Fixture {
    pub hub: Arc<TestHub>,
    pub backend: Arc<MemoryBackend>,
    pub issuer: TokenIssuer,
}

pub struct Member {
    pub participant: Participant,
    pub keys: KeyPair,
}

impl Member {
    pub fn id(&self) -> ParticipantId {
        self.participant.id
    }
}

pub struct Connected {
    pub session: SessionHandle,
    pub events: mpsc::Receiver<Arc<ServerEvent>>,
}

impl Connected {
    /// Next queued event, or `None` if nothing arrives shortly.
    pub async fn next(&mut self) -> Option<ServerEvent> {
        tokio::time::timeout(Duration::from_millis(200), self.events.recv())
            .await
            .ok()
            .flatten()
            .map(|e| (*e).clone())
    }

    /// Everything already queued.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(e) = self.events.try_recv() {
            out.push((*e).clone());
        }
        out
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(HubSettings {
            max_content_bytes: 1024,
            outbox_capacity: 64,
        })
    }

    pub fn with_settings(settings: HubSettings) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let issuer = TokenIssuer::generate(chrono::Duration::hours(1));
        let hub = Arc::new(Hub::new(
            settings,
            issuer.verifier(),
            backend.clone(),
            backend.clone(),
        ));
        Self {
            hub,
            backend,
            issuer,
        }
    }

    pub async fn member(&self, name: &str) -> Member {
        let keys = KeyPair::generate();
        let participant = Participant {
            id: ParticipantId::new(),
            name: name.to_string(),
            status: Presence::Offline,
            public_key: keys.public_key_b64(),
        };
        self.backend
            .register_participant(participant.clone())
            .await
            .unwrap();
        Member { participant, keys }
    }

    /// Open a session and discard the handshake and presence traffic.
    pub async fn connect(&self, member: &Member) -> Connected {
        let token = self.issuer.issue(member.id());
        let (session, events) = self.hub.open(&token).await.unwrap();
        let mut connected = Connected { session, events };
        connected.drain();
        connected
    }
}
