//! Collaborator interfaces the relay engine depends on, and their SQLite
//! implementation.
//!
//! The engine never touches the database directly: it verifies credentials
//! through [`IdentityVerifier`], reads participants and groups through
//! [`Directory`], and appends messages through [`Ledger`]. Each call is a
//! suspension point; other sessions keep running while one waits.

use std::future::Future;
use std::sync::{Arc, Mutex};

use parley_shared::credential::TokenVerifier;
use parley_shared::error::CredentialError;
use parley_shared::types::{
    Group, GroupId, MessageId, MessageRecord, NewMessage, Participant, ParticipantId, Presence,
};
use parley_store::{Database, Result as StoreResult, StoreError};

/// Turns a connection-time credential into a participant id.
pub trait IdentityVerifier: Send + Sync + 'static {
    fn verify(&self, credential: &str) -> Result<ParticipantId, CredentialError>;
}

impl IdentityVerifier for TokenVerifier {
    fn verify(&self, credential: &str) -> Result<ParticipantId, CredentialError> {
        TokenVerifier::verify(self, credential)
    }
}

/// Participant and group records. Missing records are `StoreError::NotFound`.
pub trait Directory: Send + Sync + 'static {
    fn participant(
        &self,
        id: ParticipantId,
    ) -> impl Future<Output = StoreResult<Participant>> + Send;

    fn register_participant(
        &self,
        participant: Participant,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn set_presence(
        &self,
        id: ParticipantId,
        status: Presence,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn participant_names(
        &self,
        ids: Vec<ParticipantId>,
    ) -> impl Future<Output = StoreResult<Vec<(ParticipantId, String)>>> + Send;

    fn group(&self, id: GroupId) -> impl Future<Output = StoreResult<Group>> + Send;

    fn groups_for(
        &self,
        who: ParticipantId,
    ) -> impl Future<Output = StoreResult<Vec<Group>>> + Send;

    fn save_group(&self, group: Group) -> impl Future<Output = StoreResult<()>> + Send;

    fn delete_group(&self, id: GroupId) -> impl Future<Output = StoreResult<bool>> + Send;
}

/// Durable message log.
pub trait Ledger: Send + Sync + 'static {
    /// Persist and return the stored record with its id and timestamp.
    fn append(&self, message: NewMessage) -> impl Future<Output = StoreResult<MessageRecord>> + Send;

    fn message(&self, id: MessageId) -> impl Future<Output = StoreResult<MessageRecord>> + Send;

    /// Returns `false` when the flag was already set.
    fn mark_read(&self, id: MessageId) -> impl Future<Output = StoreResult<bool>> + Send;

    fn conversation(
        &self,
        a: ParticipantId,
        b: ParticipantId,
    ) -> impl Future<Output = StoreResult<Vec<MessageRecord>>> + Send;

    fn group_history(
        &self,
        group: GroupId,
    ) -> impl Future<Output = StoreResult<Vec<MessageRecord>>> + Send;
}

/// Directory and ledger over one SQLite database.
///
/// `rusqlite` is synchronous, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Database>>,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

impl Directory for SqliteBackend {
    async fn participant(&self, id: ParticipantId) -> StoreResult<Participant> {
        self.run(move |db| db.get_participant(id)).await
    }

    async fn register_participant(&self, participant: Participant) -> StoreResult<()> {
        self.run(move |db| db.insert_participant(&participant)).await
    }

    async fn set_presence(&self, id: ParticipantId, status: Presence) -> StoreResult<()> {
        self.run(move |db| db.set_presence(id, status)).await
    }

    async fn participant_names(
        &self,
        ids: Vec<ParticipantId>,
    ) -> StoreResult<Vec<(ParticipantId, String)>> {
        self.run(move |db| db.participant_names(&ids)).await
    }

    async fn group(&self, id: GroupId) -> StoreResult<Group> {
        self.run(move |db| db.get_group(id)).await
    }

    async fn groups_for(&self, who: ParticipantId) -> StoreResult<Vec<Group>> {
        self.run(move |db| db.groups_for_participant(who)).await
    }

    async fn save_group(&self, group: Group) -> StoreResult<()> {
        self.run(move |db| db.save_group(&group)).await
    }

    async fn delete_group(&self, id: GroupId) -> StoreResult<bool> {
        self.run(move |db| db.delete_group(id)).await
    }
}

impl Ledger for SqliteBackend {
    async fn append(&self, message: NewMessage) -> StoreResult<MessageRecord> {
        self.run(move |db| db.insert_message(&message)).await
    }

    async fn message(&self, id: MessageId) -> StoreResult<MessageRecord> {
        self.run(move |db| db.get_message(id)).await
    }

    async fn mark_read(&self, id: MessageId) -> StoreResult<bool> {
        self.run(move |db| db.mark_read(id)).await
    }

    async fn conversation(
        &self,
        a: ParticipantId,
        b: ParticipantId,
    ) -> StoreResult<Vec<MessageRecord>> {
        self.run(move |db| db.private_conversation(a, b)).await
    }

    async fn group_history(&self, group: GroupId) -> StoreResult<Vec<MessageRecord>> {
        self.run(move |db| db.group_messages(group)).await
    }
}
