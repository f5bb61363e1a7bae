//! The relay engine: session lifecycle and per-event dispatch.
//!
//! Each connection drives its own events through [`Hub::dispatch`] one at a
//! time. Failures of a single action are reported to the acting session as
//! an `error` event and never end the session.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::protocol::{CallEndTarget, ClientEvent, ServerEvent, StatusUpdate};
use parley_shared::crypto;
use parley_shared::types::{GroupId, Participant, ParticipantId, Presence, RoomId};

use crate::backend::{Directory, IdentityVerifier, Ledger};
use crate::config::ServerConfig;
use crate::error::HubError;
use crate::guard::PermissionGuard;
use crate::lanes::KeyedLocks;
use crate::pipeline::EncryptionPipeline;
use crate::registry::{Session, SessionHandle, SessionRegistry};
use crate::router::RoomRouter;

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub max_content_bytes: usize,
    pub outbox_capacity: usize,
}

impl From<&ServerConfig> for HubSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_content_bytes: config.max_content_bytes,
            outbox_capacity: config.outbox_capacity,
        }
    }
}

/// Point-in-time counters for the admin status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub sessions: usize,
    pub participants_online: usize,
    pub rooms: usize,
    pub uptime_secs: u64,
}

pub struct Hub<V, D, L> {
    settings: HubSettings,
    verifier: V,
    pub(crate) directory: Arc<D>,
    pub(crate) ledger: Arc<L>,
    pub(crate) registry: SessionRegistry,
    pub(crate) router: RoomRouter,
    pub(crate) guard: PermissionGuard<D>,
    pub(crate) pipeline: EncryptionPipeline,
    /// Held across ledger append and fan-out, per sender. Released after
    /// each send.
    pub(crate) lanes: KeyedLocks<ParticipantId>,
    /// Serializes presence transitions per participant.
    presence: KeyedLocks<ParticipantId>,
    /// Serializes read-modify-write edits per group.
    pub(crate) group_edits: KeyedLocks<GroupId>,
    started_at: Instant,
}

impl<V, D, L> Hub<V, D, L>
where
    V: IdentityVerifier,
    D: Directory,
    L: Ledger,
{
    pub fn new(settings: HubSettings, verifier: V, directory: Arc<D>, ledger: Arc<L>) -> Self {
        Self {
            pipeline: EncryptionPipeline::new(settings.max_content_bytes),
            guard: PermissionGuard::new(directory.clone()),
            settings,
            verifier,
            directory,
            ledger,
            registry: SessionRegistry::new(),
            router: RoomRouter::new(),
            lanes: KeyedLocks::new(),
            presence: KeyedLocks::new(),
            group_edits: KeyedLocks::new(),
            started_at: Instant::now(),
        }
    }

    /// Provision a participant with a fresh id.
    pub async fn register_participant(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<Participant, HubError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::BadRequest("Participant name is required".to_string()));
        }
        crypto::parse_public_key(public_key)?;

        let participant = Participant {
            id: ParticipantId::new(),
            name: name.to_string(),
            status: Presence::Offline,
            public_key: public_key.trim().to_string(),
        };
        self.directory
            .register_participant(participant.clone())
            .await
            .map_err(HubError::Persistence)?;

        info!(participant = %participant.id.short(), name = %participant.name, "Participant registered");
        Ok(participant)
    }

    pub async fn participant(&self, id: ParticipantId) -> Result<Participant, HubError> {
        self.directory
            .participant(id)
            .await
            .map_err(HubError::store("Participant"))
    }

    /// Check a credential without side effects.
    pub fn authenticate(&self, credential: &str) -> Result<ParticipantId, HubError> {
        Ok(self.verifier.verify(credential)?)
    }

    /// Admit a connection.
    ///
    /// On success the session has been told its participant id, joined its
    /// personal room and the rooms of its groups, and is registered. The
    /// returned receiver is the session's outbound queue.
    pub async fn open(
        &self,
        credential: &str,
    ) -> Result<(SessionHandle, mpsc::Receiver<Arc<ServerEvent>>), HubError> {
        let participant_id = self.authenticate(credential)?;
        let participant = self
            .directory
            .participant(participant_id)
            .await
            .map_err(HubError::store("Participant"))?;

        let (tx, rx) = mpsc::channel(self.settings.outbox_capacity);
        let session = Session::new(participant.id, tx);
        session.send(ServerEvent::UserId(participant.id));

        session
            .subscribe(&self.router, RoomId::Personal(participant.id))
            .await;
        match self.directory.groups_for(participant.id).await {
            Ok(groups) => {
                for group in groups {
                    session.subscribe(&self.router, RoomId::Group(group.id)).await;
                }
            }
            Err(e) => {
                warn!(
                    participant = %participant.id.short(),
                    error = %e,
                    "Could not load groups for new session"
                );
            }
        }

        {
            let _gate = self.presence.acquire(participant.id).await;
            if self.registry.insert(session.clone()).await {
                self.announce_presence(participant.id, Presence::Online).await;
            }
        }
        self.presence.release_idle(participant.id).await;

        info!(
            session = %session.id().short(),
            participant = %participant.id.short(),
            name = %participant.name,
            "Session opened"
        );
        Ok((session, rx))
    }

    /// Tear a session down. Safe to call more than once.
    pub async fn close(&self, session: &Session) {
        let left = session.shut(&self.router).await;

        let participant = session.participant();
        let removed = {
            let _gate = self.presence.acquire(participant).await;
            let removed = self.registry.remove(session.id()).await;
            if matches!(removed, Some((_, true))) {
                self.announce_presence(participant, Presence::Offline).await;
            }
            removed.is_some()
        };
        self.presence.release_idle(participant).await;
        if !removed {
            return;
        }

        info!(
            session = %session.id().short(),
            participant = %participant.short(),
            rooms = left,
            "Session closed"
        );
    }

    async fn announce_presence(&self, participant: ParticipantId, status: Presence) {
        if let Err(e) = self.directory.set_presence(participant, status).await {
            warn!(
                participant = %participant.short(),
                status = status.as_str(),
                error = %e,
                "Failed to persist presence"
            );
        }
        let reached = self
            .registry
            .broadcast(ServerEvent::StatusUpdate(StatusUpdate {
                user_id: participant,
                status,
            }))
            .await;
        debug!(
            participant = %participant.short(),
            status = status.as_str(),
            reached,
            "Presence announced"
        );
    }

    /// Handle one inbound event, reporting failure to the acting session.
    pub async fn dispatch(&self, session: &Session, event: ClientEvent) {
        let name = event.name();
        let Err(e) = self.handle(session, event).await else {
            return;
        };

        match &e {
            HubError::Persistence(inner) => {
                warn!(session = %session.id().short(), event = name, error = %inner, "Action failed");
            }
            other => {
                debug!(session = %session.id().short(), event = name, error = %other, "Action rejected");
            }
        }
        session.send(ServerEvent::error(e.to_string()));
    }

    async fn handle(&self, session: &Session, event: ClientEvent) -> Result<(), HubError> {
        match event {
            ClientEvent::JoinGroup(group) => {
                session.subscribe(&self.router, RoomId::Group(group)).await;
                Ok(())
            }
            ClientEvent::LeaveGroup(group) => {
                session.unsubscribe(&self.router, RoomId::Group(group)).await;
                Ok(())
            }
            ClientEvent::ChatMessage(request) => self.send_chat(session, request).await,
            ClientEvent::MarkRead(read) => self.mark_read(session, read.message_id).await,

            ClientEvent::CallRequest(t) => {
                self.relay_call(session, t.to, ServerEvent::CallRequest).await
            }
            ClientEvent::CallAccepted(t) => {
                self.relay_call(session, t.to, ServerEvent::CallAccepted).await
            }
            ClientEvent::CallRejected(t) => {
                self.relay_call(session, t.to, ServerEvent::CallRejected).await
            }
            ClientEvent::CallEnded(CallEndTarget { to: Some(to) }) => {
                self.relay_call(session, to, ServerEvent::CallEnded).await
            }
            ClientEvent::CallEnded(CallEndTarget { to: None }) => Ok(()),

            ClientEvent::StartGroupCall(t) => self.start_group_call(session, t.group_id).await,
            ClientEvent::EndGroupCall(t) => self.end_group_call(session, t.group_id).await,

            ClientEvent::Offer(s) => self.relay_signal(session, s, ServerEvent::Offer).await,
            ClientEvent::Answer(s) => self.relay_signal(session, s, ServerEvent::Answer).await,
            ClientEvent::IceCandidate(s) => {
                self.relay_signal(session, s, ServerEvent::IceCandidate).await
            }
        }
    }

    /// Subscribe every live session of `participant` to `room`.
    pub(crate) async fn subscribe_participant(&self, participant: ParticipantId, room: RoomId) {
        for session in self.registry.sessions_of(participant).await {
            session.subscribe(&self.router, room).await;
        }
    }

    pub(crate) async fn unsubscribe_participant(&self, participant: ParticipantId, room: RoomId) {
        for session in self.registry.sessions_of(participant).await {
            session.unsubscribe(&self.router, room).await;
        }
    }

    /// Evict everyone from a group room.
    pub async fn close_group_room(&self, group: GroupId) {
        let room = RoomId::Group(group);
        for id in self.router.close_room(room).await {
            if let Some(session) = self.registry.get(id).await {
                session.forget_room(room).await;
            }
        }
    }

    pub async fn is_online(&self, participant: ParticipantId) -> bool {
        self.registry.is_online(participant).await
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.registry.session_count().await,
            participants_online: self.registry.participant_count().await,
            rooms: self.router.room_count().await,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use parley_shared::protocol::FromParticipant;
    use parley_shared::types::Group;

    #[tokio::test]
    async fn test_open_sends_identity_first() {
        let fx = Fixture::new();
        let alice = fx.member("Alice").await;
        let token = fx.issuer.issue(alice.id());

        let (session, mut events) = fx.hub.open(&token).await.unwrap();
        assert_eq!(session.participant(), alice.id());
        assert_eq!(*events.recv().await.unwrap(), ServerEvent::UserId(alice.id()));
        assert!(session.has_joined(RoomId::Personal(alice.id())).await);
    }

    #[tokio::test]
    async fn test_bad_credential_rejected_without_session() {
        let fx = Fixture::new();
        let Err(err) = fx.hub.open("garbage").await else {
            panic!("a garbage credential opened a session");
        };
        assert!(matches!(err, HubError::Auth(_)));
        assert_eq!(fx.hub.stats().await.sessions, 0);
    }

    #[tokio::test]
    async fn test_unknown_participant_rejected() {
        let fx = Fixture::new();
        let token = fx.issuer.issue(ParticipantId::new());
        assert!(fx.hub.open(&token).await.is_err());
        assert_eq!(fx.hub.stats().await.rooms, 0);
    }

    #[tokio::test]
    async fn test_open_joins_existing_group_rooms() {
        let fx = Fixture::new();
        let owner = fx.member("Owner").await;
        let group = Group::new("Team", owner.id()).unwrap();
        fx.backend.save_group(group.clone()).await.unwrap();

        let conn = fx.connect(&owner).await;
        assert!(conn.session.has_joined(RoomId::Group(group.id)).await);
    }

    #[tokio::test]
    async fn test_presence_flips_on_first_open_and_last_close() {
        let fx = Fixture::new();
        let alice = fx.member("Alice").await;
        let bob = fx.member("Bob").await;
        let mut watcher = fx.connect(&bob).await;

        let a1 = fx.connect(&alice).await;
        assert_eq!(
            watcher.drain(),
            vec![ServerEvent::StatusUpdate(StatusUpdate {
                user_id: alice.id(),
                status: Presence::Online
            })]
        );

        let a2 = fx.connect(&alice).await;
        assert!(watcher.drain().is_empty());

        fx.hub.close(&a1.session).await;
        assert!(watcher.drain().is_empty());
        assert!(fx.hub.is_online(alice.id()).await);

        fx.hub.close(&a2.session).await;
        assert_eq!(
            watcher.drain(),
            vec![ServerEvent::StatusUpdate(StatusUpdate {
                user_id: alice.id(),
                status: Presence::Offline
            })]
        );
        assert_eq!(
            fx.backend.participant(alice.id()).await.unwrap().status,
            Presence::Offline
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_empties_rooms() {
        let fx = Fixture::new();
        let alice = fx.member("Alice").await;
        let conn = fx.connect(&alice).await;

        fx.hub.close(&conn.session).await;
        fx.hub.close(&conn.session).await;

        let stats = fx.hub.stats().await;
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.rooms, 0);
    }

    #[tokio::test]
    async fn test_presence_gates_released_after_churn() {
        let fx = Fixture::new();
        for i in 0..20 {
            let member = fx.member(&format!("P{i}")).await;
            let conn = fx.connect(&member).await;
            fx.hub.close(&conn.session).await;
        }

        assert_eq!(fx.hub.presence.len().await, 0);
        assert_eq!(fx.hub.lanes.len().await, 0);
    }

    #[tokio::test]
    async fn test_presence_gate_released_while_session_stays_open() {
        let fx = Fixture::new();
        let alice = fx.member("Alice").await;
        let conn = fx.connect(&alice).await;
        assert_eq!(fx.hub.presence.len().await, 0);

        fx.hub.close(&conn.session).await;
        fx.hub.close(&conn.session).await;
        assert_eq!(fx.hub.presence.len().await, 0);
    }

    #[tokio::test]
    async fn test_joining_a_room_grants_no_rights() {
        let fx = Fixture::new();
        let owner = fx.member("Owner").await;
        let outsider = fx.member("Outsider").await;
        let group = Group::new("Team", owner.id()).unwrap();
        fx.backend.save_group(group.clone()).await.unwrap();

        let mut conn = fx.connect(&outsider).await;
        fx.hub
            .dispatch(&conn.session, ClientEvent::JoinGroup(group.id))
            .await;
        assert!(conn.session.has_joined(RoomId::Group(group.id)).await);
        assert!(conn.next().await.is_none());

        fx.hub
            .dispatch(
                &conn.session,
                ClientEvent::StartGroupCall(parley_shared::protocol::GroupCallTarget {
                    group_id: group.id,
                }),
            )
            .await;
        assert_eq!(
            conn.next().await,
            Some(ServerEvent::error("Not a member of this group"))
        );

        fx.hub
            .dispatch(&conn.session, ClientEvent::LeaveGroup(group.id))
            .await;
        assert!(!conn.session.has_joined(RoomId::Group(group.id)).await);
    }

    #[tokio::test]
    async fn test_call_ended_without_target_is_silent() {
        let fx = Fixture::new();
        let alice = fx.member("Alice").await;
        let bob = fx.member("Bob").await;
        let mut a = fx.connect(&alice).await;
        let mut b = fx.connect(&bob).await;
        a.drain();

        fx.hub
            .dispatch(&a.session, ClientEvent::CallEnded(CallEndTarget { to: None }))
            .await;

        assert!(a.next().await.is_none());
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_end_session() {
        let fx = Fixture::new();
        let alice = fx.member("Alice").await;
        let bob = fx.member("Bob").await;
        let mut a = fx.connect(&alice).await;
        let mut b = fx.connect(&bob).await;
        a.drain();

        fx.hub
            .dispatch(
                &a.session,
                ClientEvent::CallRequest(parley_shared::protocol::CallTarget {
                    to: ParticipantId::new(),
                }),
            )
            .await;
        assert_eq!(a.next().await, Some(ServerEvent::error("Participant not found")));

        fx.hub
            .dispatch(
                &a.session,
                ClientEvent::CallRequest(parley_shared::protocol::CallTarget { to: bob.id() }),
            )
            .await;
        assert_eq!(
            b.next().await,
            Some(ServerEvent::CallRequest(FromParticipant { from: alice.id() }))
        );
    }

    #[tokio::test]
    async fn test_register_participant_validates_key() {
        let fx = Fixture::new();
        let keys = parley_shared::crypto::KeyPair::generate();

        let p = fx
            .hub
            .register_participant(" Carol ", &keys.public_key_b64())
            .await
            .unwrap();
        assert_eq!(p.name, "Carol");
        assert_eq!(fx.hub.participant(p.id).await.unwrap(), p);

        assert!(matches!(
            fx.hub.register_participant("Dave", "short").await,
            Err(HubError::Encryption(_))
        ));
        assert!(matches!(
            fx.hub.register_participant("  ", &keys.public_key_b64()).await,
            Err(HubError::BadRequest(_))
        ));
    }
}
