//! Call setup relay. Payloads pass through untouched; nothing is stored.

use tracing::debug;

use parley_shared::protocol::{
    FromParticipant, GroupCallEnded, GroupCallStarted, ServerEvent, SignalRelay, SignalRequest,
};
use parley_shared::types::{Action, GroupId, ParticipantId, RoomId};

use crate::backend::{Directory, IdentityVerifier, Ledger};
use crate::error::HubError;
use crate::hub::Hub;
use crate::registry::Session;

impl<V, D, L> Hub<V, D, L>
where
    V: IdentityVerifier,
    D: Directory,
    L: Ledger,
{
    /// Forward a one-to-one call event to every session of `to`.
    pub(crate) async fn relay_call(
        &self,
        session: &Session,
        to: ParticipantId,
        make: fn(FromParticipant) -> ServerEvent,
    ) -> Result<(), HubError> {
        self.directory
            .participant(to)
            .await
            .map_err(HubError::store("Participant"))?;

        let event = make(FromParticipant {
            from: session.participant(),
        });
        let delivered = self.router.publish(RoomId::Personal(to), event).await;
        debug!(
            from = %session.participant().short(),
            to = %to.short(),
            delivered,
            "Relayed call event"
        );
        Ok(())
    }

    /// Forward WebRTC negotiation data to every session of the target.
    pub(crate) async fn relay_signal(
        &self,
        session: &Session,
        request: SignalRequest,
        make: fn(SignalRelay) -> ServerEvent,
    ) -> Result<(), HubError> {
        self.directory
            .participant(request.to)
            .await
            .map_err(HubError::store("Participant"))?;

        let event = make(SignalRelay {
            from: session.participant(),
            payload: request.payload,
        });
        self.router.publish(RoomId::Personal(request.to), event).await;
        Ok(())
    }

    /// Announce a group call. Requires the call right.
    pub(crate) async fn start_group_call(
        &self,
        session: &Session,
        group: GroupId,
    ) -> Result<(), HubError> {
        let caller = session.participant();
        self.guard.check(caller, group, Action::Call).await?;

        let delivered = self
            .router
            .publish(
                RoomId::Group(group),
                ServerEvent::GroupCallStarted(GroupCallStarted {
                    group_id: group,
                    caller_id: caller,
                }),
            )
            .await;
        debug!(group = %group.short(), caller = %caller.short(), delivered, "Group call started");
        Ok(())
    }

    /// Announce the end of a group call. Any participant may end one; only
    /// the group's existence is checked.
    pub(crate) async fn end_group_call(
        &self,
        session: &Session,
        group: GroupId,
    ) -> Result<(), HubError> {
        self.directory
            .group(group)
            .await
            .map_err(HubError::store("Group"))?;

        self.router
            .publish(
                RoomId::Group(group),
                ServerEvent::GroupCallEnded(GroupCallEnded { group_id: group }),
            )
            .await;
        debug!(group = %group.short(), by = %session.participant().short(), "Group call ended");
        Ok(())
    }
}
