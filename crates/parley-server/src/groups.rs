//! Group administration. Only a group's creator may change it.
//!
//! Edits to one group are serialized so concurrent changes never overwrite
//! each other. Room subscriptions of live sessions follow membership.

use std::future::Future;

use tracing::info;

use parley_shared::types::{Group, GroupId, ParticipantId, RoomId};

use crate::backend::{Directory, IdentityVerifier, Ledger};
use crate::error::HubError;
use crate::hub::Hub;

impl<V, D, L> Hub<V, D, L>
where
    V: IdentityVerifier,
    D: Directory,
    L: Ledger,
{
    pub async fn create_group(
        &self,
        creator: ParticipantId,
        name: &str,
    ) -> Result<Group, HubError> {
        self.directory
            .participant(creator)
            .await
            .map_err(HubError::store("Participant"))?;
        let group = Group::new(name.trim(), creator)?;
        self.directory
            .save_group(group.clone())
            .await
            .map_err(HubError::Persistence)?;

        self.subscribe_participant(creator, RoomId::Group(group.id)).await;
        info!(group = %group.id.short(), creator = %creator.short(), "Group created");
        Ok(group)
    }

    pub async fn groups_of(&self, who: ParticipantId) -> Result<Vec<Group>, HubError> {
        self.directory
            .groups_for(who)
            .await
            .map_err(HubError::Persistence)
    }

    /// A group as seen by one of its members.
    pub async fn group_for_member(
        &self,
        who: ParticipantId,
        group_id: GroupId,
    ) -> Result<Group, HubError> {
        let group = self.load_group(group_id).await?;
        if !group.includes(who) {
            return Err(HubError::Permission("Not a member of this group".to_string()));
        }
        Ok(group)
    }

    pub async fn add_member(
        &self,
        actor: ParticipantId,
        group_id: GroupId,
        member: ParticipantId,
        can_send_messages: bool,
        can_call: bool,
    ) -> Result<Group, HubError> {
        self.edit_group(group_id, async {
            let mut group = self.load_group(group_id).await?;
            self.directory
                .participant(member)
                .await
                .map_err(HubError::store("Participant"))?;

            group.add_member(actor, member, can_send_messages, can_call)?;
            self.store_group(&group).await?;

            self.subscribe_participant(member, RoomId::Group(group_id)).await;
            info!(group = %group_id.short(), member = %member.short(), "Member added");
            Ok::<_, HubError>(group)
        })
        .await
    }

    /// Flip member rights. `None` leaves a right unchanged. The next action
    /// of that member is judged against the new rights.
    pub async fn set_permissions(
        &self,
        actor: ParticipantId,
        group_id: GroupId,
        member: ParticipantId,
        can_send_messages: Option<bool>,
        can_call: Option<bool>,
    ) -> Result<Group, HubError> {
        self.edit_group(group_id, async {
            let mut group = self.load_group(group_id).await?;
            group.set_permissions(actor, member, can_send_messages, can_call)?;
            self.store_group(&group).await?;

            info!(
                group = %group_id.short(),
                member = %member.short(),
                ?can_send_messages,
                ?can_call,
                "Permissions updated"
            );
            Ok::<_, HubError>(group)
        })
        .await
    }

    pub async fn remove_member(
        &self,
        actor: ParticipantId,
        group_id: GroupId,
        member: ParticipantId,
    ) -> Result<Group, HubError> {
        self.edit_group(group_id, async {
            let mut group = self.load_group(group_id).await?;
            group.remove_member(actor, member)?;
            self.store_group(&group).await?;

            self.unsubscribe_participant(member, RoomId::Group(group_id)).await;
            info!(group = %group_id.short(), member = %member.short(), "Member removed");
            Ok::<_, HubError>(group)
        })
        .await
    }

    /// Delete a group and close its room.
    pub async fn delete_group(
        &self,
        actor: ParticipantId,
        group_id: GroupId,
    ) -> Result<(), HubError> {
        self.edit_group(group_id, async {
            let group = self.load_group(group_id).await?;
            group.ensure_can_delete(actor)?;

            let existed = self
                .directory
                .delete_group(group_id)
                .await
                .map_err(HubError::Persistence)?;
            if !existed {
                return Err(HubError::NotFound("Group"));
            }

            self.close_group_room(group_id).await;
            info!(group = %group_id.short(), "Group deleted");
            Ok::<_, HubError>(())
        })
        .await
    }

    /// Run one read-modify-write of a group under its edit lock, then drop
    /// the lock entry if nobody else is queued on it.
    async fn edit_group<T>(
        &self,
        group_id: GroupId,
        edit: impl Future<Output = Result<T, HubError>>,
    ) -> Result<T, HubError> {
        let outcome = {
            let _edit = self.group_edits.acquire(group_id).await;
            edit.await
        };
        self.group_edits.release_idle(group_id).await;
        outcome
    }

    async fn load_group(&self, group_id: GroupId) -> Result<Group, HubError> {
        self.directory
            .group(group_id)
            .await
            .map_err(HubError::store("Group"))
    }

    async fn store_group(&self, group: &Group) -> Result<(), HubError> {
        self.directory
            .save_group(group.clone())
            .await
            .map_err(HubError::Persistence)
    }
}
