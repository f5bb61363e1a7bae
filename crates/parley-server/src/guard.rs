use std::future::Future;
use std::sync::Arc;

use parley_shared::types::{Action, Group, GroupId, ParticipantId};

use crate::backend::Directory;
use crate::error::HubError;

/// Outcome of a permission check against the current group record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Creator,
    Granted,
    Lacking(Action),
    NotMember,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Verdict::Creator | Verdict::Granted)
    }

    pub fn of(group: &Group, who: ParticipantId, action: Action) -> Self {
        if group.creator == who {
            return Verdict::Creator;
        }
        match group.membership(who) {
            None => Verdict::NotMember,
            Some(m) if m.allows(action) => Verdict::Granted,
            Some(_) => Verdict::Lacking(action),
        }
    }

    fn denial(self) -> Option<String> {
        match self {
            Verdict::Creator | Verdict::Granted => None,
            Verdict::NotMember => Some("Not a member of this group".to_string()),
            Verdict::Lacking(Action::Send) => {
                Some("No permission to send messages in this group".to_string())
            }
            Verdict::Lacking(Action::Call) => {
                Some("No permission to call in this group".to_string())
            }
        }
    }
}

/// Decides whether a participant may perform a gated action in a group.
pub trait Guard: Send + Sync {
    fn authorize(
        &self,
        who: ParticipantId,
        group: GroupId,
        action: Action,
    ) -> impl Future<Output = Result<Verdict, HubError>> + Send;
}

/// Reads the group record on every call; nothing is cached, so a
/// permission change applies to the very next action.
pub struct PermissionGuard<D> {
    directory: Arc<D>,
}

impl<D: Directory> PermissionGuard<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    /// Authorize, turning a denial into a `Permission` error.
    pub async fn check(
        &self,
        who: ParticipantId,
        group: GroupId,
        action: Action,
    ) -> Result<(), HubError> {
        match self.authorize(who, group, action).await?.denial() {
            None => Ok(()),
            Some(reason) => Err(HubError::Permission(reason)),
        }
    }
}

impl<D: Directory> Guard for PermissionGuard<D> {
    async fn authorize(
        &self,
        who: ParticipantId,
        group: GroupId,
        action: Action,
    ) -> Result<Verdict, HubError> {
        let record = self
            .directory
            .group(group)
            .await
            .map_err(HubError::store("Group"))?;
        Ok(Verdict::of(&record, who, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;

    async fn setup() -> (Arc<MemoryBackend>, Group, ParticipantId) {
        let backend = Arc::new(MemoryBackend::new());
        let creator = ParticipantId::new();
        let member = ParticipantId::new();
        let mut group = Group::new("Ops", creator).unwrap();
        group.add_member(creator, member, false, true).unwrap();
        backend.save_group(group.clone()).await.unwrap();
        (backend, group, member)
    }

    #[test]
    fn test_creator_holds_rights_without_membership_entry() {
        let creator = ParticipantId::new();
        let mut group = Group::new("Ops", creator).unwrap();
        group.members.clear();
        assert_eq!(Verdict::of(&group, creator, Action::Send), Verdict::Creator);
        assert_eq!(Verdict::of(&group, creator, Action::Call), Verdict::Creator);
    }

    #[test]
    fn test_verdict_for_outsider_and_flags() {
        let creator = ParticipantId::new();
        let member = ParticipantId::new();
        let mut group = Group::new("Ops", creator).unwrap();
        group.add_member(creator, member, false, true).unwrap();

        assert_eq!(
            Verdict::of(&group, member, Action::Send),
            Verdict::Lacking(Action::Send)
        );
        assert_eq!(Verdict::of(&group, member, Action::Call), Verdict::Granted);
        for action in [Action::Send, Action::Call] {
            assert_eq!(
                Verdict::of(&group, ParticipantId::new(), action),
                Verdict::NotMember
            );
        }
    }

    #[tokio::test]
    async fn test_creator_always_allowed() {
        let (backend, group, _) = setup().await;
        let guard = PermissionGuard::new(backend);
        for action in [Action::Send, Action::Call] {
            let verdict = guard.authorize(group.creator, group.id, action).await.unwrap();
            assert_eq!(verdict, Verdict::Creator);
        }
    }

    #[tokio::test]
    async fn test_member_flags_apply_per_action() {
        let (backend, group, member) = setup().await;
        let guard = PermissionGuard::new(backend);

        assert_eq!(
            guard.authorize(member, group.id, Action::Send).await.unwrap(),
            Verdict::Lacking(Action::Send)
        );
        assert!(guard
            .authorize(member, group.id, Action::Call)
            .await
            .unwrap()
            .is_allowed());
    }

    #[tokio::test]
    async fn test_non_member_distinct_from_lacking_right() {
        let (backend, group, _) = setup().await;
        let guard = PermissionGuard::new(backend);

        let verdict = guard
            .authorize(ParticipantId::new(), group.id, Action::Call)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::NotMember);
        assert!(!verdict.is_allowed());
    }

    #[tokio::test]
    async fn test_revocation_applies_immediately() {
        let (backend, mut group, member) = setup().await;
        let guard = PermissionGuard::new(backend.clone());

        assert!(guard.check(member, group.id, Action::Call).await.is_ok());

        group
            .set_permissions(group.creator, member, None, Some(false))
            .unwrap();
        backend.save_group(group.clone()).await.unwrap();

        let err = guard.check(member, group.id, Action::Call).await.unwrap_err();
        assert_eq!(err.to_string(), "No permission to call in this group");
    }

    #[tokio::test]
    async fn test_missing_group() {
        let backend = Arc::new(MemoryBackend::new());
        let guard = PermissionGuard::new(backend);
        let err = guard
            .check(ParticipantId::new(), GroupId::new(), Action::Send)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotFound("Group")));
    }
}
