//! Read model over the ledger for conversation history.

use std::collections::{HashMap, HashSet};

use parley_shared::protocol::{ChatMessageView, Perspective};
use parley_shared::types::{GroupId, MessageRecord, ParticipantId};

use crate::backend::{Directory, IdentityVerifier, Ledger};
use crate::error::HubError;
use crate::hub::Hub;

impl<V, D, L> Hub<V, D, L>
where
    V: IdentityVerifier,
    D: Directory,
    L: Ledger,
{
    /// Messages between `viewer` and `peer`, oldest first, rendered for
    /// `viewer`: own messages in plaintext, received ones sealed.
    pub async fn private_history(
        &self,
        viewer: ParticipantId,
        peer: ParticipantId,
    ) -> Result<Vec<ChatMessageView>, HubError> {
        let records = self
            .ledger
            .conversation(viewer, peer)
            .await
            .map_err(HubError::Persistence)?;
        self.render_history(viewer, records).await
    }

    pub async fn group_history(
        &self,
        viewer: ParticipantId,
        group_id: GroupId,
    ) -> Result<Vec<ChatMessageView>, HubError> {
        self.group_for_member(viewer, group_id).await?;
        let records = self
            .ledger
            .group_history(group_id)
            .await
            .map_err(HubError::Persistence)?;
        self.render_history(viewer, records).await
    }

    async fn render_history(
        &self,
        viewer: ParticipantId,
        records: Vec<MessageRecord>,
    ) -> Result<Vec<ChatMessageView>, HubError> {
        let senders: HashSet<ParticipantId> = records.iter().map(|r| r.sender).collect();
        let names: HashMap<ParticipantId, String> = self
            .directory
            .participant_names(senders.into_iter().collect())
            .await
            .map_err(HubError::Persistence)?
            .into_iter()
            .collect();

        Ok(records
            .iter()
            .map(|record| {
                let name = names.get(&record.sender).map(String::as_str).unwrap_or("Unknown");
                let perspective = if record.sender == viewer {
                    Perspective::Sender
                } else {
                    Perspective::Recipient
                };
                ChatMessageView::render(record, name, perspective, None)
            })
            .collect())
    }
}
