//! Chat messages and read receipts.

use std::sync::Arc;

use tracing::{debug, info};

use parley_shared::protocol::{
    ChatMessageRequest, ChatMessageView, MessageReadNotice, Perspective, ServerEvent,
};
use parley_shared::types::{
    Action, Destination, FileRef, MessageBody, MessageId, MessageRecord, NewMessage,
    Participant, RoomId,
};

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
    /// Validate, authorize, encrypt, persist and fan out one chat message.
    ///
    /// Every check runs before the ledger append; a rejected message leaves
    /// no record and reaches nobody.
    pub(crate) async fn send_chat(
        &self,
        session: &Session,
        request: ChatMessageRequest,
    ) -> Result<(), HubError> {
        let destination = request
            .destination()
            .map_err(|e| HubError::BadRequest(e.to_string()))?;
        let sender = self
            .directory
            .participant(session.participant())
            .await
            .map_err(HubError::store("Sender"))?;
        let ChatMessageRequest {
            content,
            file,
            temp_id,
            ..
        } = request;

        let body = match destination {
            Destination::Group(group) => {
                self.guard.check(sender.id, group, Action::Send).await?;
                match (file, non_empty(content)) {
                    (Some(file), _) => file_body(file)?,
                    (None, Some(text)) => MessageBody::Text {
                        plaintext: text,
                        ciphertext: None,
                    },
                    (None, None) => return Err(missing_content()),
                }
            }
            Destination::Participant(recipient) => {
                let recipient = self
                    .directory
                    .participant(recipient)
                    .await
                    .map_err(HubError::store("Recipient"))?;
                match (file, non_empty(content)) {
                    (Some(file), _) => file_body(file)?,
                    (None, Some(text)) => self.pipeline.prepare(&text, &recipient.public_key)?.into(),
                    (None, None) => return Err(missing_content()),
                }
            }
        };

        let sender_id = sender.id;
        let outcome = {
            let _lane = self.lanes.acquire(sender_id).await;
            self.store_and_confirm(session, sender, destination, body, temp_id)
                .await
        };
        self.lanes.release_idle(sender_id).await;
        outcome
    }

    async fn store_and_confirm(
        &self,
        session: &Session,
        sender: Participant,
        destination: Destination,
        body: MessageBody,
        temp_id: Option<String>,
    ) -> Result<(), HubError> {
        let record = self
            .ledger
            .append(NewMessage {
                sender: sender.id,
                destination,
                body,
            })
            .await
            .map_err(HubError::Persistence)?;

        info!(
            message = %record.id.short(),
            sender = %sender.id.short(),
            destination = %destination.room(),
            kind = if record.body.file().is_some() { "file" } else { "text" },
            "Message stored"
        );
        self.confirm(session, &record, &sender.name, temp_id).await;
        Ok(())
    }

    /// Push the stored message to everyone entitled to see it.
    ///
    /// Private: the sender's sessions get the plaintext view with the
    /// correlation token, the recipient's sessions get the sealed view.
    /// Group: one shared view to the group room, plus the originating
    /// session directly if it never joined that room.
    async fn confirm(
        &self,
        origin: &Session,
        record: &MessageRecord,
        sender_name: &str,
        temp_id: Option<String>,
    ) {
        match record.destination {
            Destination::Participant(recipient) => {
                let own = ChatMessageView::render(record, sender_name, Perspective::Sender, temp_id);
                self.router
                    .publish(RoomId::Personal(record.sender), ServerEvent::ChatMessage(own))
                    .await;

                if recipient != record.sender {
                    let theirs =
                        ChatMessageView::render(record, sender_name, Perspective::Recipient, None);
                    self.router
                        .publish(RoomId::Personal(recipient), ServerEvent::ChatMessage(theirs))
                        .await;
                }
            }
            Destination::Group(group) => {
                let room = RoomId::Group(group);
                let view = Arc::new(ServerEvent::ChatMessage(ChatMessageView::render(
                    record,
                    sender_name,
                    Perspective::Recipient,
                    temp_id,
                )));
                let delivered = self.router.publish_shared(room, view.clone()).await;
                if !origin.has_joined(room).await {
                    origin.send_shared(view);
                }
                debug!(group = %group.short(), delivered, "Group message delivered");
            }
        }
    }

    /// Mark a private message read and tell its sender.
    pub(crate) async fn mark_read(
        &self,
        session: &Session,
        message_id: MessageId,
    ) -> Result<(), HubError> {
        let reader = session.participant();
        let record = self
            .ledger
            .message(message_id)
            .await
            .map_err(HubError::store("Message"))?;

        match record.destination {
            Destination::Participant(recipient) if recipient == reader => {}
            Destination::Participant(_) => {
                return Err(HubError::Permission(
                    "Only the recipient can mark a message as read".to_string(),
                ));
            }
            Destination::Group(_) => {
                return Err(HubError::Permission(
                    "Group messages have no read receipts".to_string(),
                ));
            }
        }

        let changed = self
            .ledger
            .mark_read(message_id)
            .await
            .map_err(HubError::store("Message"))?;
        if changed {
            self.router
                .publish(
                    RoomId::Personal(record.sender),
                    ServerEvent::MessageRead(MessageReadNotice {
                        message_id,
                        reader_id: reader,
                    }),
                )
                .await;
        }
        Ok(())
    }
}

fn non_empty(content: Option<String>) -> Option<String> {
    content.filter(|c| !c.is_empty())
}

fn missing_content() -> HubError {
    HubError::BadRequest("Message content is required".to_string())
}

fn file_body(file: FileRef) -> Result<MessageBody, HubError> {
    if file.name.trim().is_empty() || file.url.trim().is_empty() {
        return Err(HubError::BadRequest(
            "File messages need a name and a url".to_string(),
        ));
    }
    Ok(MessageBody::File(file))
}
