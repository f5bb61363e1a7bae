use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    Destination, FileRef, GroupId, MessageBody, MessageId, MessageRecord, ParticipantId, Presence,
};

/// Events a client may send over its connection.
///
/// Framed as `{ "event": <name>, "data": <payload> }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinGroup(GroupId),
    LeaveGroup(GroupId),
    ChatMessage(ChatMessageRequest),
    MarkRead(MarkRead),

    CallRequest(CallTarget),
    CallAccepted(CallTarget),
    CallRejected(CallTarget),
    CallEnded(CallEndTarget),

    StartGroupCall(GroupCallTarget),
    EndGroupCall(GroupCallTarget),

    Offer(SignalRequest),
    Answer(SignalRequest),
    IceCandidate(SignalRequest),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinGroup(_) => "joinGroup",
            ClientEvent::LeaveGroup(_) => "leaveGroup",
            ClientEvent::ChatMessage(_) => "chatMessage",
            ClientEvent::MarkRead(_) => "markRead",
            ClientEvent::CallRequest(_) => "callRequest",
            ClientEvent::CallAccepted(_) => "callAccepted",
            ClientEvent::CallRejected(_) => "callRejected",
            ClientEvent::CallEnded(_) => "callEnded",
            ClientEvent::StartGroupCall(_) => "startGroupCall",
            ClientEvent::EndGroupCall(_) => "endGroupCall",
            ClientEvent::Offer(_) => "offer",
            ClientEvent::Answer(_) => "answer",
            ClientEvent::IceCandidate(_) => "iceCandidate",
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    /// Correlation token chosen by the client for its optimistic placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl ChatMessageRequest {
    /// Exactly one of `recipient` or `group` must be set.
    pub fn destination(&self) -> Result<Destination, &'static str> {
        match (self.recipient, self.group) {
            (Some(r), None) => Ok(Destination::Participant(r)),
            (None, Some(g)) => Ok(Destination::Group(g)),
            (Some(_), Some(_)) => Err("A message cannot have both a recipient and a group"),
            (None, None) => Err("A message needs a recipient or a group"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallTarget {
    pub to: ParticipantId,
}

/// A call may end before the counterpart is known.
///
/// Missing or null `data`, a missing or null `to`, and an empty `to` all
/// parse as "no counterpart".
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CallEndTarget {
    pub to: Option<ParticipantId>,
}

impl<'de> Deserialize<'de> for CallEndTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            to: Option<String>,
        }

        let to = match Option::<Raw>::deserialize(deserializer)?.and_then(|raw| raw.to) {
            Some(to) if !to.trim().is_empty() => {
                Some(ParticipantId::parse(to.trim()).map_err(D::Error::custom)?)
            }
            _ => None,
        };
        Ok(Self { to })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCallTarget {
    pub group_id: GroupId,
}

/// WebRTC negotiation data. `payload` is relayed untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRequest {
    pub to: ParticipantId,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Events the server pushes to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once after the handshake succeeds.
    UserId(ParticipantId),
    ChatMessage(ChatMessageView),
    MessageRead(MessageReadNotice),
    Error(ErrorNotice),
    StatusUpdate(StatusUpdate),

    CallRequest(FromParticipant),
    CallAccepted(FromParticipant),
    CallRejected(FromParticipant),
    CallEnded(FromParticipant),

    GroupCallStarted(GroupCallStarted),
    GroupCallEnded(GroupCallEnded),

    Offer(SignalRelay),
    Answer(SignalRelay),
    IceCandidate(SignalRelay),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub user_id: ParticipantId,
    pub status: Presence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FromParticipant {
    pub from: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCallStarted {
    pub group_id: GroupId,
    pub caller_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCallEnded {
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRelay {
    pub from: ParticipantId,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadNotice {
    pub message_id: MessageId,
    pub reader_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderView {
    pub id: ParticipantId,
    pub name: String,
}

/// Whose copy of a stored message is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    /// The author sees the plaintext copy.
    Sender,
    /// A private recipient sees the sealed copy; group members see the shared
    /// plaintext.
    Recipient,
}

/// A stored message as delivered to one viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    pub id: MessageId,
    pub sender: SenderView,
    pub recipient: Option<ParticipantId>,
    pub group: Option<GroupId>,
    pub content: Option<String>,
    pub file: Option<FileRef>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    /// Echo of the sender's correlation token. Absent in history reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl ChatMessageView {
    pub fn render(
        record: &MessageRecord,
        sender_name: &str,
        perspective: Perspective,
        temp_id: Option<String>,
    ) -> Self {
        let content = match (&record.body, perspective) {
            (MessageBody::Text { plaintext, .. }, Perspective::Sender) => Some(plaintext.clone()),
            (MessageBody::Text { plaintext, ciphertext }, Perspective::Recipient) => {
                Some(ciphertext.clone().unwrap_or_else(|| plaintext.clone()))
            }
            (MessageBody::File(_), _) => None,
        };

        Self {
            id: record.id,
            sender: SenderView {
                id: record.sender,
                name: sender_name.to_string(),
            },
            recipient: record.destination.recipient(),
            group: record.destination.group(),
            content,
            file: record.body.file().cloned(),
            timestamp: record.timestamp,
            is_read: record.is_read,
            temp_id,
        }
    }
}
