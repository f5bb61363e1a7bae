use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GroupError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }

            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Opaque participant identity.
    ParticipantId
);
uuid_id!(
    /// Opaque group identity.
    GroupId
);
uuid_id!(
    /// Identity assigned to a message when the ledger persists it.
    MessageId
);
uuid_id!(
    /// One live connection. Never persisted.
    SessionId
);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Online => "Online",
            Presence::Offline => "Offline",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("online") {
            Presence::Online
        } else {
            Presence::Offline
        }
    }
}

/// A registered participant as seen by the server. The private key is held by
/// the participant's own client only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub status: Presence,
    /// Base64 X25519 public key others encrypt to.
    pub public_key: String,
}

/// Actions gated per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Send,
    Call,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub participant_id: ParticipantId,
    pub can_send_messages: bool,
    pub can_call: bool,
}

impl Membership {
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Send => self.can_send_messages,
            Action::Call => self.can_call,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub creator: ParticipantId,
    pub members: Vec<Membership>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// A fresh group whose only member is its creator, holding both rights.
    pub fn new(name: impl Into<String>, creator: ParticipantId) -> Result<Self, GroupError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(GroupError::EmptyName);
        }
        Ok(Self {
            id: GroupId::new(),
            name,
            creator,
            members: vec![Membership {
                participant_id: creator,
                can_send_messages: true,
                can_call: true,
            }],
            created_at: Utc::now(),
        })
    }

    pub fn membership(&self, who: ParticipantId) -> Option<&Membership> {
        self.members.iter().find(|m| m.participant_id == who)
    }

    /// Creator or listed member.
    pub fn includes(&self, who: ParticipantId) -> bool {
        self.creator == who || self.membership(who).is_some()
    }

    fn ensure_creator(&self, actor: ParticipantId, what: &'static str) -> Result<(), GroupError> {
        if self.creator != actor {
            return Err(GroupError::NotCreator(what));
        }
        Ok(())
    }

    pub fn add_member(
        &mut self,
        actor: ParticipantId,
        member: ParticipantId,
        can_send_messages: bool,
        can_call: bool,
    ) -> Result<(), GroupError> {
        self.ensure_creator(actor, "add members")?;
        if self.includes(member) {
            return Err(GroupError::AlreadyMember);
        }
        self.members.push(Membership {
            participant_id: member,
            can_send_messages,
            can_call,
        });
        Ok(())
    }

    /// Flip the flags that are `Some`; `None` leaves a flag untouched.
    pub fn set_permissions(
        &mut self,
        actor: ParticipantId,
        member: ParticipantId,
        can_send_messages: Option<bool>,
        can_call: Option<bool>,
    ) -> Result<(), GroupError> {
        self.ensure_creator(actor, "modify permissions")?;
        if member == self.creator {
            return Err(GroupError::CreatorImmutable);
        }
        let entry = self
            .members
            .iter_mut()
            .find(|m| m.participant_id == member)
            .ok_or(GroupError::MemberNotFound)?;
        if let Some(v) = can_send_messages {
            entry.can_send_messages = v;
        }
        if let Some(v) = can_call {
            entry.can_call = v;
        }
        Ok(())
    }

    pub fn remove_member(
        &mut self,
        actor: ParticipantId,
        member: ParticipantId,
    ) -> Result<(), GroupError> {
        self.ensure_creator(actor, "remove members")?;
        if member == self.creator {
            return Err(GroupError::CreatorCannotLeave);
        }
        let before = self.members.len();
        self.members.retain(|m| m.participant_id != member);
        if self.members.len() == before {
            return Err(GroupError::MemberNotFound);
        }
        Ok(())
    }

    pub fn ensure_can_delete(&self, actor: ParticipantId) -> Result<(), GroupError> {
        self.ensure_creator(actor, "delete the group")
    }
}

/// Where a message goes: exactly one participant or exactly one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Participant(ParticipantId),
    Group(GroupId),
}

impl Destination {
    pub fn recipient(&self) -> Option<ParticipantId> {
        match self {
            Destination::Participant(p) => Some(*p),
            Destination::Group(_) => None,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self {
            Destination::Group(g) => Some(*g),
            Destination::Participant(_) => None,
        }
    }

    pub fn room(&self) -> RoomId {
        match self {
            Destination::Participant(p) => RoomId::Personal(*p),
            Destination::Group(g) => RoomId::Group(*g),
        }
    }
}

/// A fan-out destination: a participant's personal room or a group room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Personal(ParticipantId),
    Group(GroupId),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Personal(p) => write!(f, "user:{p}"),
            RoomId::Group(g) => write!(f, "group:{g}"),
        }
    }
}

/// Reference to an uploaded file. The upload itself happens elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub mime_type: String,
}

/// Message content. A message is either text or a file notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// `ciphertext` is the recipient-only copy; group messages carry none.
    Text {
        plaintext: String,
        ciphertext: Option<String>,
    },
    File(FileRef),
}

impl MessageBody {
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            MessageBody::Text { plaintext, .. } => Some(plaintext),
            MessageBody::File(_) => None,
        }
    }

    pub fn ciphertext(&self) -> Option<&str> {
        match self {
            MessageBody::Text { ciphertext, .. } => ciphertext.as_deref(),
            MessageBody::File(_) => None,
        }
    }

    pub fn file(&self) -> Option<&FileRef> {
        match self {
            MessageBody::File(f) => Some(f),
            MessageBody::Text { .. } => None,
        }
    }
}

/// A message accepted for persistence but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: ParticipantId,
    pub destination: Destination,
    pub body: MessageBody,
}

/// A message as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: ParticipantId,
    pub destination: Destination,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    /// Only meaningful for private messages.
    pub is_read: bool,
}
