//! The message ledger: append, lookup, read receipts and history queries.

use chrono::Utc;
use rusqlite::params;

use parley_shared::types::{
    Destination, FileRef, GroupId, MessageBody, MessageId, MessageRecord, NewMessage,
    ParticipantId,
};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::row::{opt_uuid_at, timestamp_at, uuid_at};

const SELECT_COLUMNS: &str = "SELECT id, sender_id, recipient_id, group_id,
        plaintext_content, encrypted_content,
        file_name, file_url, file_size, file_mime_type,
        timestamp, is_read
    FROM messages";

impl Database {
    /// Persist a message, assigning its id and timestamp.
    pub fn insert_message(&self, message: &NewMessage) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: MessageId::new(),
            sender: message.sender,
            destination: message.destination,
            body: message.body.clone(),
            timestamp: Utc::now(),
            is_read: false,
        };

        let file = record.body.file();
        self.conn().execute(
            "INSERT INTO messages (
                id, sender_id, recipient_id, group_id,
                plaintext_content, encrypted_content,
                file_name, file_url, file_size, file_mime_type,
                timestamp, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)",
            params![
                record.id.to_string(),
                record.sender.to_string(),
                record.destination.recipient().map(|r| r.to_string()),
                record.destination.group().map(|g| g.to_string()),
                record.body.plaintext(),
                record.body.ciphertext(),
                file.map(|f| f.name.as_str()),
                file.map(|f| f.url.as_str()),
                file.map(|f| f.size as i64),
                file.map(|f| f.mime_type.as_str()),
                record.timestamp.to_rfc3339(),
            ],
        )?;

        Ok(record)
    }

    pub fn get_message(&self, id: MessageId) -> Result<MessageRecord> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?
    }

    /// Flip the read flag. Returns `false` if it was already set.
    pub fn mark_read(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1
             WHERE id = ?1 AND recipient_id IS NOT NULL AND is_read = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Both directions of a private conversation, oldest first.
    pub fn private_conversation(
        &self,
        a: ParticipantId,
        b: ParticipantId,
    ) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;
        collect(rows)
    }

    pub fn group_messages(&self, group: GroupId) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS} WHERE group_id = ?1 ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![group.to_string()], row_to_message)?;
        collect(rows)
    }
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<Result<MessageRecord>>>,
) -> Result<Vec<MessageRecord>> {
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row??);
    }
    Ok(messages)
}

/// Rows decode in two layers: SQL type errors, then domain-shape violations.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<MessageRecord>> {
    let id = MessageId(uuid_at(row, 0)?);
    let sender = ParticipantId(uuid_at(row, 1)?);
    let recipient = opt_uuid_at(row, 2)?.map(ParticipantId);
    let group = opt_uuid_at(row, 3)?.map(GroupId);
    let plaintext: Option<String> = row.get(4)?;
    let ciphertext: Option<String> = row.get(5)?;
    let file_name: Option<String> = row.get(6)?;
    let file_url: Option<String> = row.get(7)?;
    let file_size: Option<i64> = row.get(8)?;
    let file_mime: Option<String> = row.get(9)?;
    let timestamp = timestamp_at(row, 10)?;
    let is_read: bool = row.get(11)?;

    let destination = match (recipient, group) {
        (Some(r), None) => Destination::Participant(r),
        (None, Some(g)) => Destination::Group(g),
        _ => return Ok(Err(StoreError::Corrupt(format!("message {id} destination")))),
    };

    let body = match (plaintext, file_name, file_url) {
        (Some(plaintext), None, None) => MessageBody::Text {
            plaintext,
            ciphertext,
        },
        (None, Some(name), Some(url)) => MessageBody::File(FileRef {
            name,
            url,
            size: file_size.unwrap_or_default().max(0) as u64,
            mime_type: file_mime.unwrap_or_default(),
        }),
        _ => return Ok(Err(StoreError::Corrupt(format!("message {id} body")))),
    };

    Ok(Ok(MessageRecord {
        id,
        sender,
        destination,
        body,
        timestamp,
        is_read,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(sender: ParticipantId, destination: Destination, body: &str) -> NewMessage {
        NewMessage {
            sender,
            destination,
            body: MessageBody::Text {
                plaintext: body.into(),
                ciphertext: destination.recipient().map(|_| format!("sealed({body})")),
            },
        }
    }

    #[test]
    fn append_assigns_identity() {
        let db = Database::open_in_memory().unwrap();
        let a = ParticipantId::new();
        let b = ParticipantId::new();

        let first = db.insert_message(&text(a, Destination::Participant(b), "one")).unwrap();
        let second = db.insert_message(&text(a, Destination::Participant(b), "two")).unwrap();

        assert_ne!(first.id, second.id);
        assert!(!first.is_read);
        assert_eq!(db.get_message(first.id).unwrap(), first);
    }

    #[test]
    fn file_message_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let msg = NewMessage {
            sender: ParticipantId::new(),
            destination: Destination::Group(GroupId::new()),
            body: MessageBody::File(FileRef {
                name: "plan.pdf".into(),
                url: "/uploads/plan.pdf".into(),
                size: 2048,
                mime_type: "application/pdf".into(),
            }),
        };

        let stored = db.insert_message(&msg).unwrap();
        let loaded = db.get_message(stored.id).unwrap();
        assert_eq!(loaded.body, msg.body);
        assert_eq!(loaded.body.plaintext(), None);
    }

    #[test]
    fn mark_read_only_once_and_only_private() {
        let db = Database::open_in_memory().unwrap();
        let a = ParticipantId::new();
        let private = db
            .insert_message(&text(a, Destination::Participant(ParticipantId::new()), "p"))
            .unwrap();
        let group = db
            .insert_message(&text(a, Destination::Group(GroupId::new()), "g"))
            .unwrap();

        assert!(db.mark_read(private.id).unwrap());
        assert!(!db.mark_read(private.id).unwrap());
        assert!(!db.mark_read(group.id).unwrap());
        assert!(db.get_message(private.id).unwrap().is_read);
    }

    #[test]
    fn conversation_includes_both_directions_only() {
        let db = Database::open_in_memory().unwrap();
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let c = ParticipantId::new();

        db.insert_message(&text(a, Destination::Participant(b), "ab")).unwrap();
        db.insert_message(&text(b, Destination::Participant(a), "ba")).unwrap();
        db.insert_message(&text(a, Destination::Participant(c), "ac")).unwrap();

        let convo = db.private_conversation(a, b).unwrap();
        let bodies: Vec<_> = convo.iter().filter_map(|m| m.body.plaintext()).collect();
        assert_eq!(bodies, vec!["ab", "ba"]);
    }

    #[test]
    fn group_history() {
        let db = Database::open_in_memory().unwrap();
        let g = GroupId::new();
        db.insert_message(&text(ParticipantId::new(), Destination::Group(g), "hi")).unwrap();
        db.insert_message(&text(ParticipantId::new(), Destination::Group(GroupId::new()), "x"))
            .unwrap();

        assert_eq!(db.group_messages(g).unwrap().len(), 1);
    }

    #[test]
    fn unknown_message() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_message(MessageId::new()),
            Err(StoreError::NotFound)
        ));
    }
}
