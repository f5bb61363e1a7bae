//! v001 -- Initial schema creation.
//!
//! Creates `participants`, `groups`, `group_members` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name        TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'Offline',
    public_key  TEXT NOT NULL,                -- base64 X25519 public key
    created_at  TEXT NOT NULL                 -- RFC-3339
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name        TEXT NOT NULL,
    creator_id  TEXT NOT NULL,                -- FK -> participants(id)
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id          TEXT NOT NULL,
    participant_id    TEXT NOT NULL,
    can_send_messages INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    can_call          INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    position          INTEGER NOT NULL,            -- insertion order

    PRIMARY KEY (group_id, participant_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_participant
    ON group_members(participant_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    sender_id         TEXT NOT NULL,
    recipient_id      TEXT,                       -- private messages
    group_id          TEXT,                       -- group messages
    plaintext_content TEXT,                       -- sender's copy
    encrypted_content TEXT,                       -- recipient's sealed copy
    file_name         TEXT,
    file_url          TEXT,
    file_size         INTEGER,
    file_mime_type    TEXT,
    timestamp         TEXT NOT NULL,
    is_read           INTEGER NOT NULL DEFAULT 0,

    CHECK ((recipient_id IS NULL) <> (group_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_messages_private
    ON messages(sender_id, recipient_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages(group_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
