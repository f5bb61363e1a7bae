//! CRUD operations for [`Group`] records and their memberships.

use rusqlite::params;

use parley_shared::types::{Group, GroupId, Membership, ParticipantId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::row::{timestamp_at, uuid_at};

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace a group together with its full membership list.
    pub fn save_group(&self, group: &Group) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO groups (id, name, creator_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![
                group.id.to_string(),
                group.name,
                group.creator.to_string(),
                group.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1",
            params![group.id.to_string()],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO group_members
                    (group_id, participant_id, can_send_messages, can_call, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, member) in group.members.iter().enumerate() {
                stmt.execute(params![
                    group.id.to_string(),
                    member.participant_id.to_string(),
                    member.can_send_messages,
                    member.can_call,
                    position as i64,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a group and its memberships. Returns `true` if a row was deleted.
    pub fn delete_group(&self, id: GroupId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM groups WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let (name, creator, created_at) = self
            .conn()
            .query_row(
                "SELECT name, creator_id, created_at FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, uuid_at(row, 1)?, timestamp_at(row, 2)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Group {
            id,
            name,
            creator: ParticipantId(creator),
            members: self.members_of(id)?,
            created_at,
        })
    }

    /// Groups the participant created or belongs to, newest first.
    pub fn groups_for_participant(&self, who: ParticipantId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM groups
             WHERE creator_id = ?1
                OR id IN (SELECT group_id FROM group_members WHERE participant_id = ?1)
             ORDER BY created_at DESC",
        )?;
        let ids = stmt
            .query_map(params![who.to_string()], |row| uuid_at(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.into_iter()
            .map(|id| self.get_group(GroupId(id)))
            .collect()
    }

    fn members_of(&self, id: GroupId) -> Result<Vec<Membership>> {
        let mut stmt = self.conn().prepare(
            "SELECT participant_id, can_send_messages, can_call
             FROM group_members
             WHERE group_id = ?1
             ORDER BY position ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(Membership {
                participant_id: ParticipantId(uuid_at(row, 0)?),
                can_send_messages: row.get(1)?,
                can_call: row.get(2)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_round_trip_preserves_member_order() {
        let db = Database::open_in_memory().unwrap();
        let creator = ParticipantId::new();
        let a = ParticipantId::new();
        let b = ParticipantId::new();

        let mut group = Group::new("crew", creator).unwrap();
        group.add_member(creator, b, false, true).unwrap();
        group.add_member(creator, a, true, false).unwrap();
        db.save_group(&group).unwrap();

        let loaded = db.get_group(group.id).unwrap();
        assert_eq!(loaded, group);
    }

    #[test]
    fn save_replaces_membership() {
        let db = Database::open_in_memory().unwrap();
        let creator = ParticipantId::new();
        let member = ParticipantId::new();

        let mut group = Group::new("crew", creator).unwrap();
        group.add_member(creator, member, true, true).unwrap();
        db.save_group(&group).unwrap();

        group.remove_member(creator, member).unwrap();
        db.save_group(&group).unwrap();

        assert!(!db.get_group(group.id).unwrap().includes(member));
    }

    #[test]
    fn groups_for_member_and_creator() {
        let db = Database::open_in_memory().unwrap();
        let creator = ParticipantId::new();
        let member = ParticipantId::new();
        let outsider = ParticipantId::new();

        let mut group = Group::new("crew", creator).unwrap();
        group.add_member(creator, member, false, false).unwrap();
        db.save_group(&group).unwrap();

        assert_eq!(db.groups_for_participant(creator).unwrap().len(), 1);
        assert_eq!(db.groups_for_participant(member).unwrap().len(), 1);
        assert!(db.groups_for_participant(outsider).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_members() {
        let db = Database::open_in_memory().unwrap();
        let creator = ParticipantId::new();
        let group = Group::new("gone", creator).unwrap();
        db.save_group(&group).unwrap();

        assert!(db.delete_group(group.id).unwrap());
        assert!(!db.delete_group(group.id).unwrap());
        assert!(matches!(db.get_group(group.id), Err(StoreError::NotFound)));

        let orphans: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM group_members", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
