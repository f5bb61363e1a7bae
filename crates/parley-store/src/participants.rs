//! CRUD operations for [`Participant`] records.

use chrono::Utc;
use rusqlite::params;

use parley_shared::types::{Participant, ParticipantId, Presence};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::row::uuid_at;

impl Database {
    pub fn insert_participant(&self, participant: &Participant) -> Result<()> {
        self.conn().execute(
            "INSERT INTO participants (id, name, status, public_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                participant.id.to_string(),
                participant.name,
                participant.status.as_str(),
                participant.public_key,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_participant(&self, id: ParticipantId) -> Result<Participant> {
        self.conn()
            .query_row(
                "SELECT id, name, status, public_key FROM participants WHERE id = ?1",
                params![id.to_string()],
                row_to_participant,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn set_presence(&self, id: ParticipantId, status: Presence) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Resolve display names for a batch of ids, skipping unknown ones.
    pub fn participant_names(&self, ids: &[ParticipantId]) -> Result<Vec<(ParticipantId, String)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name FROM participants WHERE id = ?1")?;
        let mut names = Vec::with_capacity(ids.len());
        for id in ids {
            let found = stmt.query_row(params![id.to_string()], |row| {
                Ok((ParticipantId(uuid_at(row, 0)?), row.get::<_, String>(1)?))
            });
            match found {
                Ok(pair) => names.push(pair),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(names)
    }
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let status: String = row.get(2)?;
    Ok(Participant {
        id: ParticipantId(uuid_at(row, 0)?),
        name: row.get(1)?,
        status: Presence::from_str_lossy(&status),
        public_key: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Participant {
        Participant {
            id: ParticipantId::new(),
            name: "Alice".into(),
            status: Presence::Offline,
            public_key: "AAAA".into(),
        }
    }

    #[test]
    fn participant_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let p = alice();
        db.insert_participant(&p).unwrap();

        assert_eq!(db.get_participant(p.id).unwrap(), p);
    }

    #[test]
    fn presence_update() {
        let db = Database::open_in_memory().unwrap();
        let p = alice();
        db.insert_participant(&p).unwrap();

        db.set_presence(p.id, Presence::Online).unwrap();
        assert_eq!(db.get_participant(p.id).unwrap().status, Presence::Online);
    }

    #[test]
    fn unknown_participant() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_participant(ParticipantId::new()),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.set_presence(ParticipantId::new(), Presence::Online),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn names_skip_unknown() {
        let db = Database::open_in_memory().unwrap();
        let p = alice();
        db.insert_participant(&p).unwrap();

        let names = db.participant_names(&[p.id, ParticipantId::new()]).unwrap();
        assert_eq!(names, vec![(p.id, "Alice".to_string())]);
    }
}
