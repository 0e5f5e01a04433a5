//! Participant identity persistence
//!
//! Stores the anonymous participant id and the display name as key/value
//! settings. The id is written once and never changed.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, instrument};

use super::parse::OptionalExt;
use crate::error::Result;
use crate::models::ParticipantId;

const PARTICIPANT_ID_KEY: &str = "participant_id";
const DISPLAY_NAME_KEY: &str = "display_name";

/// Identity store
pub struct IdentityStore<'a> {
    conn: &'a Connection,
}

impl<'a> IdentityStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM identity WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Read the participant id, creating it on first use
    #[instrument(skip(self))]
    pub fn get_or_create_participant_id(&self) -> Result<ParticipantId> {
        if let Some(id) = self.get(PARTICIPANT_ID_KEY)? {
            return Ok(ParticipantId::from(id));
        }

        let id = ParticipantId::generate();
        // OR IGNORE: a concurrent first run may have stored one already
        self.conn.execute(
            "INSERT OR IGNORE INTO identity (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![PARTICIPANT_ID_KEY, id.as_str(), Utc::now().to_rfc3339()],
        )?;

        let stored = self.get(PARTICIPANT_ID_KEY)?.map(ParticipantId::from);
        let stored = stored.unwrap_or(id);
        info!(participant_id = %stored, "Participant id created");
        Ok(stored)
    }

    /// Persisted display name, empty if never set
    pub fn display_name(&self) -> Result<String> {
        Ok(self.get(DISPLAY_NAME_KEY)?.unwrap_or_default())
    }

    /// Persist a display name (no validation)
    #[instrument(skip(self))]
    pub fn set_display_name(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO identity (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![DISPLAY_NAME_KEY, name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, IdentityRepository};
    use tempfile::tempdir;

    #[test]
    fn test_participant_id_is_stable() {
        let db = Database::open_in_memory().unwrap();
        let first = db.identity().get_or_create_participant_id().unwrap();
        let second = db.identity().get_or_create_participant_id().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_participant_id_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poker.db");

        let id = {
            let db = Database::open(&path).unwrap();
            db.get_or_create_participant_id().unwrap()
        };

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_or_create_participant_id().unwrap(), id);
    }

    #[test]
    fn test_display_name_defaults_to_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.display_name().unwrap(), "");
    }

    #[test]
    fn test_display_name_update() {
        let db = Database::open_in_memory().unwrap();
        let id = db.get_or_create_participant_id().unwrap();

        db.set_display_name("Alice").unwrap();
        assert_eq!(db.display_name().unwrap(), "Alice");

        db.set_display_name("Alice B.").unwrap();
        assert_eq!(db.display_name().unwrap(), "Alice B.");

        // Renaming never touches the id
        assert_eq!(db.get_or_create_participant_id().unwrap(), id);
    }
}
