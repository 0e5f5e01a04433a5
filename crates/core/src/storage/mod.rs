//! SQLite storage layer for local identity

mod identity;
mod migrations;
mod parse;
mod traits;

use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::models::ParticipantId;

pub use identity::IdentityStore;
pub use traits::IdentityRepository;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        debug!(schema_version = self.schema_version(), "Database ready");
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    /// Get identity store for the participant id and display name
    pub fn identity(&self) -> IdentityStore<'_> {
        IdentityStore::new(&self.conn)
    }
}

impl IdentityRepository for Database {
    fn get_or_create_participant_id(&self) -> Result<ParticipantId> {
        self.identity().get_or_create_participant_id()
    }

    fn display_name(&self) -> Result<String> {
        self.identity().display_name()
    }

    fn set_display_name(&self, name: &str) -> Result<()> {
        self.identity().set_display_name(name)
    }
}
