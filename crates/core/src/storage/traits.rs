//! Storage repository traits
//!
//! The session controller only sees identity through this trait, so tests
//! can swap the SQLite database for a stub.

use crate::error::Result;
use crate::models::ParticipantId;

/// Durable local identity
pub trait IdentityRepository {
    /// Read the persisted participant id, generating and storing one if absent
    fn get_or_create_participant_id(&self) -> Result<ParticipantId>;

    /// Persisted display name, empty if never set
    fn display_name(&self) -> Result<String>;

    /// Persist a display name
    fn set_display_name(&self, name: &str) -> Result<()>;
}
