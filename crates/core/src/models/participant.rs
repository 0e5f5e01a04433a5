//! Participant model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Timestamp;
use crate::error::{Error, Result};

/// Maximum display name length, in characters
pub const MAX_NAME_LEN: usize = 50;

/// Opaque participant identifier, stable per device
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a fresh globally-unique identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A session participant, keyed by id under `session/participants`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: Timestamp,
}

impl Participant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_seen: Timestamp::now(),
        }
    }
}

/// Participant mapping, ordered by id
pub type Participants = BTreeMap<ParticipantId, Participant>;

/// Trim and validate a user-supplied display name
pub fn validate_display_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidName("name must not be empty".into()));
    }
    let len = trimmed.chars().count();
    if len > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "name is {} characters (max {})",
            len, MAX_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}
