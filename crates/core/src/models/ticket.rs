//! Ticket model

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Timestamp;

/// Ticket identifier: `ticket-<unix millis>-<9 base-36 chars>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    pub fn generate() -> Self {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..9)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(format!("ticket-{}-{}", Timestamp::now().as_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TicketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields supplied when adding a ticket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A story to estimate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

impl Ticket {
    pub fn from_draft(draft: TicketDraft) -> Self {
        Self {
            id: TicketId::generate(),
            title: draft.title,
            description: draft.description,
            created_at: Timestamp::now(),
        }
    }
}

/// All tickets, keyed by id
pub type Tickets = BTreeMap<TicketId, Ticket>;

/// The ticket following `current` in creation order (ties broken by id)
pub fn next_ticket<'a>(tickets: &'a Tickets, current: &Ticket) -> Option<&'a Ticket> {
    let key = (current.created_at, &current.id);
    tickets
        .values()
        .filter(|t| (t.created_at, &t.id) > key)
        .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
}
