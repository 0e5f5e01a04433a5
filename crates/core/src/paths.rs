//! Store key paths
//!
//! A path is a `/`-separated list of segments. Empty segments are ignored,
//! so `"session//votes/"` and `"session/votes"` name the same node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ParticipantId, RoundId, TicketId};

/// Characters that may not appear in a path segment
const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// A validated key path into the session document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The document root
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut path = Self::root();
        for segment in s.split('/').filter(|seg| !seg.is_empty()) {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    /// Append one segment
    pub fn child(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains('/') {
            return Err(Error::InvalidPath(format!("bad segment '{}'", segment)));
        }
        if let Some(c) = segment.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(Error::InvalidPath(format!(
                "segment '{}' contains '{}'",
                segment, c
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` equals `other` or lies above it
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// True if a change at one path can alter the value seen at the other
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for StorePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StorePath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.to_string()
    }
}

/// Session layout:
///
/// ```text
/// session/participants/{participantId}
/// session/currentTicket
/// session/tickets/{ticketId}
/// session/votes/{roundId}/{participantId}
/// session/revealed/{roundId}
/// ```
pub mod session {
    use super::*;

    pub const ROOT: &str = "session";

    fn base(name: &str) -> StorePath {
        StorePath {
            segments: vec![ROOT.to_string(), name.to_string()],
        }
    }

    fn keyed(name: &str, key: &str) -> Result<StorePath> {
        base(name).child(key)
    }

    pub fn participants() -> StorePath {
        base("participants")
    }

    pub fn participant(id: &ParticipantId) -> Result<StorePath> {
        keyed("participants", id.as_str())
    }

    pub fn current_ticket() -> StorePath {
        base("currentTicket")
    }

    pub fn tickets() -> StorePath {
        base("tickets")
    }

    pub fn ticket(id: &TicketId) -> Result<StorePath> {
        keyed("tickets", id.as_str())
    }

    pub fn votes() -> StorePath {
        base("votes")
    }

    pub fn round_votes(round: &RoundId) -> Result<StorePath> {
        keyed("votes", round.as_str())
    }

    pub fn vote(round: &RoundId, id: &ParticipantId) -> Result<StorePath> {
        round_votes(round)?.child(id.as_str())
    }

    pub fn revealed(round: &RoundId) -> Result<StorePath> {
        keyed("revealed", round.as_str())
    }

    /// Reveal flag of the round in progress
    pub fn current_revealed() -> StorePath {
        let mut path = base("revealed");
        path.segments.push(RoundId::CURRENT.to_string());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_empty_segments() {
        let a = StorePath::parse("/session//votes/").unwrap();
        let b = StorePath::parse("session/votes").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "session/votes");
        assert!(StorePath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_parse_rejects_forbidden_chars() {
        assert!(StorePath::parse("session/a.b").is_err());
        assert!(StorePath::parse("session/$x").is_err());
        assert!(StorePath::parse("session/[0]").is_err());
    }

    #[test]
    fn test_ancestry() {
        let votes = session::votes();
        let vote = session::vote(&RoundId::current(), &ParticipantId::from("p1")).unwrap();

        assert!(votes.is_ancestor_of(&vote));
        assert!(!vote.is_ancestor_of(&votes));
        assert!(votes.is_ancestor_of(&votes));
        assert!(votes.overlaps(&vote));
        assert!(vote.overlaps(&votes));
        assert!(!votes.overlaps(&session::participants()));
        assert!(StorePath::root().is_ancestor_of(&vote));
    }

    #[test]
    fn test_session_paths() {
        let round = RoundId::current();
        assert_eq!(
            session::revealed(&round).unwrap().to_string(),
            "session/revealed/current-round"
        );
        assert_eq!(
            session::vote(&round, &ParticipantId::from("abc")).unwrap().to_string(),
            "session/votes/current-round/abc"
        );
        assert_eq!(session::current_ticket().to_string(), "session/currentTicket");
        assert_eq!(session::current_revealed(), session::revealed(&round).unwrap());
    }

    #[test]
    fn test_serde_as_string() {
        let path = session::participants();
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!("session/participants"));
        let back: StorePath = serde_json::from_value(json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_value::<StorePath>(serde_json::json!("a/b.c")).is_err());
    }
}
