//! Vote model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ParticipantId, Timestamp};
use crate::error::{Error, Result};

const UNKNOWN_LABEL: &str = "?";
const BREAK_LABEL: &str = "coffee";

/// A card value.
///
/// On the wire a numeric value is a JSON number and the symbolic values
/// are the strings `"?"` and `"coffee"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoteValue {
    Numeric(f64),
    /// "?" - not sure
    Unknown,
    /// "coffee" - need a break
    Break,
}

impl VoteValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            VoteValue::Numeric(n) => Some(*n),
            VoteValue::Unknown | VoteValue::Break => None,
        }
    }
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteValue::Numeric(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            VoteValue::Numeric(n) => write!(f, "{}", n),
            VoteValue::Unknown => f.write_str(UNKNOWN_LABEL),
            VoteValue::Break => f.write_str(BREAK_LABEL),
        }
    }
}

impl FromStr for VoteValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            UNKNOWN_LABEL => Ok(VoteValue::Unknown),
            BREAK_LABEL | "☕" => Ok(VoteValue::Break),
            other => {
                let n: f64 = other
                    .parse()
                    .map_err(|_| Error::InvalidVote(format!("not a card value: '{}'", other)))?;
                if !n.is_finite() || n < 0.0 {
                    return Err(Error::InvalidVote(format!("out of range: {}", other)));
                }
                Ok(VoteValue::Numeric(n))
            }
        }
    }
}

impl Serialize for VoteValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            // Whole numbers go out as integers so other clients see `5`, not `5.0`
            VoteValue::Numeric(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                serializer.serialize_i64(*n as i64)
            }
            VoteValue::Numeric(n) => serializer.serialize_f64(*n),
            VoteValue::Unknown => serializer.serialize_str(UNKNOWN_LABEL),
            VoteValue::Break => serializer.serialize_str(BREAK_LABEL),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVoteValue {
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for VoteValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawVoteValue::deserialize(deserializer)? {
            RawVoteValue::Number(n) => Ok(VoteValue::Numeric(n)),
            RawVoteValue::Text(s) if s == UNKNOWN_LABEL => Ok(VoteValue::Unknown),
            RawVoteValue::Text(s) if s == BREAK_LABEL => Ok(VoteValue::Break),
            RawVoteValue::Text(s) => Err(serde::de::Error::custom(format!(
                "unknown vote value '{}'",
                s
            ))),
        }
    }
}

/// One participant's vote in a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub value: VoteValue,
    pub timestamp: Timestamp,
}

impl Vote {
    pub fn new(value: VoteValue) -> Self {
        Self {
            value,
            timestamp: Timestamp::now(),
        }
    }
}

/// Round identifier under `session/votes` and `session/revealed`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(String);

impl RoundId {
    /// The only round the live flow uses
    pub const CURRENT: &'static str = "current-round";

    pub fn current() -> Self {
        Self(Self::CURRENT.to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Votes of one round, keyed by participant
pub type RoundVotes = BTreeMap<ParticipantId, Vote>;

/// Votes of every open round
pub type VotesByRound = BTreeMap<RoundId, RoundVotes>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vote_value_wire_format() {
        assert_eq!(serde_json::to_value(VoteValue::Numeric(5.0)).unwrap(), json!(5));
        assert_eq!(serde_json::to_value(VoteValue::Numeric(0.5)).unwrap(), json!(0.5));
        assert_eq!(serde_json::to_value(VoteValue::Unknown).unwrap(), json!("?"));
        assert_eq!(serde_json::to_value(VoteValue::Break).unwrap(), json!("coffee"));
    }

    #[test]
    fn test_vote_value_from_wire() {
        let v: VoteValue = serde_json::from_value(json!(13)).unwrap();
        assert_eq!(v, VoteValue::Numeric(13.0));
        let v: VoteValue = serde_json::from_value(json!("coffee")).unwrap();
        assert_eq!(v, VoteValue::Break);
        assert!(serde_json::from_value::<VoteValue>(json!("tea")).is_err());
        assert!(serde_json::from_value::<VoteValue>(json!(true)).is_err());
    }

    #[test]
    fn test_vote_value_parse() {
        assert_eq!("8".parse::<VoteValue>().unwrap(), VoteValue::Numeric(8.0));
        assert_eq!("?".parse::<VoteValue>().unwrap(), VoteValue::Unknown);
        assert_eq!("☕".parse::<VoteValue>().unwrap(), VoteValue::Break);
        assert!("-1".parse::<VoteValue>().is_err());
        assert!("abc".parse::<VoteValue>().is_err());
    }

    #[test]
    fn test_vote_value_display() {
        assert_eq!(VoteValue::Numeric(21.0).to_string(), "21");
        assert_eq!(VoteValue::Numeric(0.5).to_string(), "0.5");
        assert_eq!(VoteValue::Unknown.to_string(), "?");
    }

    #[test]
    fn test_round_votes_from_store_value() {
        let json = json!({
            "current-round": {
                "alice": { "value": 5, "timestamp": 100 },
                "bob": { "value": "?", "timestamp": 101 }
            }
        });
        let votes: VotesByRound = serde_json::from_value(json).unwrap();
        let round = &votes[&RoundId::current()];
        assert_eq!(round[&ParticipantId::from("alice")].value, VoteValue::Numeric(5.0));
        assert_eq!(round[&ParticipantId::from("bob")].value, VoteValue::Unknown);
    }
}
