//! The estimation deck

use super::VoteValue;

/// A card in the deck
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Card {
    pub value: VoteValue,
    pub label: &'static str,
}

/// Cards offered to voters, in display order
pub const POKER_CARDS: &[Card] = &[
    Card { value: VoteValue::Numeric(0.0), label: "0" },
    Card { value: VoteValue::Numeric(1.0), label: "1" },
    Card { value: VoteValue::Numeric(2.0), label: "2" },
    Card { value: VoteValue::Numeric(3.0), label: "3" },
    Card { value: VoteValue::Numeric(5.0), label: "5" },
    Card { value: VoteValue::Numeric(8.0), label: "8" },
    Card { value: VoteValue::Numeric(13.0), label: "13" },
    Card { value: VoteValue::Numeric(21.0), label: "21" },
    Card { value: VoteValue::Numeric(34.0), label: "34" },
    Card { value: VoteValue::Numeric(55.0), label: "55" },
    Card { value: VoteValue::Numeric(89.0), label: "89" },
    Card { value: VoteValue::Unknown, label: "?" },
    Card { value: VoteValue::Break, label: "☕" },
];

impl Card {
    /// Find a deck card by its label or value (`coffee` is accepted for ☕)
    pub fn parse(input: &str) -> Option<Card> {
        let input = input.trim();
        if let Some(card) = POKER_CARDS.iter().find(|c| c.label == input) {
            return Some(*card);
        }
        let value: VoteValue = input.parse().ok()?;
        POKER_CARDS.iter().find(|c| c.value == value).copied()
    }

    /// Display label for any value, falling back to the value itself
    pub fn label_for(value: &VoteValue) -> String {
        POKER_CARDS
            .iter()
            .find(|c| c.value == *value)
            .map(|c| c.label.to_string())
            .unwrap_or_else(|| value.to_string())
    }
}
