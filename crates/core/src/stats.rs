//! Round results

use crate::models::{Participants, RoundVotes};

/// Mean of the numeric votes, rounded to 2 decimals; 0 when none are numeric
pub fn calculate_average(votes: &RoundVotes) -> f64 {
    let numeric: Vec<f64> = votes.values().filter_map(|v| v.value.as_number()).collect();
    if numeric.is_empty() {
        return 0.0;
    }
    let mean = numeric.iter().sum::<f64>() / numeric.len() as f64;
    (mean * 100.0).round() / 100.0
}

/// True if there is at least one participant and every one has voted
pub fn all_participants_voted(participants: &Participants, votes: &RoundVotes) -> bool {
    !participants.is_empty() && participants.keys().all(|id| votes.contains_key(id))
}

/// Summary shown once a round is revealed
#[derive(Debug, Clone, PartialEq)]
pub struct VoteSummary {
    pub average: f64,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    /// Votes that count toward the average
    pub numeric_votes: usize,
    pub total_votes: usize,
}

impl VoteSummary {
    pub fn from_votes(votes: &RoundVotes) -> Self {
        let numeric: Vec<f64> = votes.values().filter_map(|v| v.value.as_number()).collect();
        Self {
            average: calculate_average(votes),
            highest: numeric.iter().copied().reduce(f64::max),
            lowest: numeric.iter().copied().reduce(f64::min),
            numeric_votes: numeric.len(),
            total_votes: votes.len(),
        }
    }
}
