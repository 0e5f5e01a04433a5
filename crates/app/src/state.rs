//! Session state and its reducer
//!
//! Everything the console renders lives in [`SessionState`]. It only changes
//! through [`reduce`], which swaps out exactly the slice an event names.

use poker_core::{
    all_participants_voted, ParticipantId, Participants, RoundId, RoundVotes, Ticket, Tickets,
    VotesByRound,
};

/// Local view of the shared session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub participant_id: Option<ParticipantId>,
    pub display_name: String,
    pub participants: Participants,
    pub current_ticket: Option<Ticket>,
    pub tickets: Tickets,
    pub votes_by_round: VotesByRound,
    /// Whether the current round is revealed
    pub revealed: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            participant_id: None,
            display_name: String::new(),
            participants: Participants::new(),
            current_ticket: None,
            tickets: Tickets::new(),
            votes_by_round: VotesByRound::new(),
            revealed: false,
            loading: true,
            error: None,
        }
    }
}

impl SessionState {
    /// Votes cast in the current round
    pub fn current_round_votes(&self) -> Option<&RoundVotes> {
        self.votes_by_round.get(&RoundId::current())
    }

    /// Whether every present participant has voted this round
    pub fn everyone_voted(&self) -> bool {
        match self.current_round_votes() {
            Some(votes) => all_participants_voted(&self.participants, votes),
            None => false,
        }
    }

    /// Whether this client's participant has voted this round
    pub fn has_voted(&self, id: &ParticipantId) -> bool {
        self.current_round_votes()
            .is_some_and(|votes| votes.contains_key(id))
    }

    /// Tickets in creation order
    pub fn ticket_queue(&self) -> Vec<&Ticket> {
        let mut queue: Vec<&Ticket> = self.tickets.values().collect();
        queue.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        queue
    }
}

/// Something that happened to the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UserIdentified {
        participant_id: ParticipantId,
        display_name: String,
    },
    ParticipantsChanged(Participants),
    CurrentTicketChanged(Option<Ticket>),
    TicketsChanged(Tickets),
    VotesChanged(VotesByRound),
    RevealedChanged(bool),
    LoadingChanged(bool),
    ErrorOccurred(String),
}

/// Apply one event. Pure: the same state and event always give the same result.
pub fn reduce(state: SessionState, event: SessionEvent) -> SessionState {
    match event {
        SessionEvent::UserIdentified {
            participant_id,
            display_name,
        } => SessionState {
            participant_id: Some(participant_id),
            display_name,
            ..state
        },
        SessionEvent::ParticipantsChanged(participants) => SessionState {
            participants,
            ..state
        },
        SessionEvent::CurrentTicketChanged(current_ticket) => SessionState {
            current_ticket,
            ..state
        },
        SessionEvent::TicketsChanged(tickets) => SessionState { tickets, ..state },
        SessionEvent::VotesChanged(votes_by_round) => SessionState {
            votes_by_round,
            ..state
        },
        SessionEvent::RevealedChanged(revealed) => SessionState { revealed, ..state },
        SessionEvent::LoadingChanged(loading) => SessionState { loading, ..state },
        SessionEvent::ErrorOccurred(error) => SessionState {
            error: Some(error),
            ..state
        },
    }
}
