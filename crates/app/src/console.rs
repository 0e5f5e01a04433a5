//! Line-oriented console front end

use std::fmt::Write as _;

use poker_core::{Card, StoreKind, TicketDraft, VoteSummary, VoteValue, POKER_CARDS};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::controller::SessionController;
use crate::state::SessionState;

const HELP: &str = "commands: join <name> | vote <card> | reveal | reset | next | ticket <title> | status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join(String),
    Vote(VoteValue),
    Reveal,
    Reset,
    Next,
    Ticket(String),
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_lowercase().as_str() {
        "join" if !rest.is_empty() => Ok(Command::Join(rest.to_string())),
        "join" => Err("usage: join <name>".into()),
        "vote" => Card::parse(rest).map(|card| Command::Vote(card.value)).ok_or_else(|| {
            let deck: Vec<&str> = POKER_CARDS.iter().map(|c| c.label).collect();
            format!("pick one of: {} (or coffee)", deck.join(" "))
        }),
        "reveal" => Ok(Command::Reveal),
        "reset" => Ok(Command::Reset),
        "next" => Ok(Command::Next),
        "ticket" if !rest.is_empty() => Ok(Command::Ticket(rest.to_string())),
        "ticket" => Err("usage: ticket <title>".into()),
        "status" | "" => Ok(Command::Status),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{}'; {}", other, HELP)),
    }
}

/// Text view of the session
pub fn render(state: &SessionState, store: StoreKind) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== Planning poker ({} store) ==", store);

    if let Some(error) = &state.error {
        let _ = writeln!(out, "Error: {}", error);
    }
    if state.loading {
        let _ = writeln!(out, "Loading session...");
        return out;
    }

    match &state.current_ticket {
        Some(ticket) => {
            let _ = writeln!(out, "Ticket: {}", ticket.title);
            if let Some(description) = &ticket.description {
                let _ = writeln!(out, "  {}", description);
            }
        }
        None => {
            let _ = writeln!(out, "Ticket: (none)");
        }
    }
    let queue = state.ticket_queue();
    if queue.len() > 1 {
        let titles: Vec<&str> = queue.iter().map(|t| t.title.as_str()).collect();
        let _ = writeln!(out, "Queue: {}", titles.join(", "));
    }

    let votes = state.current_round_votes();
    if state.participants.is_empty() {
        let _ = writeln!(out, "Nobody has joined yet");
    }
    for (id, participant) in &state.participants {
        let vote = votes.and_then(|v| v.get(id));
        let marker = if state.has_voted(id) { "x" } else { " " };
        let you = if state.participant_id.as_ref() == Some(id) {
            " (you)"
        } else {
            ""
        };
        let shown = match vote {
            Some(vote) if state.revealed => format!(": {}", Card::label_for(&vote.value)),
            _ => String::new(),
        };
        let _ = writeln!(out, "  [{}] {}{}{}", marker, participant.name, you, shown);
    }

    if state.revealed {
        let summary = VoteSummary::from_votes(votes.unwrap_or(&Default::default()));
        let _ = write!(out, "Average: {}", summary.average);
        if let (Some(low), Some(high)) = (summary.lowest, summary.highest) {
            let _ = write!(out, " (low {}, high {})", low, high);
        }
        let _ = writeln!(
            out,
            ", {} of {} votes numeric",
            summary.numeric_votes, summary.total_votes
        );
    } else if state.everyone_voted() {
        let _ = writeln!(out, "Everyone voted, revealing...");
    }

    out
}

fn execute(controller: &SessionController, command: Command) -> poker_core::Result<()> {
    // Remote completion is not awaited; failures are logged by the controller
    match command {
        Command::Join(name) => drop(controller.join(&name)?),
        Command::Vote(value) => drop(controller.submit_vote(value)?),
        Command::Reveal => drop(controller.reveal_votes()?),
        Command::Reset => drop(controller.start_new_round()?),
        Command::Next => drop(controller.advance_ticket()?),
        Command::Ticket(title) => drop(controller.add_ticket(TicketDraft {
            title,
            description: None,
        })?),
        Command::Status => println!("{}", render(&controller.snapshot(), controller.store_kind())),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

/// Read commands from stdin until `quit` or EOF, redrawing on every change
pub async fn run(controller: &SessionController) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = controller.watch();
    let mut last_frame = String::new();

    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(controller, command) {
                            println!("error: {}", e);
                        }
                    }
                    Err(message) => println!("{}", message),
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = render(&state_rx.borrow_and_update(), controller.store_kind());
                if frame != last_frame {
                    print!("{}", frame);
                    last_frame = frame;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use poker_core::{Participant, ParticipantId, RoundId, RoundVotes, Timestamp, Vote};

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("join  Ada Lovelace "), Ok(Command::Join("Ada Lovelace".into())));
        assert_eq!(parse_command("vote 8"), Ok(Command::Vote(VoteValue::Numeric(8.0))));
        assert_eq!(parse_command("VOTE coffee"), Ok(Command::Vote(VoteValue::Break)));
        assert_eq!(parse_command("vote ?"), Ok(Command::Vote(VoteValue::Unknown)));
        assert_eq!(parse_command("ticket Login page"), Ok(Command::Ticket("Login page".into())));
        assert_eq!(parse_command(""), Ok(Command::Status));
        assert_eq!(parse_command("quit"), Ok(Command::Quit));

        assert!(parse_command("vote 4").is_err());
        assert!(parse_command("join").is_err());
        assert!(parse_command("dance").is_err());
    }

    fn state_with_votes(revealed: bool) -> SessionState {
        let mut state = SessionState {
            loading: false,
            revealed,
            participant_id: Some(ParticipantId::from("a")),
            ..SessionState::default()
        };
        let mut round = RoundVotes::new();
        for (id, name, value) in [("a", "Ada", 5.0), ("b", "Bob", 8.0)] {
            state
                .participants
                .insert(ParticipantId::from(id), Participant::new(name));
            round.insert(
                ParticipantId::from(id),
                Vote {
                    value: VoteValue::Numeric(value),
                    timestamp: Timestamp(0),
                },
            );
        }
        state.votes_by_round.insert(RoundId::current(), round);
        state
    }

    #[test]
    fn test_render_hides_votes_until_revealed() {
        let hidden = render(&state_with_votes(false), StoreKind::Memory);
        assert!(hidden.contains("[x] Ada (you)\n"));
        assert!(!hidden.contains(": 5"));
        assert!(hidden.contains("Everyone voted"));

        let shown = render(&state_with_votes(true), StoreKind::Network);
        assert!(shown.contains("[x] Bob: 8"));
        assert!(shown.contains("Average: 6.5 (low 5, high 8)"));
        assert!(shown.contains("network store"));
    }

    #[test]
    fn test_render_loading() {
        let frame = render(&SessionState::default(), StoreKind::Memory);
        assert!(frame.contains("Loading session"));
        assert!(!frame.contains("Ticket"));
    }
}
