//! Data models for planning poker sessions

mod card;
mod participant;
mod ticket;
mod timestamp;
mod vote;

pub use card::*;
pub use participant::*;
pub use ticket::*;
pub use timestamp::*;
pub use vote::*;
