//! Poker Core Library
//!
//! Session models, the key-path store abstraction with its in-process
//! backend, vote statistics, and identity storage for planning poker.

pub mod error;
pub mod models;
pub mod paths;
pub mod stats;
pub mod storage;
pub mod store;

pub use error::{Error, Result};
pub use models::*;
pub use paths::StorePath;
pub use stats::{all_participants_voted, calculate_average, VoteSummary};
pub use storage::{Database, IdentityRepository, IdentityStore};
pub use store::{
    Document, MemoryStore, NotificationSink, RemoteStore, StoreKind, StoreNotification,
    Subscription,
};
