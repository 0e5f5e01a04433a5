//! Poker Network Library
//!
//! Hosts and reaches a shared session document over TCP.
//!
//! # Architecture
//!
//! - **Server**: holds the document, applies writes in arrival order and
//!   pushes changed values to subscribers
//! - **NetworkStore**: client side, implements `poker_core::RemoteStore`
//! - **Protocol**: length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(DEFAULT_PORT, generate_token()).await?;
//!
//! let endpoint: SessionEndpoint = "poker://192.168.1.20:7340/3f9c0a7e5b1d4e2a".parse()?;
//! let store = NetworkStore::connect(endpoint, ClientOptions::new(participant_id)).await?;
//! store.write(&path, value).await?;
//! ```

pub mod client;
pub mod endpoint;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{ClientOptions, ConnectionState, NetworkStore, RECONNECT_DELAYS_MS};
pub use endpoint::SessionEndpoint;
pub use error::{Error, Result};
pub use protocol::{server_timestamp, Message, PROTOCOL_VERSION};
pub use server::{generate_token, Server};

/// Default port for session servers
pub const DEFAULT_PORT: u16 = 7340;
