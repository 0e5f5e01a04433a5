//! Store selection
//!
//! A configured, reachable session server gives a [`NetworkStore`]. Anything
//! else (no URL, a bad URL, a refused or unreachable server) falls back to the
//! in-process [`MemoryStore`] so the session stays usable locally.

use std::sync::Arc;

use poker_core::{MemoryStore, ParticipantId, RemoteStore};
use poker_net::{NetworkStore, SessionEndpoint};
use tracing::{info, warn};

use crate::config::Config;

/// Pick the store for this run
pub async fn connect_store(config: &Config, participant_id: &ParticipantId) -> Arc<dyn RemoteStore> {
    let Some(url) = config.server_url.as_deref() else {
        info!("No session server configured, using local store");
        return Arc::new(MemoryStore::new());
    };

    let endpoint = match SessionEndpoint::parse(url) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(url = %url, error = %e, "Bad session server URL, using local store");
            return Arc::new(MemoryStore::new());
        }
    };

    let options = config.client_options(participant_id.as_str());
    match NetworkStore::connect(endpoint, options).await {
        Ok(store) => {
            info!(url = %url, "Connected to session server");
            Arc::new(store)
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Session server unavailable, using local store");
            Arc::new(MemoryStore::new())
        }
    }
}
