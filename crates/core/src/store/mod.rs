//! Remote session store abstraction
//!
//! A key-path store with point writes, point deletes and subscription-based
//! reads. The session controller talks to it only through [`RemoteStore`], so
//! the in-process [`MemoryStore`] and the networked client are
//! interchangeable.
//!
//! Subscribers receive the current value immediately, then every change of
//! the value at their path, in the order the writes were applied. Nothing is
//! guaranteed about ordering across different paths.

mod document;
mod memory;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::paths::StorePath;

pub use document::Document;
pub use memory::MemoryStore;

/// Change notification delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum StoreNotification {
    /// Current value at the subscribed path (`null` if none)
    Value { path: StorePath, value: Value },
    /// The subscription failed or its transport dropped; values may be stale
    /// until a later `Value` arrives
    Error { path: StorePath, reason: String },
}

/// Where notifications for one subscription are sent
pub type NotificationSink = mpsc::UnboundedSender<StoreNotification>;

/// Which backend is serving the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// In-process fallback, nothing leaves this client
    Memory,
    /// Shared session server
    Network,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Network => write!(f, "network"),
        }
    }
}

/// Key-path store shared by all session participants
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Watch the value at `path`
    fn subscribe(&self, path: &StorePath, sink: NotificationSink) -> Subscription;

    /// Replace the value at `path`
    async fn write(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Delete the value at `path` and everything beneath it
    async fn remove(&self, path: &StorePath) -> Result<()>;

    /// Payload meaning "now" from the store's point of view
    fn timestamp_now(&self) -> Value;

    fn kind(&self) -> StoreKind;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Cancellation handle for a subscription.
///
/// Unsubscribing is idempotent; dropping the handle unsubscribes.
pub struct Subscription {
    cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stop further notifications
    pub fn unsubscribe(&self) {
        let cancel = lock(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.cancel).is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
