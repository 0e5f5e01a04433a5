//! In-process session store
//!
//! Used when no session server is configured or reachable. Every clone shares
//! one document, so several controllers in the same process see each other's
//! writes exactly as they would through a server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{lock, Document, NotificationSink, RemoteStore, StoreKind, StoreNotification, Subscription};
use crate::error::Result;
use crate::models::Timestamp;
use crate::paths::StorePath;

struct Watcher {
    path: StorePath,
    sink: NotificationSink,
    /// Last value delivered, to skip notifications that change nothing
    last: Value,
}

#[derive(Default)]
struct Inner {
    document: Document,
    watchers: HashMap<u64, Watcher>,
    next_id: u64,
}

impl Inner {
    /// Push the new value to every watcher whose view changed
    fn notify(&mut self, changed: &StorePath) {
        let Inner {
            document, watchers, ..
        } = self;

        watchers.retain(|id, watcher| {
            if !watcher.path.overlaps(changed) {
                return true;
            }
            let value = document.get(&watcher.path);
            if value == watcher.last {
                return true;
            }
            watcher.last = value.clone();
            let delivered = watcher
                .sink
                .send(StoreNotification::Value {
                    path: watcher.path.clone(),
                    value,
                })
                .is_ok();
            if !delivered {
                debug!(watcher = id, path = %watcher.path, "Dropping closed watcher");
            }
            delivered
        });
    }
}

/// Shared in-memory document with the [`RemoteStore`] contract
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value at `path`
    pub fn snapshot(&self, path: &StorePath) -> Value {
        lock(&self.inner).document.get(path)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).watchers.len()
    }

    fn apply(&self, path: &StorePath, mutate: impl FnOnce(&mut Document)) {
        let mut inner = lock(&self.inner);
        mutate(&mut inner.document);
        inner.notify(path);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn subscribe(&self, path: &StorePath, sink: NotificationSink) -> Subscription {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;

        let value = inner.document.get(path);
        let _ = sink.send(StoreNotification::Value {
            path: path.clone(),
            value: value.clone(),
        });
        inner.watchers.insert(
            id,
            Watcher {
                path: path.clone(),
                sink,
                last: value,
            },
        );
        debug!(watcher = id, path = %path, "Subscribed");

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).watchers.remove(&id);
            }
        })
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        self.apply(path, |doc| doc.set(path, value));
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        self.apply(path, |doc| doc.remove(path));
        Ok(())
    }

    fn timestamp_now(&self) -> Value {
        Value::from(Timestamp::now().as_millis())
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }
}
