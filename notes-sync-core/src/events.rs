//! Internal event bus: named topics, no component holds a direct reference
//! to another. Solves the "Auth <-> HTTP <-> Network <-> Push" mutual
//! reference problem by letting every component subscribe and publish
//! through one shared bus instead of wiring pointers between each other.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The stored auth token was cleared or replaced (login, logout, or a
    /// 401 from the HTTP facade).
    AuthChanged { authenticated: bool },
    /// The network monitor observed a connectivity transition.
    NetOnline { online: bool },
    /// A drain just finished; counters for the UI's "syncing N changes"
    /// banner.
    SyncTick {
        successful: usize,
        failed: usize,
        remaining: usize,
    },
    PushNoteCreated { note_id: String },
    PushNoteUpdated { note_id: String },
    PushNoteDeleted { note_id: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Thread-safe publish/subscribe bus for `SyncEvent`. Wrap in `Arc` to
/// enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(SyncEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a `Subscription` that unsubscribes on
    /// drop. Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write avoids deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g. during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: SyncEvent) {
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
