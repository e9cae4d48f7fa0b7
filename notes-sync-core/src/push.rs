//! Push subscriber: reconciles server-pushed change events into the cache,
//! independent of the sync driver's own drain.

use crate::cache::{CacheError, CacheRepository};
use crate::events::{EventBus, SyncEvent};
use crate::kv::KeyValueStore;
use crate::model::{CachedNote, Note, NoteId};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    #[serde(rename = "note.created")]
    NoteCreated { note: Note },
    #[serde(rename = "note.updated")]
    NoteUpdated { note: Note },
    #[serde(rename = "note.deleted")]
    NoteDeleted { note_id: NoteId },
}

/// Subscribes to the per-user private channel. Implementations:
/// - `WebSocketPushTransport` (in notes-sync-daemon) - `tokio-tungstenite`
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, user_id: &str, token: &str) -> Result<()>;
    async fn next_event(&self) -> Result<Option<PushEvent>>;
    async fn close(&self) -> Result<()>;
}

/// Applies one push event to the cache, following §4.G's reconciliation
/// rules exactly: creation is a no-op if we already have the id (our own
/// echo), update always wins locally (a queued local UPDATE will overwrite
/// on the next drain regardless), delete is unconditional. Publishes a UI
/// refresh tick on the bus for every event actually applied.
pub async fn apply_push_event<K: KeyValueStore>(
    cache: &CacheRepository<K>,
    events: &EventBus,
    event: PushEvent,
) -> Result<bool> {
    match event {
        PushEvent::NoteCreated { note } => {
            if cache.get_by_id(&note.id).is_some() {
                Ok(false)
            } else {
                let note_id = note.id.to_string();
                cache
                    .upsert(CachedNote::from_server(note, ""))
                    .await?;
                events.emit(SyncEvent::PushNoteCreated { note_id });
                Ok(true)
            }
        }
        PushEvent::NoteUpdated { note } => {
            let id = note.id.clone();
            if cache.get_by_id(&id).is_some() {
                cache
                    .patch(&id, |entry| {
                        entry.data = note;
                        entry.locally_modified = false;
                    })
                    .await?;
            } else {
                cache.upsert(CachedNote::from_server(note, "")).await?;
            }
            events.emit(SyncEvent::PushNoteUpdated {
                note_id: id.to_string(),
            });
            Ok(true)
        }
        PushEvent::NoteDeleted { note_id } => {
            cache.remove(&note_id).await?;
            events.emit(SyncEvent::PushNoteDeleted {
                note_id: note_id.to_string(),
            });
            Ok(true)
        }
    }
}
