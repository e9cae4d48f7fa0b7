//! The public surface the UI calls: every mutation writes optimistically to
//! the cache and enqueues an operation, synchronously, before returning.

use crate::cache::{CacheError, CacheRepository};
use crate::events::{EventBus, SyncEvent};
use crate::http::{HttpClient, Method};
use crate::kv::KeyValueStore;
use crate::model::{CachedNote, Note, NoteId};
use crate::network::NetworkMonitor;
use crate::queue::{OperationQueue, OperationType, QueueError};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, FacadeError>;

/// Input for `create_note`: optional local file paths for an audio
/// recording or drawing captured alongside the note. Each present path
/// enqueues its own upload operation, in order, after the note's own
/// CREATE (§4.H: up to three ops per call).
#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    pub audio_path: Option<String>,
    pub drawing_path: Option<String>,
}

pub struct OfflineApi<K, H, N> {
    cache: Arc<CacheRepository<K>>,
    queue: Arc<OperationQueue<K>>,
    events: Arc<EventBus>,
    http: Arc<H>,
    network: Arc<N>,
}

impl<K: KeyValueStore, H: HttpClient, N: NetworkMonitor> OfflineApi<K, H, N> {
    pub fn new(
        cache: Arc<CacheRepository<K>>,
        queue: Arc<OperationQueue<K>>,
        events: Arc<EventBus>,
        http: Arc<H>,
        network: Arc<N>,
    ) -> Self {
        Self {
            cache,
            queue,
            events,
            http,
            network,
        }
    }

    /// Returns the cached notes. If currently online, first fetches the full
    /// listing from the server and applies the §4.B merge rule so the result
    /// reflects the latest server state; a failed fetch or decode falls back
    /// to the cache as it stood (§4.H: "when online it performs a fetch AND
    /// applies the merge rule before returning").
    pub async fn get_notes(&self) -> Vec<CachedNote> {
        if self.network.is_online() {
            match self.http.request_json(Method::Get, "/notes", None).await {
                Ok(resp) => match serde_json::from_value::<Vec<Note>>(resp) {
                    Ok(notes) => {
                        if let Err(e) = self.apply_server_listing(notes).await {
                            warn!("failed to merge fetched note listing: {e}");
                        }
                    }
                    Err(e) => warn!("failed to decode note listing: {e}"),
                },
                Err(e) => warn!("failed to fetch note listing: {e}"),
            }
        }
        self.cache.list()
    }

    pub async fn create_note(&self, input: NewNote, now: impl Into<String>) -> Result<NoteId> {
        let now = now.into();
        let id = NoteId::new_temp();
        let note = Note {
            id: id.clone(),
            title: input.title,
            content: input.content,
            color: input.color,
            created_at: now.clone(),
            updated_at: now,
            is_pinned: false,
            is_archived: false,
            is_deleted: false,
            checklist_items: vec![],
            labels: vec![],
            images: vec![],
            audio_recordings: vec![],
            drawings: vec![],
            reminder: None,
            audio_uri: input.audio_path.clone(),
            drawing_uri: input.drawing_path.clone(),
        };
        self.cache.upsert(CachedNote::new_local(note)).await?;

        self.queue
            .enqueue(
                OperationType::CreateNote { note_id: id.clone() },
                created_at_placeholder(),
            )
            .await?;
        if let Some(path) = input.audio_path {
            self.queue
                .enqueue(
                    OperationType::CreateAudio {
                        note_id: id.clone(),
                        local_path: path,
                    },
                    created_at_placeholder(),
                )
                .await?;
        }
        if let Some(path) = input.drawing_path {
            self.queue
                .enqueue(
                    OperationType::CreateDrawing {
                        note_id: id.clone(),
                        local_path: path,
                    },
                    created_at_placeholder(),
                )
                .await?;
        }

        self.trigger_sync_tick();
        Ok(id)
    }

    pub async fn update_note(
        &self,
        id: &NoteId,
        patch: impl FnOnce(&mut Note),
        created_at: impl Into<String>,
    ) -> Result<()> {
        self.cache
            .patch(id, |entry| {
                patch(&mut entry.data);
                entry.locally_modified = true;
            })
            .await?;
        self.queue
            .enqueue(
                OperationType::UpdateNote { note_id: id.clone() },
                created_at.into(),
            )
            .await?;
        self.trigger_sync_tick();
        Ok(())
    }

    /// Deletes a note. If the id never reached the server (`offline_*`),
    /// this is a local-only purge: every queued operation referencing it is
    /// dropped and no DELETE is ever enqueued (P7).
    pub async fn delete_note(&self, id: &NoteId, created_at: impl Into<String>) -> Result<()> {
        self.cache.remove(id).await?;

        if id.is_temp() {
            self.queue.remove_for_note(id).await?;
        } else {
            self.queue
                .enqueue(
                    OperationType::DeleteNote { note_id: id.clone() },
                    created_at.into(),
                )
                .await?;
        }
        self.trigger_sync_tick();
        Ok(())
    }

    /// Merges a freshly fetched server listing into the cache (§4.B).
    pub async fn apply_server_listing(&self, notes: Vec<Note>) -> Result<()> {
        self.cache.replace_all(notes).await?;
        Ok(())
    }

    fn trigger_sync_tick(&self) {
        self.events.emit(SyncEvent::SyncTick {
            successful: 0,
            failed: 0,
            remaining: self.queue.len(),
        });
    }
}

fn created_at_placeholder() -> String {
    // The queue only orders by insertion position, not by this timestamp;
    // callers that need a real wall-clock stamp pass one to the entity
    // fields themselves (see `create_note`'s `now` parameter).
    String::new()
}
