//! The append-only, order-preserving log of pending mutations.

use crate::kv::{self, KeyValueStore, SLOT_SYNC_QUEUE};
use crate::model::NoteId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("kv error: {0}")]
    Kv(#[from] kv::KvError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceType {
    Note,
    Image,
    Audio,
    Drawing,
    Checklist,
    Reminder,
    Label,
}

/// One queued mutation. `#[serde(tag = "type")]` gives each variant its own
/// payload shape, following the tagged-variant guidance: adding a sixteenth
/// operation type is a compile error everywhere a `match` isn't exhaustive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationType {
    CreateNote { note_id: NoteId },
    UpdateNote { note_id: NoteId },
    DeleteNote { note_id: NoteId },
    UploadImage { note_id: NoteId, local_path: String },
    DeleteImage { note_id: NoteId, image_id: String },
    CreateReminder { note_id: NoteId, remind_at: String },
    DeleteReminder { note_id: NoteId, reminder_id: String },
    AttachLabel { note_id: NoteId, label_id: i64 },
    DetachLabel { note_id: NoteId, label_id: i64 },
    CreateChecklist { note_id: NoteId, text: String },
    UpdateChecklist { note_id: NoteId, item_id: String, text: String, is_completed: bool },
    DeleteChecklist { note_id: NoteId, item_id: String },
    CreateAudio { note_id: NoteId, local_path: String },
    DeleteAudio { note_id: NoteId, audio_id: String },
    CreateDrawing { note_id: NoteId, local_path: String },
    DeleteDrawing { note_id: NoteId, drawing_id: String },
}

impl OperationType {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            OperationType::CreateNote { .. }
            | OperationType::UpdateNote { .. }
            | OperationType::DeleteNote { .. } => ResourceType::Note,
            OperationType::UploadImage { .. } | OperationType::DeleteImage { .. } => {
                ResourceType::Image
            }
            OperationType::CreateReminder { .. } | OperationType::DeleteReminder { .. } => {
                ResourceType::Reminder
            }
            OperationType::AttachLabel { .. } | OperationType::DetachLabel { .. } => {
                ResourceType::Label
            }
            OperationType::CreateChecklist { .. }
            | OperationType::UpdateChecklist { .. }
            | OperationType::DeleteChecklist { .. } => ResourceType::Checklist,
            OperationType::CreateAudio { .. } | OperationType::DeleteAudio { .. } => {
                ResourceType::Audio
            }
            OperationType::CreateDrawing { .. } | OperationType::DeleteDrawing { .. } => {
                ResourceType::Drawing
            }
        }
    }

    /// The note this operation targets, resolved from `resourceId` when the
    /// resource type is a note, otherwise from `payload.noteId`.
    pub fn note_id(&self) -> &NoteId {
        match self {
            OperationType::CreateNote { note_id }
            | OperationType::UpdateNote { note_id }
            | OperationType::DeleteNote { note_id }
            | OperationType::UploadImage { note_id, .. }
            | OperationType::DeleteImage { note_id, .. }
            | OperationType::CreateReminder { note_id, .. }
            | OperationType::DeleteReminder { note_id, .. }
            | OperationType::AttachLabel { note_id, .. }
            | OperationType::DetachLabel { note_id, .. }
            | OperationType::CreateChecklist { note_id, .. }
            | OperationType::UpdateChecklist { note_id, .. }
            | OperationType::DeleteChecklist { note_id, .. }
            | OperationType::CreateAudio { note_id, .. }
            | OperationType::DeleteAudio { note_id, .. }
            | OperationType::CreateDrawing { note_id, .. }
            | OperationType::DeleteDrawing { note_id, .. } => note_id,
        }
    }

    fn rewrite_note_id(&mut self, from: &NoteId, to: &NoteId) -> bool {
        let slot = match self {
            OperationType::CreateNote { note_id }
            | OperationType::UpdateNote { note_id }
            | OperationType::DeleteNote { note_id }
            | OperationType::UploadImage { note_id, .. }
            | OperationType::DeleteImage { note_id, .. }
            | OperationType::CreateReminder { note_id, .. }
            | OperationType::DeleteReminder { note_id, .. }
            | OperationType::AttachLabel { note_id, .. }
            | OperationType::DetachLabel { note_id, .. }
            | OperationType::CreateChecklist { note_id, .. }
            | OperationType::UpdateChecklist { note_id, .. }
            | OperationType::DeleteChecklist { note_id, .. }
            | OperationType::CreateAudio { note_id, .. }
            | OperationType::DeleteAudio { note_id, .. }
            | OperationType::CreateDrawing { note_id, .. }
            | OperationType::DeleteDrawing { note_id, .. } => note_id,
        };
        if slot == from {
            *slot = to.clone();
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: u64,
    pub op: OperationType,
    pub created_at: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// The append-only operation queue. Holds its snapshot in memory, guarded by
/// a single `RwLock`, the same "mutate in memory then flush once" shape the
/// durable KV's JSON-backed slots all share.
pub struct OperationQueue<K> {
    kv: K,
    ops: RwLock<Vec<QueuedOperation>>,
    next_id: AtomicU64,
}

impl<K: KeyValueStore> OperationQueue<K> {
    pub async fn load(kv: K) -> Result<Self> {
        let ops: Vec<QueuedOperation> = kv::get_json(&kv, SLOT_SYNC_QUEUE).await;
        let next_id = ops.iter().map(|o| o.id).max().map(|n| n + 1).unwrap_or(0);
        Ok(Self {
            kv,
            ops: RwLock::new(ops),
            next_id: AtomicU64::new(next_id),
        })
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.ops.read().unwrap().clone();
        kv::set_json(&self.kv, SLOT_SYNC_QUEUE, &snapshot).await?;
        Ok(())
    }

    /// Snapshot of the queue in insertion order.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.ops.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.ops.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn enqueue(&self, op: OperationType, created_at: impl Into<String>) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queued = QueuedOperation {
            id,
            op,
            created_at: created_at.into(),
            retry_count: 0,
            error: None,
        };
        self.ops.write().unwrap().push(queued);
        self.persist().await?;
        Ok(id)
    }

    pub async fn remove(&self, id: u64) -> Result<()> {
        self.ops.write().unwrap().retain(|o| o.id != id);
        self.persist().await
    }

    pub async fn bump_retry(&self, id: u64, error: impl Into<String>) -> Result<()> {
        if let Some(op) = self.ops.write().unwrap().iter_mut().find(|o| o.id == id) {
            op.retry_count += 1;
            op.error = Some(error.into());
        }
        self.persist().await
    }

    /// Rewrites every operation that references `from` (as its target note
    /// id) to reference `to` instead, in one persistence round-trip.
    pub async fn rewrite_note_id(&self, from: &NoteId, to: &NoteId) -> Result<usize> {
        let mut count = 0;
        {
            let mut ops = self.ops.write().unwrap();
            for queued in ops.iter_mut() {
                if queued.op.rewrite_note_id(from, to) {
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.persist().await?;
        }
        Ok(count)
    }

    /// Removes every operation that targets `note_id`, used by the
    /// local-only delete short-circuit (never enqueues a DELETE for a note
    /// that never reached the server).
    pub async fn remove_for_note(&self, note_id: &NoteId) -> Result<usize> {
        let mut count = 0;
        {
            let mut ops = self.ops.write().unwrap();
            let before = ops.len();
            ops.retain(|o| o.op.note_id() != note_id);
            count = before - ops.len();
        }
        if count > 0 {
            self.persist().await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn note_op(id: NoteId) -> OperationType {
        OperationType::UpdateNote { note_id: id }
    }

    #[tokio::test]
    async fn enqueue_preserves_insertion_order() {
        let queue = OperationQueue::load(MemoryKvStore::new()).await.unwrap();
        queue
            .enqueue(note_op(NoteId::Server(1)), "t1")
            .await
            .unwrap();
        queue
            .enqueue(note_op(NoteId::Server(2)), "t2")
            .await
            .unwrap();
        let snap = queue.snapshot();
        assert_eq!(snap[0].op.note_id(), &NoteId::Server(1));
        assert_eq!(snap[1].op.note_id(), &NoteId::Server(2));
    }

    #[tokio::test]
    async fn rewrite_updates_every_matching_operation() {
        let queue = OperationQueue::load(MemoryKvStore::new()).await.unwrap();
        let temp = NoteId::Temp("offline_abc".into());
        queue
            .enqueue(
                OperationType::CreateNote {
                    note_id: temp.clone(),
                },
                "t1",
            )
            .await
            .unwrap();
        queue
            .enqueue(
                OperationType::UploadImage {
                    note_id: temp.clone(),
                    local_path: "/tmp/a.png".into(),
                },
                "t2",
            )
            .await
            .unwrap();

        let rewritten = queue
            .rewrite_note_id(&temp, &NoteId::Server(42))
            .await
            .unwrap();
        assert_eq!(rewritten, 2);

        for queued in queue.snapshot() {
            assert_eq!(queued.op.note_id(), &NoteId::Server(42));
        }
    }

    #[tokio::test]
    async fn remove_for_note_drops_every_matching_operation() {
        let queue = OperationQueue::load(MemoryKvStore::new()).await.unwrap();
        let temp = NoteId::Temp("offline_xyz".into());
        queue
            .enqueue(
                OperationType::CreateNote {
                    note_id: temp.clone(),
                },
                "t1",
            )
            .await
            .unwrap();
        queue
            .enqueue(
                OperationType::UploadImage {
                    note_id: temp.clone(),
                    local_path: "/tmp/a.png".into(),
                },
                "t2",
            )
            .await
            .unwrap();
        queue
            .enqueue(note_op(NoteId::Server(99)), "t3")
            .await
            .unwrap();

        let removed = queue.remove_for_note(&temp).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn bump_retry_increments_and_records_error() {
        let queue = OperationQueue::load(MemoryKvStore::new()).await.unwrap();
        let id = queue
            .enqueue(note_op(NoteId::Server(1)), "t1")
            .await
            .unwrap();
        queue.bump_retry(id, "network down").await.unwrap();
        let snap = queue.snapshot();
        assert_eq!(snap[0].retry_count, 1);
        assert_eq!(snap[0].error.as_deref(), Some("network down"));
    }

    #[tokio::test]
    async fn reload_resumes_id_counter_above_existing_max() {
        let kv = std::sync::Arc::new(MemoryKvStore::new());

        let first_id = {
            let queue = OperationQueue::load(kv.clone()).await.unwrap();
            queue
                .enqueue(note_op(NoteId::Server(1)), "t1")
                .await
                .unwrap()
        };

        let queue = OperationQueue::load(kv).await.unwrap();
        let second_id = queue
            .enqueue(note_op(NoteId::Server(2)), "t2")
            .await
            .unwrap();
        assert!(second_id > first_id);
    }
}
