//! The sync driver: drains the operation queue against the server,
//! obeying dependency ordering, the retry cap, and per-error-class
//! disposal, then reconciles responses back into the cache.

use crate::cache::CacheRepository;
use crate::config::SyncConfig;
use crate::events::{EventBus, SyncEvent};
use crate::http::{HttpClient, HttpError, Method, MultipartFile};
use crate::kv::KeyValueStore;
use crate::kv::SLOT_LAST_SYNC;
use crate::model::{CachedNote, Note, NoteId};
use crate::queue::{OperationQueue, OperationType, QueuedOperation};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),
    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub successful: usize,
    pub failed: usize,
    pub remaining: usize,
}

enum Classification {
    Dropped,
    Retry,
}

fn classify(err: &HttpError) -> Classification {
    match err {
        HttpError::Http { status: 404, .. } => Classification::Dropped,
        _ => Classification::Retry,
    }
}

pub struct SyncDriver<K, H> {
    cache: Arc<CacheRepository<K>>,
    queue: Arc<OperationQueue<K>>,
    http: Arc<H>,
    events: Arc<EventBus>,
    kv: Arc<K>,
    config: SyncConfig,
    is_syncing: AtomicBool,
}

impl<K: KeyValueStore, H: HttpClient> SyncDriver<K, H> {
    pub fn new(
        cache: Arc<CacheRepository<K>>,
        queue: Arc<OperationQueue<K>>,
        http: Arc<H>,
        events: Arc<EventBus>,
        kv: Arc<K>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            queue,
            http,
            events,
            kv,
            config,
            is_syncing: AtomicBool::new(false),
        }
    }

    /// Drains the queue. Idempotent re-entry: a call while a drain is
    /// already running returns immediately with zero counters.
    pub async fn drain(&self) -> Result<DrainReport> {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain() called while already syncing, skipping");
            return Ok(DrainReport::default());
        }
        let result = Box::pin(self.drain_inner()).await;
        self.is_syncing.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_inner(&self) -> Result<DrainReport> {
        let snapshot = self.queue.snapshot();
        if snapshot.is_empty() {
            return Ok(DrainReport::default());
        }

        let pending_creates: HashSet<NoteId> = snapshot
            .iter()
            .filter_map(|q| match &q.op {
                OperationType::CreateNote { note_id } => Some(note_id.clone()),
                _ => None,
            })
            .collect();

        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut remaining = 0usize;
        let mut failed_creates: HashSet<NoteId> = HashSet::new();

        for queued in snapshot {
            let target = queued.op.note_id().clone();

            if target.is_temp() && !pending_creates.contains(&target) {
                warn!(op_id = queued.id, "dropping orphaned dependent operation");
                self.queue.remove(queued.id).await?;
                failed += 1;
                continue;
            }

            if failed_creates.contains(&target) {
                remaining += 1;
                continue;
            }

            if queued.retry_count >= self.config.max_retries {
                warn!(op_id = queued.id, "retry cap exceeded, dropping operation");
                self.queue.remove(queued.id).await?;
                failed += 1;
                continue;
            }

            let is_create_note = matches!(queued.op, OperationType::CreateNote { .. });

            match self.dispatch(&queued).await {
                Ok(()) => {
                    self.queue.remove(queued.id).await?;
                    successful += 1;

                    if is_create_note {
                        // Queue was rewritten by dispatch(); restart the
                        // drain so dependents observe the server id.
                        let nested = Box::pin(self.drain_inner()).await?;
                        return Ok(DrainReport {
                            successful: successful + nested.successful,
                            failed: failed + nested.failed,
                            remaining: nested.remaining,
                        });
                    }
                }
                Err(err) => match classify(&err) {
                    Classification::Dropped => {
                        info!(op_id = queued.id, %err, "dropping operation (not found)");
                        self.queue.remove(queued.id).await?;
                        failed += 1;
                    }
                    Classification::Retry => {
                        warn!(op_id = queued.id, %err, "operation failed, will retry");
                        self.queue.bump_retry(queued.id, err.to_string()).await?;
                        remaining += 1;
                        if is_create_note {
                            failed_creates.insert(target);
                        }
                    }
                },
            }
        }

        if successful > 0 {
            crate::kv::set_json(&*self.kv, SLOT_LAST_SYNC, &now_iso()).await.ok();
        }

        self.events.emit(SyncEvent::SyncTick {
            successful,
            failed,
            remaining,
        });

        Ok(DrainReport {
            successful,
            failed,
            remaining,
        })
    }

    async fn dispatch(&self, queued: &QueuedOperation) -> std::result::Result<(), HttpError> {
        match &queued.op {
            OperationType::CreateNote { note_id } => {
                let cached = self.cache.get_by_id(note_id).ok_or_else(|| {
                    HttpError::Setup(format!("no cached note for {note_id}"))
                })?;
                let body = serde_json::to_value(&cached.data)
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                let resp = self
                    .http
                    .request_json(Method::Post, "/notes", Some(body))
                    .await?;
                let server_note: Note = serde_json::from_value(resp)
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                let server_id = server_note.id.clone();

                self.cache
                    .promote_temp_to_server(note_id, server_note, now_iso())
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                self.queue
                    .rewrite_note_id(note_id, &server_id)
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::UpdateNote { note_id } => {
                let cached = self.cache.get_by_id(note_id).ok_or_else(|| {
                    HttpError::Setup(format!("no cached note for {note_id}"))
                })?;
                let body = serde_json::to_value(&cached.data)
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                self.http
                    .request_json(Method::Put, &format!("/notes/{note_id}"), Some(body))
                    .await?;
                self.cache
                    .patch(note_id, |entry| {
                        entry.locally_modified = false;
                        entry.last_synced_at = Some(now_iso());
                    })
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::DeleteNote { note_id } => {
                self.http
                    .request_json(Method::Delete, &format!("/notes/{note_id}"), None)
                    .await?;
                self.cache
                    .remove(note_id)
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::UploadImage { note_id, local_path } => {
                let bytes = std::fs::read(local_path)
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                self.http
                    .request_multipart(
                        &format!("/notes/{note_id}/images"),
                        MultipartFile {
                            field_name: "image".into(),
                            file_name: local_path.clone(),
                            bytes,
                        },
                    )
                    .await?;
                Ok(())
            }
            OperationType::DeleteImage { note_id, image_id } => {
                self.http
                    .request_json(
                        Method::Delete,
                        &format!("/notes/images/{image_id}"),
                        None,
                    )
                    .await?;
                self.cache
                    .patch(note_id, |entry| {
                        entry.data.images.retain(|i| &i.id != image_id);
                    })
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::CreateReminder { note_id, remind_at } => {
                self.http
                    .request_json(
                        Method::Post,
                        &format!("/notes/{note_id}/reminders"),
                        Some(json!({ "remind_at": remind_at })),
                    )
                    .await?;
                Ok(())
            }
            OperationType::DeleteReminder { note_id, reminder_id } => {
                self.http
                    .request_json(Method::Delete, &format!("/reminders/{reminder_id}"), None)
                    .await?;
                self.cache
                    .patch(note_id, |entry| entry.data.reminder = None)
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::AttachLabel { note_id, label_id } => {
                self.http
                    .request_json(
                        Method::Post,
                        &format!("/notes/{note_id}/labels"),
                        Some(json!({ "label_id": label_id })),
                    )
                    .await?;
                Ok(())
            }
            OperationType::DetachLabel { note_id, label_id } => {
                self.http
                    .request_json(
                        Method::Delete,
                        &format!("/notes/{note_id}/labels/{label_id}"),
                        None,
                    )
                    .await?;
                self.cache
                    .patch(note_id, |entry| {
                        entry.data.labels.retain(|l| l.id != *label_id);
                    })
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::CreateChecklist { note_id, text } => {
                self.http
                    .request_json(
                        Method::Post,
                        &format!("/notes/{note_id}/checklist"),
                        Some(json!({ "text": text, "is_completed": false })),
                    )
                    .await?;
                Ok(())
            }
            OperationType::UpdateChecklist {
                note_id,
                item_id,
                text,
                is_completed,
            } => {
                self.http
                    .request_json(
                        Method::Put,
                        &format!("/checklist/{item_id}"),
                        Some(json!({ "text": text, "is_completed": is_completed })),
                    )
                    .await?;
                let _ = note_id;
                Ok(())
            }
            OperationType::DeleteChecklist { note_id, item_id } => {
                self.http
                    .request_json(Method::Delete, &format!("/checklist/{item_id}"), None)
                    .await?;
                self.cache
                    .patch(note_id, |entry| {
                        entry.data.checklist_items.retain(|c| &c.id != item_id);
                    })
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::CreateAudio { note_id, local_path } => {
                let bytes = std::fs::read(local_path)
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                self.http
                    .request_multipart(
                        &format!("/notes/{note_id}/audio"),
                        MultipartFile {
                            field_name: "audio".into(),
                            file_name: local_path.clone(),
                            bytes,
                        },
                    )
                    .await?;
                Ok(())
            }
            OperationType::DeleteAudio { note_id, audio_id } => {
                self.http
                    .request_json(Method::Delete, &format!("/notes/audio/{audio_id}"), None)
                    .await?;
                self.cache
                    .patch(note_id, |entry| {
                        entry.data.audio_recordings.retain(|a| &a.id != audio_id);
                    })
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
            OperationType::CreateDrawing { note_id, local_path } => {
                let bytes = std::fs::read(local_path)
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                self.http
                    .request_multipart(
                        &format!("/notes/{note_id}/drawings"),
                        MultipartFile {
                            field_name: "drawing".into(),
                            file_name: local_path.clone(),
                            bytes,
                        },
                    )
                    .await?;
                Ok(())
            }
            OperationType::DeleteDrawing { note_id, drawing_id } => {
                self.http
                    .request_json(Method::Delete, &format!("/notes/drawings/{drawing_id}"), None)
                    .await?;
                self.cache
                    .patch(note_id, |entry| {
                        entry.data.drawings.retain(|d| &d.id != drawing_id);
                    })
                    .await
                    .map_err(|e| HttpError::Setup(e.to_string()))?;
                Ok(())
            }
        }
    }
}

fn now_iso() -> String {
    let now = web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FakeHttpClient;
    use crate::kv::MemoryKvStore;
    use serde_json::json;

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

    async fn new_driver() -> (
        Arc<CacheRepository<Arc<MemoryKvStore>>>,
        Arc<OperationQueue<Arc<MemoryKvStore>>>,
        Arc<FakeHttpClient>,
        SyncDriver<Arc<MemoryKvStore>, FakeHttpClient>,
    ) {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = Arc::new(CacheRepository::load(kv.clone()).await.unwrap());
        let queue = Arc::new(OperationQueue::load(kv.clone()).await.unwrap());
        let http = Arc::new(FakeHttpClient::new());
        let events = Arc::new(EventBus::new());
        let config = SyncConfig {
            base_url: "https://api.example.com".into(),
            push_host: "push.example.com".into(),
            push_port: 443,
            push_key: "key".into(),
            push_tls: true,
            timeout_ms: 1000,
            max_retries: 3,
            retry_delays_ms: vec![1000, 3000, 10000],
        };
        let driver = SyncDriver::new(
            cache.clone(),
            queue.clone(),
            http.clone(),
            events,
            kv,
            config,
        );
        (cache, queue, http, driver)
    }

    #[tokio::test]
    async fn p1_replay_idempotence_on_single_create() {
        let (cache, queue, http, driver) = new_driver().await;
        let temp_id = NoteId::Temp("offline_1".into());
        cache
            .upsert(CachedNote::new_local(note(temp_id.clone(), "Shopping")))
            .await
            .unwrap();
        queue
            .enqueue(
                OperationType::CreateNote {
                    note_id: temp_id.clone(),
                },
                "t1",
            )
            .await
            .unwrap();

        http.script(
            Method::Post,
            "/notes",
            Ok(json!({
                "id": 10,
                "title": "Shopping",
                "content": "",
                "color": null,
                "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-01-01T00:00:00Z",
                "isPinned": false,
                "isArchived": false,
                "isDeleted": false
            })),
        );

        let report = driver.drain().await.unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.remaining, 0);
        assert!(queue.is_empty());
        assert!(cache.get_by_id(&NoteId::Server(10)).is_some());
        assert!(cache.get_by_id(&temp_id).is_none());
    }

    #[tokio::test]
    async fn p2_orphan_containment_drops_without_http_call() {
        let (_cache, queue, http, driver) = new_driver().await;
        let temp_id = NoteId::Temp("offline_orphan".into());
        queue
            .enqueue(
                OperationType::UploadImage {
                    note_id: temp_id,
                    local_path: "/tmp/x.png".into(),
                },
                "t1",
            )
            .await
            .unwrap();

        let report = driver.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.successful, 0);
        assert!(http.calls().is_empty());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn p3_id_rewrite_completeness_after_create() {
        let (cache, queue, http, driver) = new_driver().await;
        let temp_id = NoteId::Temp("offline_2".into());
        cache
            .upsert(CachedNote::new_local(note(temp_id.clone(), "Note")))
            .await
            .unwrap();

        // The image upload handler reads its payload from disk.
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"fake png").unwrap();

        queue
            .enqueue(
                OperationType::CreateNote {
                    note_id: temp_id.clone(),
                },
                "t1",
            )
            .await
            .unwrap();
        queue
            .enqueue(
                OperationType::UploadImage {
                    note_id: temp_id.clone(),
                    local_path: tmp.path().to_string_lossy().to_string(),
                },
                "t2",
            )
            .await
            .unwrap();

        http.script(
            Method::Post,
            "/notes",
            Ok(json!({
                "id": 77,
                "title": "Note",
                "content": "",
                "color": null,
                "createdAt": "2026-01-01T00:00:00Z",
                "updatedAt": "2026-01-01T00:00:00Z",
                "isPinned": false,
                "isArchived": false,
                "isDeleted": false
            })),
        );
        http.script(
            Method::Post,
            "/notes/77/images",
            Ok(json!({"id": 1, "url": "http://x/1.png"})),
        );

        let report = driver.drain().await.unwrap();
        assert_eq!(report.successful, 2);
        assert!(queue.is_empty());
        for q in queue.snapshot() {
            assert_ne!(q.op.note_id(), &temp_id);
        }
    }

    #[tokio::test]
    async fn p5_retry_cap_drops_after_max_retries() {
        let (_cache, queue, http, driver) = new_driver().await;
        let id = NoteId::Server(5);
        queue
            .enqueue(OperationType::UpdateNote { note_id: id.clone() }, "t1")
            .await
            .unwrap();
        http.script(
            Method::Put,
            "/notes/5",
            Err(HttpError::Http {
                status: 500,
                body: "boom".into(),
            }),
        );

        for _ in 0..4 {
            driver.drain().await.unwrap();
        }

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn p6_404_disposal_removes_only_that_operation() {
        let (cache, queue, http, driver) = new_driver().await;
        cache
            .upsert(CachedNote::from_server(note(NoteId::Server(1), "A"), "t0"))
            .await
            .unwrap();
        cache
            .upsert(CachedNote::from_server(note(NoteId::Server(2), "B"), "t0"))
            .await
            .unwrap();
        queue
            .enqueue(OperationType::UpdateNote { note_id: NoteId::Server(1) }, "t1")
            .await
            .unwrap();
        queue
            .enqueue(OperationType::UpdateNote { note_id: NoteId::Server(2) }, "t2")
            .await
            .unwrap();

        http.script(
            Method::Put,
            "/notes/1",
            Err(HttpError::Http {
                status: 404,
                body: "gone".into(),
            }),
        );
        http.script(Method::Put, "/notes/2", Ok(json!({})));

        let report = driver.drain().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.successful, 1);
        assert!(queue.is_empty());
    }
}
