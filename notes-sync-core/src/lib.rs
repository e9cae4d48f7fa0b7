//! notes-sync-core: the offline-first synchronization engine for a notes
//! application.
//!
//! Provides the platform-agnostic core of the system: a durable cache of
//! notes, an ordered operation queue, a sync driver that drains the queue
//! against an HTTP backend, a push-event reconciler, and the façade the UI
//! calls. Concrete I/O (a real HTTP client, a real push transport, on-disk
//! persistence) is supplied by a host crate such as `notes-sync-daemon`.

pub mod cache;
pub mod config;
pub mod driver;
pub mod events;
pub mod facade;
pub mod http;
pub mod kv;
pub mod model;
pub mod network;
pub mod push;
pub mod queue;

pub use cache::{CacheError, CacheRepository};
pub use config::SyncConfig;
pub use driver::{DrainReport, DriverError, SyncDriver};
pub use events::{EventBus, Subscription, SyncEvent};
pub use facade::{FacadeError, NewNote, OfflineApi};
pub use http::{HttpClient, HttpError, Method, MultipartFile};
pub use kv::{
    KeyValueStore, KvError, MemoryKvStore, SECURE_SLOT_AUTH_TOKEN, SECURE_SLOT_USER_DATA,
};
pub use model::{
    AudioRecording, CachedNote, ChecklistItem, Drawing, Image, LabelRef, Note, NoteId, Reminder,
};
pub use network::NetworkMonitor;
pub use push::{apply_push_event, PushError, PushEvent, PushTransport};
pub use queue::{OperationQueue, OperationType, QueueError, QueuedOperation, ResourceType};
