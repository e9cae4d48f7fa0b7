//! Durable key/value storage abstraction.
//!
//! One named slot per concern (`notes_cache`, `sync_queue`, `last_sync`, ...).
//! Implementations:
//! - `MemoryKvStore` - for testing
//! - `FileKvStore` (in notes-sync-daemon) - one JSON file per slot on disk

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

pub const SLOT_NOTES_CACHE: &str = "notes_cache";
pub const SLOT_SYNC_QUEUE: &str = "sync_queue";
pub const SLOT_LAST_SYNC: &str = "last_sync";
pub const SLOT_PENDING_COUNT: &str = "pending_count";
pub const SLOT_THEME: &str = "theme_preference";

/// Auth secrets live in a slot distinct from general settings so the façade
/// and driver can't reach them through the general-purpose `get`/`set` path.
pub const SECURE_SLOT_AUTH_TOKEN: &str = "auth_token";
pub const SECURE_SLOT_USER_DATA: &str = "user_data";

#[derive(Debug, Error)]
pub enum KvError {
    #[error("io error on slot {slot}: {message}")]
    Io { slot: String, message: String },
}

pub type Result<T> = std::result::Result<T, KvError>;

/// A typed wrapper over a string-keyed persistent store.
///
/// Writes replace the whole slot; reads return the last successful write, or
/// `None` if the slot has never been written (or the backing store lost it —
/// a failed read is treated the same as an empty slot, never surfaced as an
/// error, since every drain starts fresh from the cache/queue it finds).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, slot: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, slot: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, slot: &str) -> Result<()>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn get(&self, slot: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(slot).await
    }

    async fn set(&self, slot: &str, value: Vec<u8>) -> Result<()> {
        (**self).set(slot, value).await
    }

    async fn delete(&self, slot: &str) -> Result<()> {
        (**self).delete(slot).await
    }
}

/// In-memory key/value store for tests.
#[derive(Default)]
pub struct MemoryKvStore {
    slots: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, slot: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.slots.read().unwrap().get(slot).cloned())
    }

    async fn set(&self, slot: &str, value: Vec<u8>) -> Result<()> {
        self.slots.write().unwrap().insert(slot.to_string(), value);
        Ok(())
    }

    async fn delete(&self, slot: &str) -> Result<()> {
        self.slots.write().unwrap().remove(slot);
        Ok(())
    }
}

/// Reads and writes a slot as JSON, treating a missing or unparseable slot
/// as the type's default rather than an error.
pub async fn get_json<T, K>(kv: &K, slot: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
    K: KeyValueStore + ?Sized,
{
    match kv.get(slot).await {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_default(),
        _ => T::default(),
    }
}

pub async fn set_json<T, K>(kv: &K, slot: &str, value: &T) -> Result<()>
where
    T: serde::Serialize,
    K: KeyValueStore + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|e| KvError::Io {
        slot: slot.to_string(),
        message: e.to_string(),
    })?;
    kv.set(slot, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_slot_reads_as_none() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = MemoryKvStore::new();
        kv.set("theme_preference", b"dark".to_vec()).await.unwrap();
        assert_eq!(
            kv.get("theme_preference").await.unwrap(),
            Some(b"dark".to_vec())
        );
    }

    #[tokio::test]
    async fn get_json_defaults_on_missing_slot() {
        let kv = MemoryKvStore::new();
        let value: Vec<i32> = get_json(&kv, "nope").await;
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn set_json_then_get_json_round_trips() {
        let kv = MemoryKvStore::new();
        set_json(&kv, "pending_count", &3i64).await.unwrap();
        let value: i64 = get_json(&kv, "pending_count").await;
        assert_eq!(value, 3);
    }
}
