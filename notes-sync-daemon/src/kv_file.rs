//! On-disk durable key/value store: one file per slot under a base
//! directory, the same "read whole file or default, write whole file"
//! shape as the sibling sync engine's peer-persistence store.

use async_trait::async_trait;
use notes_sync_core::{KeyValueStore, KvError};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;

pub struct FileKvStore {
    base_dir: PathBuf,
    // Caches the last write per slot so reads inside the same process see
    // their own writes without re-parsing the file from disk.
    cache: RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

impl FileKvStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.base_dir.join(format!("{slot}.json"))
    }

    async fn ensure_dir(&self) -> Result<(), KvError> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| KvError::Io {
                slot: "<base_dir>".into(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, slot: &str) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(bytes) = self.cache.read().unwrap().get(slot) {
            return Ok(Some(bytes.clone()));
        }

        let path = self.slot_path(slot);
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        match fs::read(&path).await {
            Ok(bytes) => {
                self.cache
                    .write()
                    .unwrap()
                    .insert(slot.to_string(), bytes.clone());
                Ok(Some(bytes))
            }
            Err(_) => Ok(None),
        }
    }

    async fn set(&self, slot: &str, value: Vec<u8>) -> Result<(), KvError> {
        self.ensure_dir().await?;
        let path = self.slot_path(slot);
        fs::write(&path, &value).await.map_err(|e| KvError::Io {
            slot: slot.to_string(),
            message: e.to_string(),
        })?;
        self.cache.write().unwrap().insert(slot.to_string(), value);
        Ok(())
    }

    async fn delete(&self, slot: &str) -> Result<(), KvError> {
        self.cache.write().unwrap().remove(slot);
        let path = self.slot_path(slot);
        if Path::new(&path).exists() {
            fs::remove_file(&path).await.map_err(|e| KvError::Io {
                slot: slot.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}
