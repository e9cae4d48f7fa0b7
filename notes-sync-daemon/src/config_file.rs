//! Loads a `SyncConfig` from a TOML file on disk.

use notes_sync_core::SyncConfig;
use std::path::Path;

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<SyncConfig> {
    let raw = std::fs::read_to_string(path.as_ref())
        .map_err(|e| anyhow::anyhow!("reading config at {:?}: {e}", path.as_ref()))?;
    let config: SyncConfig = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing config at {:?}: {e}", path.as_ref()))?;
    Ok(config)
}
