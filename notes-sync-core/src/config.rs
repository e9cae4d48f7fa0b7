//! Sync engine configuration, matching §6's recognized option set exactly.

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 3] = [1000, 3000, 10000];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub base_url: String,
    pub push_host: String,
    pub push_port: u16,
    pub push_key: String,
    #[serde(default = "default_true")]
    pub push_tls: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delays_ms() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS_MS.to_vec()
}

impl SyncConfig {
    pub fn retry_delay_for(&self, retry_count: u32) -> Option<u64> {
        self.retry_delays_ms.get(retry_count as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_documented_defaults_when_omitted() {
        let json = r#"{
            "baseUrl": "https://api.example.com",
            "pushHost": "push.example.com",
            "pushPort": 443,
            "pushKey": "key123"
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_delays_ms, DEFAULT_RETRY_DELAYS_MS.to_vec());
        assert!(config.push_tls);
    }
}
