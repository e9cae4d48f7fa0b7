//! notes-sync-daemon library: native implementations of the notes-sync-core
//! traits (on-disk KV store, `reqwest` HTTP client, `tokio-tungstenite` push
//! transport, polling network monitor), exposed for the `notes-cli` binary
//! and for integration tests.

pub mod config_file;
pub mod http_reqwest;
pub mod kv_file;
pub mod network_poll;
pub mod push_ws;

pub use config_file::load_config;
pub use http_reqwest::{ReqwestHttpClient, SessionExpiredHook};
pub use kv_file::FileKvStore;
pub use network_poll::PollingNetworkMonitor;
pub use push_ws::WebSocketPushTransport;
