//! Native network monitor: probes the API's health endpoint on an interval
//! and emits a transition whenever reachability flips.

use async_trait::async_trait;
use notes_sync_core::NetworkMonitor;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info};

pub struct PollingNetworkMonitor {
    online: Arc<AtomicBool>,
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
}

impl PollingNetworkMonitor {
    /// Spawns the polling task. `online` starts optimistically true (§4.E:
    /// "default optimistic true") until the first probe completes.
    pub fn start(health_url: impl Into<String>, poll_interval: Duration) -> Self {
        let health_url = health_url.into();
        let online = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        let online_task = online.clone();
        let tx_task = tx;
        tokio::spawn(async move {
            let client = Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with a static timeout");
            let mut ticker = interval(poll_interval);
            loop {
                ticker.tick().await;
                let reachable = client.get(&health_url).send().await.is_ok();
                let was_online = online_task.swap(reachable, Ordering::SeqCst);
                if was_online != reachable {
                    info!(online = reachable, "network state changed");
                    let _ = tx_task.send(reachable);
                } else {
                    debug!(online = reachable, "network probe unchanged");
                }
            }
        });

        Self {
            online,
            rx: std::sync::Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl NetworkMonitor for PollingNetworkMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .expect("subscribe called more than once")
    }
}
