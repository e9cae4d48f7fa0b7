//! Online/offline state machine: a single-threaded event source that emits
//! `online(bool)` transitions and drives the driver's falling->rising edge.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Subscribes to connectivity changes. Implementations:
/// - `PollingNetworkMonitor` (in notes-sync-daemon) - periodic health probe
/// - `ScriptedNetworkMonitor` (below) - deterministic edges for driver tests
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Current known state, set by one synchronous probe at startup.
    fn is_online(&self) -> bool;

    /// A channel of online/offline transitions. Every falling->rising edge
    /// is a trigger for the driver to attempt a drain.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool>;
}

#[cfg(test)]
pub struct ScriptedNetworkMonitor {
    initial: std::sync::atomic::AtomicBool,
    tx: mpsc::UnboundedSender<bool>,
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
}

#[cfg(test)]
impl ScriptedNetworkMonitor {
    pub fn new(initial: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            initial: std::sync::atomic::AtomicBool::new(initial),
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    pub fn push(&self, online: bool) {
        self.initial
            .store(online, std::sync::atomic::Ordering::Relaxed);
        let _ = self.tx.send(online);
    }
}

#[cfg(test)]
#[async_trait]
impl NetworkMonitor for ScriptedNetworkMonitor {
    fn is_online(&self) -> bool {
        self.initial.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .expect("subscribe called more than once in test")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_updates_current_state_and_emits_edge() {
        let monitor = ScriptedNetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!monitor.is_online());

        monitor.push(true);
        assert!(monitor.is_online());
        assert_eq!(rx.recv().await, Some(true));
    }
}
