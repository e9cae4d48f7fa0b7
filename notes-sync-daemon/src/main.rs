//! notes-cli: headless runner for the offline-first notes sync engine.
//!
//! Wires the on-disk KV store, `reqwest` HTTP client, polling network
//! monitor and websocket push transport from this crate onto the
//! platform-agnostic `SyncDriver`/`OfflineApi` from notes-sync-core.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notes_sync_core::kv::{get_json, SLOT_LAST_SYNC};
use notes_sync_core::{
    apply_push_event, CacheRepository, EventBus, KeyValueStore, OfflineApi, OperationQueue,
    PushEvent, PushTransport, SyncConfig, SyncDriver, SyncEvent, SECURE_SLOT_AUTH_TOKEN,
    SECURE_SLOT_USER_DATA,
};
use notes_sync_daemon::{
    load_config, FileKvStore, PollingNetworkMonitor, ReqwestHttpClient, WebSocketPushTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "notes-cli")]
#[command(about = "Offline-first notes sync daemon")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync daemon: polls the network monitor, drains the queue on
    /// reconnect, and reconciles push events as they arrive.
    Run {
        /// Path to the TOML sync config file
        #[arg(long)]
        config: PathBuf,
        /// Directory holding the on-disk KV slots
        #[arg(long, default_value = "./notes-sync-data")]
        data_dir: PathBuf,
    },
    /// Print the current cache size, pending operation count, and last
    /// successful sync time, then exit.
    Status {
        #[arg(long, default_value = "./notes-sync-data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run { config, data_dir } => run(config, data_dir).await,
        Command::Status { data_dir } => status(data_dir).await,
    }
}

async fn status(data_dir: PathBuf) -> Result<()> {
    let kv = Arc::new(FileKvStore::new(data_dir));
    let cache = CacheRepository::load(kv.clone())
        .await
        .context("loading note cache")?;
    let last_sync: String = get_json(&*kv, SLOT_LAST_SYNC).await;
    let queue = OperationQueue::load(kv)
        .await
        .context("loading sync queue")?;
    println!("notes cached: {}", cache.list().len());
    println!("operations pending: {}", queue.len());
    println!(
        "last sync: {}",
        if last_sync.is_empty() { "never" } else { &last_sync }
    );
    Ok(())
}

/// Spawns a task draining `push.next_event()` into an mpsc channel, so the
/// main loop's `tokio::select!` can treat it the same as every other edge.
fn forward_push_events(push: Arc<WebSocketPushTransport>) -> mpsc::UnboundedReceiver<PushEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match push.next_event().await {
                Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("push transport error: {e}");
                    break;
                }
            }
        }
    });
    rx
}

async fn run(config_path: PathBuf, data_dir: PathBuf) -> Result<()> {
    let config: SyncConfig = load_config(&config_path).context("loading sync config")?;
    info!(base_url = %config.base_url, "starting notes-sync-daemon");

    let kv = Arc::new(FileKvStore::new(data_dir));
    let cache = Arc::new(
        CacheRepository::load(kv.clone())
            .await
            .context("loading note cache")?,
    );
    let queue = Arc::new(
        OperationQueue::load(kv.clone())
            .await
            .context("loading sync queue")?,
    );
    let events = Arc::new(EventBus::new());

    // `on_session_expired` fires synchronously from inside `reqwest`'s
    // response handling and can't itself await the KV/push/event-bus work a
    // session expiry requires (§4.D); it only signals over this channel, and
    // the select loop below does the actual clearing.
    let (expiry_tx, mut expiry_rx) = mpsc::unbounded_channel::<()>();
    let http = Arc::new(ReqwestHttpClient::new(
        config.base_url.clone(),
        config.timeout_ms,
        Box::new(move || {
            let _ = expiry_tx.send(());
        }),
    ));

    let driver = Arc::new(SyncDriver::new(
        cache.clone(),
        queue.clone(),
        http.clone(),
        events.clone(),
        kv.clone(),
        config.clone(),
    ));

    let network = Arc::new(PollingNetworkMonitor::start(
        format!("{}/health", config.base_url.trim_end_matches('/')),
        Duration::from_secs(30),
    ));
    let mut network_rx = network.subscribe();

    // Started alongside the driver so a future UI layer can attach to the
    // same cache/queue/events the daemon is already draining; this binary
    // itself only drives the driver, not the façade's mutating calls.
    let _api = OfflineApi::new(
        cache.clone(),
        queue.clone(),
        events.clone(),
        http.clone(),
        network.clone(),
    );

    let token = kv.get(SECURE_SLOT_AUTH_TOKEN).await?;
    let user_id = kv.get(SECURE_SLOT_USER_DATA).await?;
    let (mut push, mut push_rx) = match (token, user_id) {
        (Some(token), Some(user_id)) => {
            let token = String::from_utf8_lossy(&token).into_owned();
            let user_id = String::from_utf8_lossy(&user_id).into_owned();
            let push = Arc::new(WebSocketPushTransport::new(
                &config.push_host,
                config.push_port,
                config.push_tls,
                &config.push_key,
            ));
            http.set_token(Some(token.clone()));
            match push.connect(&user_id, &token).await {
                Ok(()) => {
                    let rx = forward_push_events(push.clone());
                    (Some(push), Some(rx))
                }
                Err(e) => {
                    warn!("push connect failed, continuing without push: {e}");
                    (None, None)
                }
            }
        }
        _ => {
            info!("no stored session, starting without push subscription");
            (None, None)
        }
    };

    let _sub = events.subscribe(|event| {
        info!(?event, "sync event");
    });

    info!("daemon running, press ctrl+c to stop");
    loop {
        tokio::select! {
            Some(online) = network_rx.recv() => {
                events.emit(SyncEvent::NetOnline { online });
                if online {
                    match driver.drain().await {
                        Ok(report) => info!(
                            successful = report.successful,
                            failed = report.failed,
                            remaining = report.remaining,
                            "drain complete"
                        ),
                        Err(e) => error!("drain failed: {e}"),
                    }
                }
            }

            Some(push_event) = async {
                match push_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = apply_push_event(&*cache, &events, push_event).await {
                    warn!("failed to apply push event: {e}");
                }
            }

            Some(()) = expiry_rx.recv() => {
                warn!("session expired, clearing stored credentials");
                if let Some(transport) = push.take() {
                    if let Err(e) = transport.close().await {
                        warn!("error closing push transport: {e}");
                    }
                }
                push_rx = None;
                kv.delete(SECURE_SLOT_AUTH_TOKEN).await?;
                kv.delete(SECURE_SLOT_USER_DATA).await?;
                http.set_token(None);
                events.emit(SyncEvent::AuthChanged { authenticated: false });
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("shutting down");
    Ok(())
}
