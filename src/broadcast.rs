//! Accepts observer connections and fans out notification frames to all
//! of them.
//!
//! Mirrors the reference implementation's indexed-TCP-server design: one
//! shared map from connection index to an outbound queue, a single lock
//! guarding the map, and a sentinel enqueued on every queue at shutdown
//! so each per-connection sender task knows to stop rather than being
//! killed mid-write.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::notification::Notifier;

/// One entry in an observer's outbound queue.
enum Outbound {
    Data(Vec<u8>),
    Close,
}

type Registry = Arc<Mutex<HashMap<i64, UnboundedSender<Outbound>>>>;

/// Observer fan-out server.
#[derive(Debug)]
pub struct BroadcastServer {
    registry: Registry,
    accept_handle: JoinHandle<()>,
}

impl BroadcastServer {
    /// Binds `addr` and starts the accept loop.
    pub async fn start(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind broadcast port {addr}"))?;
        log::info!("[BroadcastServer] listening on {addr}");

        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let next_id = Arc::new(AtomicI64::new(0));
        let accept_handle = tokio::spawn(Self::accept_loop(listener, registry.clone(), next_id));

        Ok(Self {
            registry,
            accept_handle,
        })
    }

    /// A [`Notifier`] that publishes onto this server's registry.
    pub fn notifier(&self) -> BroadcastNotifier {
        BroadcastNotifier {
            registry: self.registry.clone(),
        }
    }

    /// Enqueues a shutdown sentinel on every observer's queue and stops
    /// accepting new connections.
    pub async fn close(&self) {
        self.accept_handle.abort();
        let registry = self.registry.lock().expect("registry mutex poisoned");
        for sender in registry.values() {
            let _ = sender.send(Outbound::Close);
        }
    }

    async fn accept_loop(listener: TcpListener, registry: Registry, next_id: Arc<AtomicI64>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = mpsc::unbounded_channel();
                    registry
                        .lock()
                        .expect("registry mutex poisoned")
                        .insert(id, tx);
                    log::info!("[BroadcastServer] observer {id} connected from {peer}");
                    tokio::spawn(Self::serve_observer(stream, id, registry.clone(), rx));
                }
                Err(e) => {
                    log::error!("[BroadcastServer] accept error: {e}");
                    break;
                }
            }
        }
    }

    async fn serve_observer(
        stream: TcpStream,
        id: i64,
        registry: Registry,
        mut rx: UnboundedReceiver<Outbound>,
    ) {
        let (mut read_half, mut write_half) = stream.into_split();
        let mut discard = [0u8; 256];

        loop {
            tokio::select! {
                read_result = read_half.read(&mut discard) => {
                    match read_result {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(Outbound::Data(bytes)) => {
                            if write_half.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close) | None => break,
                    }
                }
            }
        }

        registry
            .lock()
            .expect("registry mutex poisoned")
            .remove(&id);
        log::info!("[BroadcastServer] observer {id} disconnected");
    }
}

/// [`Notifier`] implementation that enqueues a JSON line onto every
/// observer's queue under the registry lock, then returns -- the slow or
/// broken observer's own queue absorbs backpressure, never the producer.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    registry: Registry,
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, notification: Value) {
        let mut line = match serde_json::to_vec(&notification) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[BroadcastServer] failed to serialize notification: {e}");
                return;
            }
        };
        line.push(b'\n');

        let registry = self.registry.lock().expect("registry mutex poisoned");
        for sender in registry.values() {
            let _ = sender.send(Outbound::Data(line.clone()));
        }
    }
}
