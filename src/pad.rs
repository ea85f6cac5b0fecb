//! Accepts pad connections and runs the per-connection binary protocol
//! against the [`SlotManager`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::PadError;
use crate::notification::{notification, Notifier};
use crate::slot_manager::SlotManager;

/// Single-byte response codes written on the pad wire protocol.
pub mod codes {
    pub const LOGIN_SUCCESS: u8 = 0x00;
    pub const LOGIN_FAILURE: u8 = 0x01;
    pub const PAD_INVALID: u8 = 0x02;
    pub const PAD_BUSY: u8 = 0x04;
    pub const TERMINATED: u8 = 0x05;
    pub const COMMAND_LENGTH_MISMATCH: u8 = 0x06;
    pub const PONG: u8 = 0x07;
    pub const TIMEOUT: u8 = 0x08;
}

const HANDSHAKE_LEN: usize = 22;
/// Wire-protocol length-byte threshold: values below this are an event
/// count (0..18 logical inputs: buttons, D-pad, axes); `19`/`20` are the
/// `CLOSE_CONNECTION`/`PING` opcodes; anything else is a protocol error.
const N_BUTTONS: u8 = 18;
const CLOSE_CONNECTION: u8 = 19;
const PING: u8 = 20;

/// Accepts TCP connections on the pad port and drives the handshake +
/// event loop protocol for each one.
#[derive(Debug)]
pub struct PadServer {
    listener_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl PadServer {
    /// Binds `addr` and starts the accept loop. `notifier` is where the
    /// server publishes `pad:set`/`pad:timeout` notifications; `heartbeat_interval`
    /// bounds how long a connection may go without a PING before being timed out.
    pub async fn start(
        addr: SocketAddr,
        slots: Arc<SlotManager>,
        notifier: Arc<dyn Notifier>,
        heartbeat_interval: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind pad port {addr}"))?;
        log::info!("[PadServer] listening on {addr}");

        let shutdown = Arc::new(Notify::new());
        let next_id = Arc::new(AtomicI64::new(0));
        let accept_handle = tokio::spawn(Self::accept_loop(
            listener,
            slots,
            notifier,
            heartbeat_interval,
            next_id,
            shutdown.clone(),
        ));

        Ok(Self {
            listener_addr: addr,
            accept_handle,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener_addr
    }

    /// Stops accepting new connections and force-releases every slot, as
    /// the cancellation contract requires.
    pub async fn stop(&self, slots: &SlotManager) {
        self.accept_handle.abort();
        self.shutdown.notify_waiters();
        slots.release_all().await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn accept_loop(
        listener: TcpListener,
        slots: Arc<SlotManager>,
        notifier: Arc<dyn Notifier>,
        heartbeat_interval: Duration,
        next_id: Arc<AtomicI64>,
        shutdown: Arc<Notify>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let connection_id = next_id.fetch_add(1, Ordering::Relaxed);
                    log::info!("[PadServer] connection {connection_id} from {peer}");
                    tokio::spawn(Self::serve_connection(
                        stream,
                        connection_id,
                        slots.clone(),
                        notifier.clone(),
                        heartbeat_interval,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    log::error!("[PadServer] accept error: {e}");
                    break;
                }
            }
        }
    }

    async fn serve_connection(
        mut stream: TcpStream,
        connection_id: i64,
        slots: Arc<SlotManager>,
        notifier: Arc<dyn Notifier>,
        heartbeat_interval: Duration,
        shutdown: Arc<Notify>,
    ) {
        let mut handshake = [0u8; HANDSHAKE_LEN];
        if stream.read_exact(&mut handshake).await.is_err() {
            log::warn!("[PadServer] connection {connection_id}: short handshake");
            return;
        }

        let pad_index = handshake[0] as usize;
        let password = match std::str::from_utf8(&handshake[1..5]) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let _ = write_code(&mut stream, codes::LOGIN_FAILURE).await;
                return;
            }
        };
        let nickname = String::from_utf8_lossy(&handshake[5..21])
            .trim_end_matches('\u{8}')
            .to_string();

        match slots
            .occupy(pad_index, nickname.clone(), &password, connection_id)
            .await
        {
            Ok(()) => {
                if write_code(&mut stream, codes::LOGIN_SUCCESS).await.is_err() {
                    let _ = slots.release(pad_index, false, connection_id, false).await;
                    return;
                }
            }
            Err(e) => {
                let _ = write_code(&mut stream, e.response_code().unwrap_or(codes::PAD_INVALID))
                    .await;
                return;
            }
        }

        notifier.publish(notification(
            "pad:set",
            serde_json::json!({"nickname": nickname, "index": pad_index}),
        ));

        let has_ping = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let heartbeat_ping_flag = has_ping.clone();
        let heartbeat_slots = slots.clone();
        let heartbeat_notifier = notifier.clone();
        let (mut read_half, write_half) = stream.into_split();
        let write_half = Arc::new(tokio::sync::Mutex::new(write_half));
        let heartbeat_write = write_half.clone();
        let timed_out = Arc::new(Notify::new());
        let heartbeat_timed_out = timed_out.clone();

        let heartbeat_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                let had_ping = heartbeat_ping_flag.swap(false, Ordering::Relaxed);
                if !had_ping {
                    let mut guard = heartbeat_write.lock().await;
                    let _ = guard.write_all(&[codes::TIMEOUT]).await;
                    drop(guard);
                    let _ = heartbeat_slots
                        .release(pad_index, true, connection_id, true)
                        .await;
                    heartbeat_notifier.publish(notification(
                        "pad:timeout",
                        serde_json::json!({"index": pad_index}),
                    ));
                    heartbeat_timed_out.notify_one();
                    break;
                }
            }
        });

        let mut len_buf = [0u8; 1];
        let termination_reason = loop {
            tokio::select! {
                _ = shutdown.notified() => break "shutdown",
                _ = timed_out.notified() => break "timeout",
                read_result = read_half.read_exact(&mut len_buf) => {
                    if read_result.is_err() {
                        break "io-error";
                    }
                    let length = len_buf[0];
                    if length < N_BUTTONS {
                        let mut payload = vec![0u8; (length as usize) * 2];
                        if read_half.read_exact(&mut payload).await.is_err() {
                            let mut guard = write_half.lock().await;
                            let _ = guard.write_all(&[codes::COMMAND_LENGTH_MISMATCH]).await;
                            break "short-command";
                        }
                        let events: Vec<(u8, u8)> = payload
                            .chunks_exact(2)
                            .map(|pair| (pair[0], pair[1]))
                            .collect();
                        if let Err(PadError::PadNotInUse | PadError::PadMismatch) =
                            slots.emit(pad_index, &events, connection_id).await
                        {
                            // Another task already handled this slot; treat as
                            // a no-op rather than tearing down the connection.
                        }
                    } else if length == CLOSE_CONNECTION {
                        break "close-connection";
                    } else if length == PING {
                        has_ping.store(true, Ordering::Relaxed);
                        let mut guard = write_half.lock().await;
                        if guard.write_all(&[codes::PONG]).await.is_err() {
                            break "io-error";
                        }
                    } else {
                        break "protocol-error";
                    }
                }
            }
        };

        heartbeat_task.abort();

        if termination_reason == "shutdown" {
            let mut guard = write_half.lock().await;
            let _ = guard.write_all(&[codes::TERMINATED]).await;
        }

        if termination_reason == "close-connection" {
            let _ = slots
                .release(pad_index, false, connection_id, true)
                .await;
        } else if termination_reason != "timeout" {
            let _ = slots
                .release(pad_index, false, connection_id, false)
                .await;
        }
        log::info!("[PadServer] connection {connection_id} terminated: {termination_reason}");
    }
}

async fn write_code(stream: &mut TcpStream, code: u8) -> std::io::Result<()> {
    stream.write_all(&[code]).await
}
