//! Accepts Unix-domain admin connections, each carrying one newline
//! terminated JSON request, and dispatches it against the rest of the
//! engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::notification::{notification, Notifier};
use crate::slot_manager::SlotManager;

/// Path length limit on `sun_path`, conservatively the lower of the
/// macOS/Linux limits.
const MAX_SOCKET_PATH: usize = 104;

/// What the admin server needs in order to start/stop the pad-serving
/// socket. Kept as a trait so `AdminServer` does not need to know how a
/// `PadServer` is constructed.
#[async_trait::async_trait]
pub trait PadServerControl: std::fmt::Debug + Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn is_running(&self) -> bool;
}

/// Binds a Unix domain socket and serves the admin command protocol.
#[derive(Debug)]
pub struct AdminServer {
    socket_path: PathBuf,
    accept_handle: JoinHandle<()>,
}

impl AdminServer {
    pub async fn start(
        socket_path: PathBuf,
        group: &str,
        slots: Arc<SlotManager>,
        notifier: Arc<dyn Notifier>,
        pad_control: Arc<dyn PadServerControl>,
    ) -> Result<Self> {
        let path_len = socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "admin socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                socket_path.display()
            );
        }

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("failed to bind admin socket {}", socket_path.display()))?;

        set_socket_ownership(&socket_path, group)?;

        log::info!("[AdminServer] listening on {}", socket_path.display());

        let accept_handle = tokio::spawn(Self::accept_loop(
            listener,
            slots,
            notifier,
            pad_control,
        ));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn shutdown(self) {
        self.accept_handle.abort();
        let _ = std::fs::remove_file(&self.socket_path);
    }

    async fn accept_loop(
        listener: UnixListener,
        slots: Arc<SlotManager>,
        notifier: Arc<dyn Notifier>,
        pad_control: Arc<dyn PadServerControl>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    tokio::spawn(Self::serve_connection(
                        stream,
                        slots.clone(),
                        notifier.clone(),
                        pad_control.clone(),
                    ));
                }
                Err(e) => {
                    log::error!("[AdminServer] accept error: {e}");
                    break;
                }
            }
        }
    }

    async fn serve_connection(
        stream: UnixStream,
        slots: Arc<SlotManager>,
        notifier: Arc<dyn Notifier>,
        pad_control: Arc<dyn PadServerControl>,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let request: Value = match serde_json::from_str(line.trim_end()) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[AdminServer] malformed request: {e}");
                let _ = write_line(&mut write_half, &json!({"type": "response", "code": "unknown-command"})).await;
                return;
            }
        };

        let response = dispatch(&request, &slots, notifier.as_ref(), pad_control.as_ref()).await;
        let _ = write_line(&mut write_half, &response).await;
    }
}

async fn write_line(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    value: &Value,
) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(value).unwrap_or_default();
    bytes.push(b'\n');
    write_half.write_all(&bytes).await
}

async fn dispatch(
    request: &Value,
    slots: &SlotManager,
    notifier: &dyn Notifier,
    pad_control: &dyn PadServerControl,
) -> Value {
    let command = request.get("command").and_then(Value::as_str).unwrap_or("");

    match command {
        "server:start" => {
            if pad_control.is_running().await {
                json!({"type": "response", "code": "server:already-running"})
            } else {
                match pad_control.start().await {
                    Ok(()) => {
                        notifier.publish(notification("server:started", json!({})));
                        json!({
                            "type": "response",
                            "code": "server:ok",
                            "status": serialize_status(slots).await,
                        })
                    }
                    Err(e) => json!({"type": "response", "code": "server:error", "message": e.to_string()}),
                }
            }
        }
        "server:stop" => {
            if !pad_control.is_running().await {
                json!({"type": "response", "code": "server:not-running"})
            } else {
                match pad_control.stop().await {
                    Ok(()) => {
                        notifier.publish(notification("server:stopped", json!({})));
                        json!({"type": "response", "code": "server:ok"})
                    }
                    Err(e) => json!({"type": "response", "code": "server:error", "message": e.to_string()}),
                }
            }
        }
        "server:is-running" => {
            json!({"type": "response", "code": "server:is-running", "value": pad_control.is_running().await})
        }
        "pad:clear" => {
            let Some(index) = request.get("index").and_then(Value::as_u64) else {
                return json!({"type": "response", "code": "pad:invalid-index"});
            };
            let force = request.get("force").and_then(Value::as_bool).unwrap_or(false);
            match slots.release(index as usize, force, -1, true).await {
                Ok(()) => {
                    notifier.publish(notification("pad:cleared", json!({"index": index})));
                    json!({"type": "response", "code": "pad:ok", "index": index})
                }
                Err(_) => json!({"type": "response", "code": "pad:invalid-index"}),
            }
        }
        "pad:clear-all" => {
            slots.release_all().await;
            notifier.publish(notification("pad:all-cleared", json!({})));
            json!({"type": "response", "code": "pad:ok"})
        }
        "pad:status" => {
            json!({
                "type": "response",
                "code": "pad:status",
                "pads": serialize_status(slots).await,
                "passwords": slots.passwords().all().await.unwrap_or_default(),
            })
        }
        "pad:reset-passwords" => {
            let indices: Vec<usize> = request
                .get("indices")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_u64).map(|v| v as usize).collect())
                .unwrap_or_default();
            match slots.passwords().regenerate(&indices).await {
                Ok(passwords) => {
                    notifier.publish(notification("pad:passwords-reset", json!({})));
                    json!({"type": "response", "code": "ok", "passwords": passwords})
                }
                Err(e) => json!({"type": "response", "code": "error", "message": e.to_string()}),
            }
        }
        _ => json!({"type": "response", "code": "unknown-command"}),
    }
}

async fn serialize_status(slots: &SlotManager) -> Vec<Value> {
    slots
        .serialize()
        .await
        .into_iter()
        .map(|(tag, nickname)| json!({"status": tag, "nickname": nickname}))
        .collect()
}

#[cfg(unix)]
fn set_socket_ownership(path: &Path, group: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;

    match nix::unistd::Group::from_name(group) {
        Ok(Some(group)) => {
            nix::unistd::chown(path, None, Some(group.gid))
                .with_context(|| format!("failed to chown {} to group {group:?}", path.display()))?;
        }
        Ok(None) => {
            log::warn!("[AdminServer] group '{group}' not found, leaving socket ownership unchanged");
        }
        Err(e) => {
            log::warn!("[AdminServer] failed to look up group '{group}': {e}");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_socket_ownership(_path: &Path, _group: &str) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingDeviceFactory;
    use crate::password_store::PasswordStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::AsyncReadExt;

    #[derive(Debug)]
    struct NoopNotifier;
    impl Notifier for NoopNotifier {
        fn publish(&self, _notification: Value) {}
    }

    #[derive(Debug, Default)]
    struct FakePadControl {
        running: std::sync::Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl PadServerControl for FakePadControl {
        async fn start(&self) -> Result<()> {
            *self.running.lock().unwrap() = true;
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            *self.running.lock().unwrap() = false;
            Ok(())
        }
        async fn is_running(&self) -> bool {
            *self.running.lock().unwrap()
        }
    }

    async fn test_admin() -> (Arc<SlotManager>, AdminServer) {
        let tmp = tempfile::TempDir::new().unwrap();
        let passwords = PasswordStore::new(tmp.path().join("p.conf"), 8);
        let slots = Arc::new(SlotManager::new(
            8,
            passwords,
            Box::new(RecordingDeviceFactory),
            std::time::Duration::from_secs(5),
        ));
        let socket_path = tmp.path().join("admin.sock");
        std::mem::forget(tmp); // keep temp dir alive for the socket's lifetime

        let server = AdminServer::start(
            socket_path,
            "nonexistent-group-for-tests",
            slots.clone(),
            Arc::new(NoopNotifier),
            Arc::new(FakePadControl::default()),
        )
        .await
        .unwrap();

        (slots, server)
    }

    async fn roundtrip(server: &AdminServer, request: Value) -> Value {
        let mut stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            reader.read_line(&mut response_line),
        )
        .await
        .unwrap()
        .unwrap();
        serde_json::from_str(response_line.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn unknown_command_yields_unknown_code() {
        let (_slots, server) = test_admin().await;
        let response = roundtrip(&server, json!({"command": "bogus"})).await;
        assert_eq!(response["code"], "unknown-command");
    }

    #[tokio::test]
    async fn pad_clear_all_reports_ok() {
        let (_slots, server) = test_admin().await;
        let response = roundtrip(&server, json!({"command": "pad:clear-all"})).await;
        assert_eq!(response["code"], "pad:ok");
    }

    #[tokio::test]
    async fn pad_clear_invalid_index_reports_invalid() {
        let (_slots, server) = test_admin().await;
        let response = roundtrip(&server, json!({"command": "pad:clear", "index": 99, "force": true})).await;
        assert_eq!(response["code"], "pad:invalid-index");
    }

    #[tokio::test]
    async fn pad_status_reports_passwords_and_slots() {
        let (_slots, server) = test_admin().await;
        let response = roundtrip(&server, json!({"command": "pad:status"})).await;
        assert_eq!(response["code"], "pad:status");
        assert_eq!(response["pads"].as_array().unwrap().len(), 8);
        assert_eq!(response["passwords"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn pad_reset_passwords_changes_password() {
        let (slots, server) = test_admin().await;
        let before = slots.passwords().all().await.unwrap();
        let response = roundtrip(&server, json!({"command": "pad:reset-passwords", "indices": [0]})).await;
        assert_eq!(response["code"], "ok");
        let after: Vec<String> = serde_json::from_value(response["passwords"].clone()).unwrap();
        assert_ne!(before[0], after[0]);
    }

    #[tokio::test]
    async fn server_start_then_is_running() {
        let (_slots, server) = test_admin().await;
        let start = roundtrip(&server, json!({"command": "server:start"})).await;
        assert_eq!(start["code"], "server:ok");

        let query = roundtrip(&server, json!({"command": "server:is-running"})).await;
        assert_eq!(query["value"], true);
    }
}
