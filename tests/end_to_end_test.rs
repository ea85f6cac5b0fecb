//! End-to-end scenarios driving a real [`Supervisor`] over real sockets:
//! pad handshake + event loop, admin commands, and broadcast fan-out,
//! all talking to each other exactly as separate processes would.

use std::time::Duration;

use hawa_virtualpad::config::Config;
use hawa_virtualpad::device::RecordingDeviceFactory;
use hawa_virtualpad::Supervisor;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

fn free_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_test_supervisor(tmp: &tempfile::TempDir) -> Supervisor {
    let config = Config {
        pad_port: free_tcp_port(),
        broadcast_port: free_tcp_port(),
        admin_socket_path: tmp.path().join("admin.sock"),
        admin_group: "nonexistent-group-for-tests".to_string(),
        password_file: tmp.path().join("passwords.conf"),
        slot_count: 8,
        slot_cooldown_secs: 5,
        heartbeat_interval_secs: 5,
        heartbeat_sweep_interval_secs: 1,
    };
    Supervisor::start(config, Box::new(RecordingDeviceFactory))
        .await
        .unwrap()
}

fn handshake(index: u8, password: &str, nickname: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(22);
    buf.push(index);
    buf.extend_from_slice(password.as_bytes());
    let mut name_bytes = nickname.as_bytes().to_vec();
    name_bytes.resize(16, b'\x08');
    buf.extend_from_slice(&name_bytes);
    buf.push(0);
    buf
}

async fn admin_roundtrip(socket_path: &std::path::Path, request: Value) -> Value {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    let mut line = serde_json::to_vec(&request).unwrap();
    line.push(b'\n');
    stream.write_all(&line).await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut response_line))
        .await
        .unwrap()
        .unwrap();
    serde_json::from_str(response_line.trim_end()).unwrap()
}

/// S1 — happy path: login, one button event, graceful close moves the
/// slot to RECENTLY_USED, and the broadcast observer sees the pad:set
/// notification.
#[tokio::test]
async fn happy_path_login_emit_and_graceful_close() {
    let tmp = tempfile::TempDir::new().unwrap();
    let supervisor = start_test_supervisor(&tmp).await;
    let passwords = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    let password0 = passwords["passwords"][0].as_str().unwrap().to_string();

    let broadcast_addr = format!("127.0.0.1:{}", supervisor.config().broadcast_port);
    let mut observer = TcpStream::connect(&broadcast_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pad_addr = format!("127.0.0.1:{}", supervisor.config().pad_port);
    let mut pad = TcpStream::connect(&pad_addr).await.unwrap();
    pad.write_all(&handshake(0, &password0, "alice"))
        .await
        .unwrap();

    let mut code = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(2), pad.read_exact(&mut code))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code[0], 0x00, "expected LOGIN_SUCCESS");

    let mut obs_buf = vec![0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(2), observer.read(&mut obs_buf))
        .await
        .unwrap()
        .unwrap();
    let frame: Value = serde_json::from_slice(&obs_buf[..n]).unwrap();
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["command"], "pad:set");
    assert_eq!(frame["nickname"], "alice");
    assert_eq!(frame["index"], 0);

    // One event: BTN_SOUTH (logical index 2) pressed.
    pad.write_all(&[0x01, 0x02, 0x01]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    assert_eq!(status["pads"][0]["status"], "occupied");

    // CLOSE_CONNECTION.
    pad.write_all(&[19]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    assert_eq!(status["pads"][0]["status"], "recently-used");
    assert_eq!(status["pads"][0]["nickname"], "");

    supervisor.shutdown().await;
}

/// S2 — wrong password: login fails, slot stays empty.
#[tokio::test]
async fn wrong_password_leaves_slot_empty() {
    let tmp = tempfile::TempDir::new().unwrap();
    let supervisor = start_test_supervisor(&tmp).await;

    let pad_addr = format!("127.0.0.1:{}", supervisor.config().pad_port);
    let mut pad = TcpStream::connect(&pad_addr).await.unwrap();
    pad.write_all(&handshake(0, "zzzz", "alice")).await.unwrap();

    let mut code = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(2), pad.read_exact(&mut code))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code[0], 0x01, "expected LOGIN_FAILURE");

    let status = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    assert_eq!(status["pads"][0]["status"], "empty");

    supervisor.shutdown().await;
}

/// S5 — admin clear: force-clearing an occupied slot reports pad:ok,
/// publishes pad:cleared, and the slot is empty afterward.
#[tokio::test]
async fn admin_force_clear_empties_slot_and_notifies() {
    let tmp = tempfile::TempDir::new().unwrap();
    let supervisor = start_test_supervisor(&tmp).await;
    let passwords = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    let password0 = passwords["passwords"][0].as_str().unwrap().to_string();

    let broadcast_addr = format!("127.0.0.1:{}", supervisor.config().broadcast_port);
    let mut observer = TcpStream::connect(&broadcast_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pad_addr = format!("127.0.0.1:{}", supervisor.config().pad_port);
    let mut pad = TcpStream::connect(&pad_addr).await.unwrap();
    pad.write_all(&handshake(0, &password0, "alice"))
        .await
        .unwrap();
    let mut code = [0u8; 1];
    pad.read_exact(&mut code).await.unwrap();
    assert_eq!(code[0], 0x00);

    // Drain the pad:set notification before asserting on pad:cleared.
    let mut obs_buf = vec![0u8; 256];
    let n = observer.read(&mut obs_buf).await.unwrap();
    assert!(String::from_utf8_lossy(&obs_buf[..n]).contains("pad:set"));

    let response = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:clear", "index": 0, "force": true}),
    )
    .await;
    assert_eq!(response["code"], "pad:ok");
    assert_eq!(response["index"], 0);

    let n = tokio::time::timeout(Duration::from_secs(2), observer.read(&mut obs_buf))
        .await
        .unwrap()
        .unwrap();
    let frame: Value = serde_json::from_slice(&obs_buf[..n]).unwrap();
    assert_eq!(frame["command"], "pad:cleared");
    assert_eq!(frame["index"], 0);

    let status = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    assert_eq!(status["pads"][0]["status"], "empty");

    supervisor.shutdown().await;
}

/// Password rotation: after `pad:reset-passwords`, the old password is
/// rejected and the new one is accepted.
#[tokio::test]
async fn reset_passwords_rotates_and_invalidates_old_password() {
    let tmp = tempfile::TempDir::new().unwrap();
    let supervisor = start_test_supervisor(&tmp).await;
    let before = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:status"}),
    )
    .await;
    let old_password = before["passwords"][0].as_str().unwrap().to_string();

    let reset = admin_roundtrip(
        supervisor.config().admin_socket_path.as_path(),
        json!({"command": "pad:reset-passwords", "indices": [0]}),
    )
    .await;
    assert_eq!(reset["code"], "ok");
    let new_password = reset["passwords"][0].as_str().unwrap().to_string();
    assert_ne!(old_password, new_password);

    let pad_addr = format!("127.0.0.1:{}", supervisor.config().pad_port);

    let mut pad_old = TcpStream::connect(&pad_addr).await.unwrap();
    pad_old
        .write_all(&handshake(0, &old_password, "alice"))
        .await
        .unwrap();
    let mut code = [0u8; 1];
    pad_old.read_exact(&mut code).await.unwrap();
    assert_eq!(code[0], 0x01, "old password should now fail");

    let mut pad_new = TcpStream::connect(&pad_addr).await.unwrap();
    pad_new
        .write_all(&handshake(0, &new_password, "alice"))
        .await
        .unwrap();
    let mut code = [0u8; 1];
    pad_new.read_exact(&mut code).await.unwrap();
    assert_eq!(code[0], 0x00, "new password should succeed");

    supervisor.shutdown().await;
}
