//! Control socket — newline-delimited JSON over a Unix stream socket.
//!
//! Protocol:
//!   Client sends one JSON line: {"type": "status"} / {"type": "shutdown"} / {"type": "logs", "level": "debug"}
//!   Server responds with one or more JSON lines.
//!   For status/shutdown: single response line, then close.
//!   For logs: streaming response lines until the client disconnects or the server shuts down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ─── Protocol types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub pid: u32,
    pub uptime_secs: u64,
    pub root: String,
    pub listen: String,
    pub cached_records: u64,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: String,
    pub level: String,
    pub target: String,
    pub msg: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Shared server state exposed through the control socket.
pub struct ControlState {
    pub pid: u32,
    pub start_time: Instant,
    pub root: String,
    pub listen: String,
    pub storage_dir: PathBuf,
    pub shutdown_tx: tokio::sync::mpsc::Sender<()>,
    pub log_tx: broadcast::Sender<LogEvent>,
}

impl ControlState {
    fn status(&self) -> StatusResponse {
        StatusResponse {
            running: true,
            pid: self.pid,
            uptime_secs: self.start_time.elapsed().as_secs(),
            root: self.root.clone(),
            listen: self.listen.clone(),
            cached_records: count_records(&self.storage_dir),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Number of record files under the storage dir (one level of collection
/// subdirectories, one file per key).
fn count_records(storage_dir: &Path) -> u64 {
    let mut count = 0;
    let Ok(collections) = std::fs::read_dir(storage_dir) else {
        return 0;
    };
    for collection in collections.flatten() {
        if let Ok(entries) = std::fs::read_dir(collection.path()) {
            count += entries.flatten().filter(|e| e.path().is_file()).count() as u64;
        }
    }
    count
}

fn level_rank(level: &str) -> u8 {
    match level.to_lowercase().as_str() {
        "trace" => 0,
        "debug" => 1,
        "info" => 2,
        "warn" | "warning" => 3,
        "error" => 4,
        _ => 2,
    }
}

// ─── Control socket server ───────────────────────────────────────────────────

#[cfg(unix)]
pub async fn run_control_socket(
    socket_path: String,
    state: std::sync::Arc<ControlState>,
) -> anyhow::Result<()> {
    // Remove stale socket if present
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = Path::new(&socket_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = tokio::net::UnixListener::bind(&socket_path)?;

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_control_connection(stream, state).await {
                tracing::warn!("control connection error: {e:#}");
            }
        });
    }
}

#[cfg(unix)]
async fn handle_control_connection(
    stream: tokio::net::UnixStream,
    state: std::sync::Arc<ControlState>,
) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let line = line.trim();

    if line.is_empty() {
        return Ok(());
    }

    let request: serde_json::Value =
        serde_json::from_str(line).map_err(|e| anyhow::anyhow!("invalid JSON: {e}"))?;
    let req_type = request["type"].as_str().unwrap_or("");

    match req_type {
        "status" => {
            write_line(&mut writer, &serde_json::to_string(&state.status())?).await?;
        }
        "shutdown" => {
            let resp = serde_json::json!({"type": "shutdown", "ok": true});
            write_line(&mut writer, &resp.to_string()).await?;
            let _ = state.shutdown_tx.send(()).await;
        }
        "logs" => {
            let min_rank = level_rank(request["level"].as_str().unwrap_or("info"));
            let mut rx = state.log_tx.subscribe();

            // Stream log events until the client disconnects or the channel closes
            loop {
                match rx.recv().await {
                    Ok(event) if level_rank(&event.level) >= min_rank => {
                        let Ok(json) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if writer.write_all(json.as_bytes()).await.is_err()
                            || writer.write_all(b"\n").await.is_err()
                            || writer.flush().await.is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
        _ => {
            let resp =
                serde_json::json!({"type": "error", "msg": format!("unknown request type: {req_type}")});
            write_line(&mut writer, &resp.to_string()).await?;
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn write_line(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    value: &str,
) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;

    writer.write_all(value.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

// ─── Control socket client ───────────────────────────────────────────────────

/// Send one request line, return the connected stream for reading replies.
#[cfg(unix)]
fn send_request(
    socket_path: &str,
    request: &serde_json::Value,
    read_timeout: Option<std::time::Duration>,
) -> anyhow::Result<std::os::unix::net::UnixStream> {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    let mut stream = UnixStream::connect(socket_path)
        .map_err(|e| anyhow::anyhow!("cannot connect to control socket: {e}"))?;
    stream.set_read_timeout(read_timeout)?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    writeln!(stream, "{}", request)?;
    stream.flush()?;
    Ok(stream)
}

#[cfg(unix)]
fn read_reply_line(stream: std::os::unix::net::UnixStream) -> anyhow::Result<String> {
    use std::io::{BufRead, BufReader};

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line)
}

#[cfg(unix)]
pub fn client_status(socket_path: &str) -> anyhow::Result<StatusResponse> {
    let stream = send_request(
        socket_path,
        &serde_json::json!({"type": "status"}),
        Some(std::time::Duration::from_secs(5)),
    )?;
    let line = read_reply_line(stream)?;
    let status: StatusResponse = serde_json::from_str(line.trim())?;
    Ok(status)
}

#[cfg(unix)]
pub fn client_shutdown(socket_path: &str) -> anyhow::Result<()> {
    let stream = send_request(
        socket_path,
        &serde_json::json!({"type": "shutdown"}),
        Some(std::time::Duration::from_secs(5)),
    )?;
    read_reply_line(stream)?;
    Ok(())
}

#[cfg(unix)]
pub fn client_logs(socket_path: &str, level: &str, json_output: bool) -> anyhow::Result<()> {
    use std::io::{BufRead, BufReader};

    // No read timeout: log streaming blocks until the server goes away.
    let stream = send_request(
        socket_path,
        &serde_json::json!({"type": "logs", "level": level}),
        None,
    )?;

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        match line {
            Ok(l) if l.trim().is_empty() => continue,
            Ok(l) => {
                if json_output {
                    println!("{l}");
                } else if let Ok(event) = serde_json::from_str::<LogEvent>(&l) {
                    println!(
                        "[{}] {} {} {}",
                        event.level, event.ts, event.target, event.msg
                    );
                } else {
                    println!("{l}");
                }
            }
            Err(_) => break,
        }
    }
    Ok(())
}

// Non-unix stubs
#[cfg(not(unix))]
pub async fn run_control_socket(
    _socket_path: String,
    _state: std::sync::Arc<ControlState>,
) -> anyhow::Result<()> {
    anyhow::bail!("control socket not supported on this platform")
}

#[cfg(not(unix))]
pub fn client_status(_socket_path: &str) -> anyhow::Result<StatusResponse> {
    anyhow::bail!("control socket not supported on this platform")
}

#[cfg(not(unix))]
pub fn client_shutdown(_socket_path: &str) -> anyhow::Result<()> {
    anyhow::bail!("control socket not supported on this platform")
}

#[cfg(not(unix))]
pub fn client_logs(_socket_path: &str, _level: &str, _json: bool) -> anyhow::Result<()> {
    anyhow::bail!("control socket not supported on this platform")
}
