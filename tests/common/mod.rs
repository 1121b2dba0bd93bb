#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const FIXTURE: &str = r#"{
  "some": "data",
  "more": "data",
  "even": "more data",
  "and": "even more data"
}"#;

pub const FIXTURE_HASH: &str =
    "cbfab3df1f0156ba9eb8e292b754b8cd4f802582ce44b0a0551e918cf3d09092";

pub const GOLDEN_RESPONSE: &str = "{\"type\":\"core\",\"version\":\"1.0.0\",\"hash\":\"cbfab3df1f0156ba9eb8e292b754b8cd4f802582ce44b0a0551e918cf3d09092\",\"content\":{\"some\":\"data\",\"more\":\"data\",\"even\":\"more data\",\"and\":\"even more data\"}}";

pub fn depot_bin() -> &'static str {
    env!("CARGO_BIN_EXE_depot")
}

pub fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{port}")
}

/// Lay out one asset file under the tree root.
pub fn write_asset(root: &Path, asset_type: &str, version: &str, bytes: &[u8]) {
    let dir = root.join(asset_type);
    std::fs::create_dir_all(&dir).expect("create asset dir");
    std::fs::write(dir.join(format!("{version}.json")), bytes).expect("write asset");
}

/// Path of the record the server caches for `(asset_type, version)`.
pub fn record_path(root: &Path, asset_type: &str, version: &str) -> PathBuf {
    root.join(".depot")
        .join("storage")
        .join("filestorage")
        .join(format!("{asset_type}-{version}"))
}

pub fn spawn_server(root: &Path, addr: &str) -> Child {
    spawn_server_with_args(root, addr, &[])
}

pub fn spawn_server_with_args(root: &Path, addr: &str, extra_args: &[&str]) -> Child {
    let mut cmd = Command::new(depot_bin());
    cmd.args(["serve", "--listen", addr, "--root", root.to_str().unwrap()]);
    let has_explicit_log_level = extra_args.iter().copied().any(|arg| arg == "--log-level");
    if !has_explicit_log_level {
        cmd.args(["--log-level", "warn"]);
    }
    for arg in extra_args {
        cmd.arg(arg);
    }
    cmd.stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn depot serve")
}

pub fn wait_for_server(addr: &str, child: &mut Child) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("server failed to start before deadline");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Wait for a TCP address to become connectable (no child process to manage).
pub fn wait_for_addr(addr: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        if Instant::now() > deadline {
            panic!("address {addr} not connectable within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Run a depot command and capture its output.
pub fn run_depot(args: &[&str]) -> Output {
    run_depot_with_env(args, &[])
}

pub fn run_depot_with_env(args: &[&str], env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(depot_bin());
    for arg in args {
        cmd.arg(arg);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.output().expect("run depot")
}

pub fn assert_ok(output: &Output, context: &str) {
    assert!(
        output.status.success(),
        "{context} failed (status {:?})\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Send one RPC envelope line over TCP and read the response line.
pub fn rpc_request(addr: &str, line: &str) -> String {
    use std::io::{BufRead, BufReader, Write};

    let mut stream = std::net::TcpStream::connect(addr).expect("connect to server");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    stream.write_all(line.as_bytes()).expect("write request");
    stream.write_all(b"\n").expect("write newline");
    stream.flush().expect("flush");

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response).expect("read response");
    response.trim().to_string()
}

/// Generate a unique control socket path inside a temp directory.
pub fn control_socket_path(tmp: &Path) -> PathBuf {
    tmp.join("control.sock")
}

/// Wait for a Unix socket to appear on disk.
#[cfg(unix)]
pub fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            // Try connecting to verify it's listening
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!(
                "socket {} did not appear within {:?}",
                path.display(),
                timeout
            );
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Send a JSON request to the control socket and read the response line.
#[cfg(unix)]
pub fn control_request(socket_path: &Path, request: &str) -> String {
    use std::io::{BufRead, BufReader, Write};
    let mut stream =
        std::os::unix::net::UnixStream::connect(socket_path).expect("connect to control socket");
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
    stream.write_all(request.as_bytes()).expect("write request");
    stream.write_all(b"\n").expect("write newline");
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    line
}
