//! depot — content-addressed asset distribution over the network.
//!
//! Single binary:
//!   depot serve --listen <addr> --root <dir>     → server mode
//!   depot fetch --server <addr> [--type <t>]     → request an asset
//!   depot up / down / server status / logs       → daemon lifecycle

mod assets;
mod client;
mod control;
mod dispatch;
mod error;
mod logging;
mod server;
mod store;
mod transfer;

use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};

// ─── Help text ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = "\
ENVIRONMENT:
    DEPOT_ROOT              Asset tree root directory — used by `depot serve`
                            and `depot up` when --root is not provided
    DEPOT_SERVER            Server address (host:port) for `depot fetch`

SETUP:
    # Start a server over an asset tree
    depot serve --listen 0.0.0.0:13100 --root /srv/assets

    # Fetch an asset (content + digest)
    depot fetch --server 127.0.0.1:13100 --type core --version 1.0.0

    # Revalidate a cached copy — only the digest comes back on a match
    depot fetch --server 127.0.0.1:13100 --type core --version 1.0.0 \\
        --hash cbfab3df1f0156ba9eb8e292b754b8cd4f802582ce44b0a0551e918cf3d09092";

const SERVE_AFTER_HELP: &str = "\
EXAMPLES:
    depot serve --listen 0.0.0.0:13100 --root /srv/assets
    depot serve --listen 127.0.0.1:13100 --root .";

const FETCH_AFTER_HELP: &str = "\
EXAMPLES:
    depot fetch --server 127.0.0.1:13100
    depot fetch --server 127.0.0.1:13100 --type core --version 1.0.0
    DEPOT_SERVER=127.0.0.1:13100 depot fetch --type maps --version 2.1.0";

const SERVER_AFTER_HELP: &str = "\
EXAMPLES:
    depot server status
    depot server logs --level debug
    depot server logs --json";

// ─── CLI definition ───────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "depot",
    about = "depot — content-addressed asset distribution over the network",
    after_help = AFTER_HELP,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the depot server (foreground)
    #[command(after_help = SERVE_AFTER_HELP)]
    Serve {
        /// Address to listen on (e.g. 0.0.0.0:13100)
        #[arg(long)]
        listen: String,
        /// Asset tree root directory
        #[arg(long, env = "DEPOT_ROOT")]
        root: String,
        /// Log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,
        /// Log format (text, json)
        #[arg(long, default_value = "text")]
        log_format: String,
        /// Path to control socket
        #[arg(long)]
        control_socket: Option<String>,
        /// Run as daemon (internal, set by `depot up`)
        #[arg(long, hide = true)]
        daemon: bool,
        /// Log file path (used in daemon mode)
        #[arg(long)]
        log_file: Option<String>,
    },

    /// Request one asset from a running server
    #[command(after_help = FETCH_AFTER_HELP)]
    Fetch {
        /// Server address (host:port)
        #[arg(long, env = "DEPOT_SERVER")]
        server: String,
        /// Asset type (server default applies if omitted)
        #[arg(long = "type")]
        asset_type: Option<String>,
        /// Asset version (server default applies if omitted)
        #[arg(long)]
        version: Option<String>,
        /// Digest of the copy you already hold; content is only sent back
        /// when it differs
        #[arg(long)]
        hash: Option<String>,
    },

    /// Start the depot server as a background daemon
    Up {
        /// Asset tree root directory
        #[arg(long, env = "DEPOT_ROOT")]
        root: String,
        /// Address to listen on (e.g. 0.0.0.0:13100)
        #[arg(long)]
        listen: String,
        /// Log level for the daemon (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,
        /// Daemon log file path
        #[arg(long)]
        log_file: Option<String>,
        /// Path to control socket
        #[arg(long)]
        control_socket: Option<String>,
    },

    /// Stop the depot daemon
    Down {
        /// Path to control socket
        #[arg(long)]
        control_socket: Option<String>,
    },

    /// Depot daemon status/log streaming commands
    #[command(after_help = SERVER_AFTER_HELP)]
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Show depot daemon status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Path to control socket
        #[arg(long)]
        control_socket: Option<String>,
    },

    /// Stream logs from a running depot daemon
    Logs {
        /// Log level filter (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        level: String,
        /// Output raw JSON log lines
        #[arg(long)]
        json: bool,
        /// Path to control socket
        #[arg(long)]
        control_socket: Option<String>,
    },
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        None => {
            Cli::command().print_help().ok();
            println!();
            ExitCode::SUCCESS
        }
        Some(Commands::Serve {
            listen,
            root,
            log_level,
            log_format,
            control_socket,
            daemon,
            log_file,
        }) => run_serve(server::ServeOptions {
            listen_addr: listen,
            root,
            log_level,
            log_format,
            control_socket,
            daemon,
            log_file,
        }),
        Some(Commands::Fetch {
            server,
            asset_type,
            version,
            hash,
        }) => run_fetch(&server, asset_type.as_deref(), version.as_deref(), hash.as_deref()),
        Some(Commands::Up {
            root,
            listen,
            log_level,
            log_file,
            control_socket,
        }) => run_up(
            &root,
            &listen,
            &log_level,
            log_file.as_deref(),
            control_socket.as_deref(),
        ),
        Some(Commands::Down { control_socket }) => run_down(control_socket.as_deref()),
        Some(Commands::Server { command }) => match command {
            ServerCommands::Status {
                json,
                control_socket,
            } => run_status(json, control_socket.as_deref()),
            ServerCommands::Logs {
                level,
                json,
                control_socket,
            } => run_logs(&level, json, control_socket.as_deref()),
        },
    }
}

// ─── Server mode ──────────────────────────────────────────────────────────────

fn run_serve(opts: server::ServeOptions) -> ExitCode {
    // In daemon mode, stdout/stderr are already redirected to the log file
    // by `run_up` before spawning this process. Nothing extra needed here.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    if let Err(err) = rt.block_on(server::run_serve(opts)) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// ─── Fetch mode ───────────────────────────────────────────────────────────────

fn run_fetch(
    server_addr: &str,
    asset_type: Option<&str>,
    version: Option<&str>,
    hash: Option<&str>,
) -> ExitCode {
    let mut payload = serde_json::Map::new();
    if let Some(t) = asset_type {
        payload.insert("type".to_string(), t.into());
    }
    if let Some(v) = version {
        payload.insert("version".to_string(), v.into());
    }
    if let Some(h) = hash {
        payload.insert("hash".to_string(), h.into());
    }
    let payload = serde_json::Value::Object(payload).to_string();

    let result = client::DepotClient::connect(server_addr)
        .and_then(|mut client| client.call(transfer::RPC_TRANSFER_FILE, &payload));

    match result {
        Ok(response) => {
            println!("{response}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

// ─── Up / Down / Status / Logs ────────────────────────────────────────────────

fn default_control_socket() -> String {
    let dir = std::env::temp_dir().join("depot");
    std::fs::create_dir_all(&dir).ok();
    dir.join("control.sock").to_string_lossy().to_string()
}

fn resolve_control_socket(explicit: Option<&str>) -> String {
    explicit
        .map(|s| s.to_string())
        .unwrap_or_else(default_control_socket)
}

fn run_up(
    root: &str,
    listen: &str,
    log_level: &str,
    log_file: Option<&str>,
    control_socket: Option<&str>,
) -> ExitCode {
    let sock_path = resolve_control_socket(control_socket);

    // Check if already running by trying to connect to control socket
    if let Ok(status) = control::client_status(&sock_path) {
        if status.running {
            eprintln!(
                "depot is already running (PID {}). Use `depot down` first.",
                status.pid
            );
            return ExitCode::FAILURE;
        }
    }

    // Determine log file
    let log_file_path = log_file.map(|s| s.to_string()).unwrap_or_else(|| {
        let dir = std::env::temp_dir().join("depot");
        std::fs::create_dir_all(&dir).ok();
        dir.join("daemon.log").to_string_lossy().to_string()
    });

    // Spawn depot serve --daemon
    let exe = match std::env::current_exe() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: cannot determine executable path: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut cmd = std::process::Command::new(exe);
    cmd.args([
        "serve",
        "--listen",
        listen,
        "--root",
        root,
        "--log-level",
        log_level,
        "--control-socket",
        &sock_path,
        "--log-file",
        &log_file_path,
        "--daemon",
    ]);

    // Redirect stdout/stderr to log file for daemon
    let log_file_handle = match std::fs::File::create(&log_file_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: cannot create log file {log_file_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let stderr_file = match log_file_handle.try_clone() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: cannot clone log file handle: {e}");
            return ExitCode::FAILURE;
        }
    };
    cmd.stdout(std::process::Stdio::from(log_file_handle));
    cmd.stderr(std::process::Stdio::from(stderr_file));
    cmd.stdin(std::process::Stdio::null());

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to start daemon: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pid = child.id();

    // Wait for control socket to become available
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let sock = std::path::Path::new(&sock_path);
        if sock.exists() {
            #[cfg(unix)]
            if std::os::unix::net::UnixStream::connect(sock).is_ok() {
                // Verify healthy via status
                if let Ok(status) = control::client_status(&sock_path) {
                    if status.running {
                        println!("depot running, PID {pid}");
                        return ExitCode::SUCCESS;
                    }
                }
            }
        }
        if std::time::Instant::now() > deadline {
            eprintln!("error: daemon failed to start within timeout");
            return ExitCode::FAILURE;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

fn run_down(control_socket: Option<&str>) -> ExitCode {
    let sock_path = resolve_control_socket(control_socket);

    // Try to get status first
    let status = match control::client_status(&sock_path) {
        Ok(s) => s,
        Err(_) => {
            eprintln!("depot is not running");
            return ExitCode::FAILURE;
        }
    };

    if !status.running {
        eprintln!("depot is not running");
        return ExitCode::FAILURE;
    }

    let pid = status.pid;

    // Send shutdown
    if let Err(e) = control::client_shutdown(&sock_path) {
        eprintln!("error: shutdown request failed: {e}");
        return ExitCode::FAILURE;
    }

    // Wait for process to exit
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        // Check if process is still alive
        #[cfg(unix)]
        {
            let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
            if !alive {
                println!("depot stopped");
                return ExitCode::SUCCESS;
            }
        }
        #[cfg(not(unix))]
        {
            println!("depot stopped");
            return ExitCode::SUCCESS;
        }
        if std::time::Instant::now() > deadline {
            eprintln!("warning: daemon did not exit within timeout");
            return ExitCode::FAILURE;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
}

fn run_status(json: bool, control_socket: Option<&str>) -> ExitCode {
    let sock_path = resolve_control_socket(control_socket);

    match control::client_status(&sock_path) {
        Ok(status) if status.running => {
            if json {
                println!("{}", serde_json::to_string_pretty(&status).unwrap());
            } else {
                println!("depot is running");
                println!("  PID:      {}", status.pid);
                let uptime = status.uptime_secs;
                if uptime >= 3600 {
                    println!("  Uptime:   {}h {}m", uptime / 3600, (uptime % 3600) / 60);
                } else if uptime >= 60 {
                    println!("  Uptime:   {}m {}s", uptime / 60, uptime % 60);
                } else {
                    println!("  Uptime:   {}s", uptime);
                }
                println!("  Root:     {}", status.root);
                println!("  Listen:   {}", status.listen);
                println!("  Cached:   {} records", status.cached_records);
                println!("  Version:  {}", status.version);
            }
            ExitCode::SUCCESS
        }
        _ => {
            if json {
                println!("{{\"running\":false}}");
            } else {
                eprintln!("depot is not running");
            }
            ExitCode::FAILURE
        }
    }
}

fn run_logs(level: &str, json: bool, control_socket: Option<&str>) -> ExitCode {
    let sock_path = resolve_control_socket(control_socket);

    if control::client_status(&sock_path).is_err() {
        eprintln!("no depot daemon running. Start one with `depot up`.");
        return ExitCode::FAILURE;
    }

    if let Err(e) = control::client_logs(&sock_path, level, json) {
        // Connection closed = server shut down, not an error
        let msg = format!("{e}");
        if msg.contains("broken pipe")
            || msg.contains("connection reset")
            || msg.contains("end of file")
            || msg.contains("Connection reset")
        {
            return ExitCode::SUCCESS;
        }
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
