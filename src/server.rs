//! depot serve — TCP line-protocol server for asset transfer RPCs.
//!
//! Assets are served from an immutable tree rooted at `--root`; resolved
//! records are cached write-once under `<root>/.depot/storage`. Each
//! connection carries any number of request lines; each line is an
//! independent call.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::assets::AssetTree;
use crate::control::{self, ControlState};
use crate::dispatch::{Dispatcher, RpcRequest, RpcResponse};
use crate::error::RpcError;
use crate::logging;
use crate::store::FileKvStore;
use crate::transfer::{TransferHandler, RPC_TRANSFER_FILE};

const LOG_CHANNEL_CAPACITY: usize = 1024;

pub struct ServeOptions {
    pub listen_addr: String,
    pub root: String,
    pub log_level: String,
    pub log_format: String,
    pub control_socket: Option<String>,
    pub daemon: bool,
    pub log_file: Option<String>,
}

// ─── Public entry point ───────────────────────────────────────────────────────

pub async fn run_serve(opts: ServeOptions) -> Result<()> {
    let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    logging::init_tracing(&opts.log_level, &opts.log_format, log_tx.clone())?;

    if opts.daemon {
        tracing::info!(log_file = ?opts.log_file, "running as daemon");
    }

    let assets = Arc::new(AssetTree::open(&opts.root)?);
    let storage_dir = assets.root().join(".depot").join("storage");
    let store = Arc::new(FileKvStore::open(&storage_dir).context("open record store")?);

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        RPC_TRANSFER_FILE,
        Arc::new(TransferHandler::new(store, assets.clone())),
    );
    let dispatcher = Arc::new(dispatcher);

    let listener = tokio::net::TcpListener::bind(&opts.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", opts.listen_addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(listen = %local_addr, root = %assets.root().display(), "depot server listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    if let Some(socket_path) = opts.control_socket.clone() {
        let state = Arc::new(ControlState {
            pid: std::process::id(),
            start_time: Instant::now(),
            root: assets.root().display().to_string(),
            listen: local_addr.to_string(),
            storage_dir,
            shutdown_tx: shutdown_tx.clone(),
            log_tx,
        });
        tokio::spawn(async move {
            if let Err(err) = control::run_control_socket(socket_path, state).await {
                tracing::warn!("control socket error: {err:#}");
            }
        });
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(dispatcher, stream).await {
                        tracing::warn!(peer = %peer, "connection error: {err:#}");
                    }
                });
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown requested via control socket");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    if let Some(socket_path) = &opts.control_socket {
        let _ = std::fs::remove_file(socket_path);
    }

    Ok(())
}

// ─── Connection handler ───────────────────────────────────────────────────────

async fn handle_connection(dispatcher: Arc<Dispatcher>, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => dispatcher.dispatch(&request).await,
            Err(err) => {
                tracing::warn!(error = %err, "invalid request envelope");
                RpcResponse::failure(&RpcError::Unmarshal)
            }
        };

        let json = serde_json::to_string(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}
