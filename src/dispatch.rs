//! RPC dispatch — newline-delimited JSON envelopes routed to named handlers.
//!
//! Protocol:
//!   Client sends one JSON line: {"rpc": "transfer_file", "payload": "<text>"}
//!   Server responds with one JSON line: {"ok": true, "payload": "<text>"}
//!   or, on failure: {"ok": false, "code": 13, "message": "..."}.
//!
//! `payload` is opaque text handed to the handler as-is; each handler owns
//! its own payload format. An authenticating front end may forward the end
//! user's identity in `user_id` — handlers decide whether to accept it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

// ─── Protocol types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub rpc: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RpcResponse {
    pub fn success(payload: String) -> Self {
        Self {
            ok: true,
            payload: Some(payload),
            code: None,
            message: None,
        }
    }

    pub fn failure(err: &RpcError) -> Self {
        Self {
            ok: false,
            payload: None,
            code: Some(err.code() as u16),
            message: Some(err.to_string()),
        }
    }
}

/// Per-call context supplied by the dispatch layer.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// End-user identity forwarded by an authenticating front end, if any.
    pub user_id: Option<String>,
}

// ─── Handler registry ─────────────────────────────────────────────────────────

#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, ctx: &CallContext, payload: &str) -> Result<String, RpcError>;
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Invoke the handler registered under `request.rpc` and fold the result
    /// into a response envelope. Handler errors become stable code+message
    /// pairs; nothing else about the failure crosses the wire.
    pub async fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let Some(handler) = self.handlers.get(&request.rpc) else {
            tracing::warn!(rpc = %request.rpc, "no handler registered");
            return RpcResponse::failure(&RpcError::UnknownRpc(request.rpc.clone()));
        };

        let ctx = CallContext {
            user_id: request.user_id.clone(),
        };
        match handler.handle(&ctx, &request.payload).await {
            Ok(payload) => RpcResponse::success(payload),
            Err(err) => {
                tracing::debug!(rpc = %request.rpc, error = %err, "rpc failed");
                RpcResponse::failure(&err)
            }
        }
    }
}
