//! transfer_file — resolve a named, versioned asset through the write-once
//! content cache, falling back to the on-disk asset tree.
//!
//! A client states what it already has via an optional digest. On a match
//! (or no digest) the content is included; otherwise only the authoritative
//! digest comes back, so an up-to-date client never re-downloads bytes.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::assets::AssetTree;
use crate::dispatch::{CallContext, RpcHandler};
use crate::error::RpcError;
use crate::store::{KvStore, ReadPermission, WritePermission};

pub const RPC_TRANSFER_FILE: &str = "transfer_file";

const FILESTORAGE_COLLECTION: &str = "filestorage";
const DEFAULT_TYPE: &str = "core";
const DEFAULT_VERSION: &str = "1.0.0";

// No path separators or whitespace — type/version become asset tree paths.
static VALID_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static VALID_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

// ─── Wire types ───────────────────────────────────────────────────────────────

/// Parsed transfer_file payload. `hash` absent, null, or `""` all mean the
/// client states no digest.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "type", default)]
    pub asset_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub hash: Option<String>,
}

impl TransferRequest {
    fn apply_defaults(&mut self) {
        if self.asset_type.is_empty() {
            self.asset_type = DEFAULT_TYPE.to_string();
        }
        if self.version.is_empty() {
            self.version = DEFAULT_VERSION.to_string();
        }
    }

    /// Check both fields and report every violation, not just the first.
    fn validate(&self) -> Result<(), RpcError> {
        let mut violations = Vec::new();
        if !VALID_TYPE.is_match(&self.asset_type) {
            violations.push("invalid type field in request".to_string());
        }
        if !VALID_VERSION.is_match(&self.version) {
            violations.push("invalid version field in request".to_string());
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RpcError::ValidationFailed { violations })
        }
    }

    /// Whether the resolved content should be sent back (and, on a cache
    /// miss, written through).
    fn wants_content(&self, resolved_hash: &str) -> bool {
        match self.hash.as_deref() {
            None | Some("") => true,
            Some(stated) => stated == resolved_hash,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    #[serde(rename = "type")]
    pub asset_type: String,
    pub version: String,
    pub hash: String,
    /// `null` on the wire when the client's stated digest is already current.
    pub content: Option<Value>,
}

/// Cached record persisted under `"{type}-{version}"`. Write-once: an
/// existing record is authoritative forever.
#[derive(Debug, Serialize, Deserialize)]
struct StorageRecord {
    #[serde(rename = "type")]
    asset_type: String,
    version: String,
    hash: String,
    content: Value,
}

// ─── Handler ──────────────────────────────────────────────────────────────────

/// Resolution engine for transfer_file calls.
pub struct TransferHandler {
    store: Arc<dyn KvStore>,
    assets: Arc<AssetTree>,
}

impl TransferHandler {
    pub fn new(store: Arc<dyn KvStore>, assets: Arc<AssetTree>) -> Self {
        Self { store, assets }
    }

    fn resolve(&self, request: &TransferRequest) -> Result<String, RpcError> {
        let key = format!("{}-{}", request.asset_type, request.version);

        // Fast path: cached record. No disk access, no write.
        if let Some(record) = self.read_record(&key)? {
            let include = request.wants_content(&record.hash);
            let response = TransferResponse {
                asset_type: request.asset_type.clone(),
                version: request.version.clone(),
                hash: record.hash,
                content: include.then_some(record.content),
            };
            return marshal(&response);
        }

        // Cache miss: the asset tree is the source of truth.
        let rel_path = format!("{}/{}.json", request.asset_type, request.version);
        let bytes = self.assets.read_file(&rel_path).map_err(|err| {
            tracing::error!(key = %key, path = %rel_path, error = %err, "asset read failed");
            RpcError::FileNotFound
        })?;

        // Digest the raw bytes before any parsing; the hash is the identity
        // of the file exactly as stored on disk.
        let hash = hex::encode(Sha256::digest(&bytes));

        let mut response = TransferResponse {
            asset_type: request.asset_type.clone(),
            version: request.version.clone(),
            hash,
            content: None,
        };

        // An unrecognized digest never populates the cache.
        if request.wants_content(&response.hash) {
            let content: Value = serde_json::from_slice(&bytes).map_err(|err| {
                tracing::error!(key = %key, error = %err, "asset file is not valid JSON");
                RpcError::Unmarshal
            })?;
            self.write_record(
                &key,
                &StorageRecord {
                    asset_type: request.asset_type.clone(),
                    version: request.version.clone(),
                    hash: response.hash.clone(),
                    content: content.clone(),
                },
            )?;
            response.content = Some(content);
        }

        marshal(&response)
    }

    fn read_record(&self, key: &str) -> Result<Option<StorageRecord>, RpcError> {
        let value = self
            .store
            .read(FILESTORAGE_COLLECTION, key)
            .map_err(|err| {
                tracing::error!(key = %key, error = %err, "storage read failed");
                RpcError::StoreRead
            })?;
        match value {
            None => Ok(None),
            Some(raw) => {
                let record = serde_json::from_str(&raw).map_err(|err| {
                    tracing::error!(key = %key, error = %err, "stored record is not valid JSON");
                    RpcError::Unmarshal
                })?;
                Ok(Some(record))
            }
        }
    }

    fn write_record(&self, key: &str, record: &StorageRecord) -> Result<(), RpcError> {
        let value = serde_json::to_string(record).map_err(|_| RpcError::Marshal)?;
        self.store
            .write(
                FILESTORAGE_COLLECTION,
                key,
                &value,
                ReadPermission::OwnerRead,
                WritePermission::OwnerWrite,
            )
            .map_err(|err| {
                tracing::error!(key = %key, error = %err, "storage write failed");
                RpcError::StoreWrite
            })
    }
}

fn marshal(response: &TransferResponse) -> Result<String, RpcError> {
    serde_json::to_string(response).map_err(|_| RpcError::Marshal)
}

#[async_trait]
impl RpcHandler for TransferHandler {
    async fn handle(&self, ctx: &CallContext, payload: &str) -> Result<String, RpcError> {
        // Service-to-service endpoint: an authenticated end user must not
        // reach it through any front end.
        if let Some(user_id) = ctx.user_id.as_deref() {
            if !user_id.is_empty() {
                tracing::error!(user_id, "transfer_file called by an authenticated user");
                return Err(RpcError::IdentityNotAllowed);
            }
        }

        let mut request: TransferRequest = serde_json::from_str(payload).map_err(|err| {
            tracing::error!(error = %err, "malformed transfer_file payload");
            RpcError::Unmarshal
        })?;
        request.apply_defaults();
        request.validate()?;

        self.resolve(&request)
    }
}
