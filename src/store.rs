//! Key/value storage for cached asset records.
//!
//! The transfer protocol only needs point reads and point writes keyed by
//! `collection/key`, with access-control metadata attached at write time.
//! `FileKvStore` is the production backend (one file per key); `MemoryKvStore`
//! backs unit tests.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Read access attached to a stored entry. Values mirror the dispatch host's
/// storage ACL numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPermission {
    NoRead,
    OwnerRead,
    PublicRead,
}

impl ReadPermission {
    pub fn as_u8(self) -> u8 {
        match self {
            ReadPermission::NoRead => 0,
            ReadPermission::OwnerRead => 1,
            ReadPermission::PublicRead => 2,
        }
    }
}

/// Write access attached to a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePermission {
    NoWrite,
    OwnerWrite,
}

impl WritePermission {
    pub fn as_u8(self) -> u8 {
        match self {
            WritePermission::NoWrite => 0,
            WritePermission::OwnerWrite => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid storage segment {segment:?}")]
    InvalidSegment { segment: String },

    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt storage entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable point read / point write storage.
///
/// Permissions are metadata recorded with the entry; this server is the sole
/// owner of its records, so reads are not filtered by them here. A single
/// write either fully succeeds or fully fails; overwrite behavior for an
/// existing key is implementation-defined.
pub trait KvStore: Send + Sync {
    fn read(&self, collection: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn write(
        &self,
        collection: &str,
        key: &str,
        value: &str,
        read: ReadPermission,
        write: WritePermission,
    ) -> Result<(), StoreError>;
}

// ─── File-backed store ────────────────────────────────────────────────────────

/// On-disk entry envelope: the value plus its ACL metadata.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    read: u8,
    write: u8,
}

/// File-per-key store rooted at a data directory, one subdirectory per
/// collection. Writes are ignore-if-present: the first writer of a key wins
/// and later writes are no-ops, which is safe for content-addressed records
/// where every writer of a key carries the same value.
pub struct FileKvStore {
    data_dir: PathBuf,
}

impl FileKvStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn entry_path(&self, collection: &str, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .data_dir
            .join(checked_segment(collection)?)
            .join(checked_segment(key)?))
    }
}

/// Reject segments that would escape the data directory.
fn checked_segment(segment: &str) -> Result<&str, StoreError> {
    let plain = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if plain {
        Ok(segment)
    } else {
        Err(StoreError::InvalidSegment {
            segment: segment.to_string(),
        })
    }
}

impl KvStore for FileKvStore {
    fn read(&self, collection: &str, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.entry_path(collection, key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: StoredEntry = serde_json::from_slice(&bytes)?;
        Ok(Some(entry.value))
    }

    fn write(
        &self,
        collection: &str,
        key: &str,
        value: &str,
        read: ReadPermission,
        write: WritePermission,
    ) -> Result<(), StoreError> {
        let path = self.entry_path(collection, key)?;
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = StoredEntry {
            value: value.to_string(),
            read: read.as_u8(),
            write: write.as_u8(),
        };
        fs::write(&path, serde_json::to_vec_pretty(&entry)?)?;
        Ok(())
    }
}

// ─── In-memory store (tests) ──────────────────────────────────────────────────

/// HashMap-backed store for unit tests. Tracks write calls so tests can
/// assert the protocol's no-write paths.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<(String, String), String>>,
    writes: Mutex<u64>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap()
    }

    /// Seed an entry directly, bypassing the write counter.
    pub fn seed(&self, collection: &str, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert((collection.to_string(), key.to_string()), value.to_string());
    }
}

impl KvStore for MemoryKvStore {
    fn read(&self, collection: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn write(
        &self,
        collection: &str,
        key: &str,
        value: &str,
        _read: ReadPermission,
        _write: WritePermission,
    ) -> Result<(), StoreError> {
        *self.writes.lock().unwrap() += 1;
        self.entries
            .lock()
            .unwrap()
            .insert((collection.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
