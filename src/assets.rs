//! Read-only asset tree — the immutable on-disk source of truth.
//!
//! The root is resolved once at startup and handed to whoever needs it; there
//! is no ambient global handle.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Handle to the asset tree root. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct AssetTree {
    root: PathBuf,
}

impl AssetTree {
    /// Resolve `root` to a canonical directory path. Fails if the directory
    /// does not exist — serving from a missing tree is a deployment error.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = dunce::canonicalize(root)
            .with_context(|| format!("cannot resolve asset root {}", root.display()))?;
        if !root.is_dir() {
            bail!("asset root {} is not a directory", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the bytes of one file under the root.
    pub fn read_file(&self, rel_path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.root.join(rel_path))
    }
}
