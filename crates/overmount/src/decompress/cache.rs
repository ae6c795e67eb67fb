//! Content-addressed cache for decompressed artifacts
//!
//! The cache is a single JSON document keyed by decompressed file path. An
//! entry vouches for a file only while the on-disk size and SHA-256 still
//! match; anything else (including a Git-LFS pointer left behind by a sync
//! job) makes the entry stale and forces re-decompression.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// Files starting with this prefix are Git-LFS pointers, not payload data.
const GIT_LFS_POINTER_HEADER: &[u8] = b"version https://git-lfs.github.com/spec/";

/// State recorded for one decompressed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The `.bz2` file or parts folder this artifact came from.
    pub original_path: PathBuf,
    /// The artifact itself.
    pub decompressed_path: PathBuf,
    /// Hex SHA-256 of the decompressed content.
    pub sha256: String,
    /// Size of the decompressed file in bytes.
    pub size: u64,
    /// Unix seconds of the last decompression.
    pub timestamp: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    entries: BTreeMap<PathBuf, CacheEntry>,
}

/// Why a cached artifact must be decompressed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The artifact is not on disk.
    Missing,
    /// The artifact has no cache entry.
    NotCached,
    /// The artifact's content is a Git-LFS pointer.
    LfsPointer,
    /// On-disk size differs from the recorded size.
    SizeMismatch {
        /// Size recorded in the cache.
        cached: u64,
        /// Size currently on disk.
        actual: u64,
    },
    /// On-disk content hashes differently than recorded.
    HashMismatch,
    /// The artifact could not be inspected.
    Unreadable,
}

impl StaleReason {
    /// Whether the artifact was previously decompressed and has since been
    /// clobbered, as opposed to never having been produced.
    #[must_use]
    pub fn is_overwrite(&self) -> bool {
        !matches!(self, Self::Missing | Self::NotCached)
    }
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "file does not exist"),
            Self::NotCached => write!(f, "not in cache"),
            Self::LfsPointer => write!(f, "git-lfs pointer detected"),
            Self::SizeMismatch { cached, actual } => {
                write!(f, "size mismatch (cached: {cached}, actual: {actual})")
            }
            Self::HashMismatch => write!(f, "content hash changed"),
            Self::Unreadable => write!(f, "file cannot be inspected"),
        }
    }
}

/// The persisted decompression cache.
#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    doc: CacheDocument,
}

impl Cache {
    /// Load the cache document at `path`. A missing file is an empty cache;
    /// an unreadable or unparsable one is logged and treated as empty.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let doc = match fs::read(path) {
            Ok(raw) => match serde_json::from_slice::<CacheDocument>(&raw) {
                Ok(doc) => {
                    debug!(entries = doc.entries.len(), cache = %path.display(), "loaded cache");
                    doc
                }
                Err(e) => {
                    warn!(cache = %path.display(), error = %e, "cache unreadable, starting fresh");
                    CacheDocument::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => CacheDocument::default(),
            Err(e) => {
                warn!(cache = %path.display(), error = %e, "cache unreadable, starting fresh");
                CacheDocument::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            doc,
        }
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }

    /// Look up the entry for a decompressed path.
    #[must_use]
    pub fn entry(&self, decompressed: &Path) -> Option<&CacheEntry> {
        self.doc.entries.get(decompressed)
    }

    /// Judge whether `decompressed` is authoritative. `None` means fresh.
    #[must_use]
    pub fn staleness(&self, decompressed: &Path) -> Option<StaleReason> {
        let meta = match fs::metadata(decompressed) {
            Ok(meta) if meta.is_file() => meta,
            // A directory at the artifact path (a `.bsp`-named parts folder
            // not yet assembled) means the artifact was never produced.
            Ok(_) => return Some(StaleReason::Missing),
            Err(e) if e.kind() == ErrorKind::NotFound => return Some(StaleReason::Missing),
            Err(e) => {
                warn!(path = %decompressed.display(), error = %e, "stat failed");
                return Some(StaleReason::Unreadable);
            }
        };

        match is_lfs_pointer(decompressed) {
            Ok(true) => return Some(StaleReason::LfsPointer),
            Ok(false) => {}
            Err(e) => {
                warn!(path = %decompressed.display(), error = %e, "pointer check failed");
                return Some(StaleReason::Unreadable);
            }
        }

        let Some(entry) = self.doc.entries.get(decompressed) else {
            return Some(StaleReason::NotCached);
        };
        if entry.size != meta.len() {
            return Some(StaleReason::SizeMismatch {
                cached: entry.size,
                actual: meta.len(),
            });
        }
        match sha256_hex(decompressed) {
            Ok(actual) if actual == entry.sha256 => None,
            Ok(_) => Some(StaleReason::HashMismatch),
            Err(e) => {
                warn!(path = %decompressed.display(), error = %e, "hash failed");
                Some(StaleReason::Unreadable)
            }
        }
    }

    /// Record a freshly decompressed artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be stat'ed or hashed.
    pub fn record(&mut self, original: &Path, decompressed: &Path) -> Result<()> {
        let meta = fs::metadata(decompressed)
            .with_context(|| format!("stat {}", decompressed.display()))?;
        let sha256 = sha256_hex(decompressed)?;
        self.doc.entries.insert(
            decompressed.to_path_buf(),
            CacheEntry {
                original_path: original.to_path_buf(),
                decompressed_path: decompressed.to_path_buf(),
                sha256,
                size: meta.len(),
                timestamp: unix_now(),
            },
        );
        Ok(())
    }

    /// Persist the document, creating the parent directory if absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or file cannot be written.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create cache directory {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(&self.doc).context("serialize cache")?;
        fs::write(&self.path, data)
            .with_context(|| format!("write cache {}", self.path.display()))?;
        debug!(entries = self.doc.entries.len(), cache = %self.path.display(), "saved cache");
        Ok(())
    }
}

/// Whether the file's leading bytes are a Git-LFS pointer header.
pub fn is_lfs_pointer(path: &Path) -> Result<bool> {
    let mut file =
        File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut buf = [0u8; 200];
    let mut filled = 0;
    // A pointer file can be shorter than the buffer; read until EOF or full.
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].starts_with(GIT_LFS_POINTER_HEADER))
}

/// Hex-encoded streaming SHA-256 of a file.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut buffer)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
