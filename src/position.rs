// logtrail - position.rs
//
// Position: the resumption token carried by every Row and recovered from a
// segment's tail on restart.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fnv;
use crate::util::error::CoreError;

/// Identifies a tailed file, a read offset within it, and a fingerprint of
/// its first bytes used to detect identity change across a restart.
///
/// Invariant: if `head_hash_length > 0`, `head_hash` must equal the FNV-1
/// hash of the first `head_hash_length` bytes of `source_name` for `offset`
/// to be trustworthy; see `verify_head_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "n")]
    pub source_name: String,
    #[serde(rename = "ct")]
    pub source_created_at: DateTime<Utc>,
    #[serde(rename = "o")]
    pub offset: u64,
    #[serde(rename = "h")]
    pub head_hash: String,
    #[serde(rename = "hl")]
    pub head_hash_length: u64,
}

impl Position {
    /// A fresh Position with no offset and no head hash: the header row of a
    /// newly created segment, or the synthesised starting point when no
    /// prior state exists.
    pub fn empty(source_name: impl Into<String>, source_created_at: DateTime<Utc>) -> Self {
        Self {
            source_name: source_name.into(),
            source_created_at,
            offset: 0,
            head_hash: String::new(),
            head_hash_length: 0,
        }
    }

    /// Re-hash the first `head_hash_length` bytes of `path` and compare
    /// against the stored `head_hash`. `Ok(true)` means the file's identity
    /// is unchanged and `offset` can still be trusted; `Ok(false)` means the
    /// file has no recorded head hash, or it no longer matches.
    pub fn verify_head_hash(&self, path: &Path) -> Result<bool, CoreError> {
        if self.head_hash_length == 0 {
            return Ok(false);
        }
        let mut file = File::open(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            operation: "open for head-hash verification",
            source,
        })?;
        let mut buf = vec![0u8; self.head_hash_length as usize];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(fnv::fnv1_64_hex(&buf) == self.head_hash),
            // The file shrank below the hashed prefix: identity changed.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(source) => Err(CoreError::Io {
                path: path.to_path_buf(),
                operation: "read head-hash bytes",
                source,
            }),
        }
    }
}

/// Incremental FNV-1 64-bit accumulator over the first `max_len` bytes of a
/// file, fed as the tail engine emits new lines. FNV-1 folds left to right
/// over its input, so feeding bytes across several calls produces the same
/// digest as hashing the whole prefix at once, provided no bytes are skipped
/// or reordered.
#[derive(Debug, Clone)]
pub struct HeadHasher {
    hash: u64,
    len: u64,
    max_len: u64,
}

impl HeadHasher {
    pub fn new(max_len: u64) -> Self {
        Self {
            hash: fnv::FNV64_INIT,
            len: 0,
            max_len,
        }
    }

    /// Read up to `max_len` bytes from the start of `path` and seed the
    /// accumulator from them. Used when a `NewFile` event arrives and the
    /// head hash must be recomputed against the newly opened file.
    pub fn from_file(path: &Path, max_len: u64) -> Result<Self, CoreError> {
        let mut hasher = Self::new(max_len);
        if max_len == 0 {
            return Ok(hasher);
        }
        let mut file = File::open(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            operation: "open for head-hash seeding",
            source,
        })?;
        let mut buf = vec![0u8; max_len as usize];
        let mut total = 0usize;
        loop {
            let n = file.read(&mut buf[total..]).map_err(|source| CoreError::Io {
                path: path.to_path_buf(),
                operation: "read head-hash bytes",
                source,
            })?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        hasher.update(&buf[..total]);
        Ok(hasher)
    }

    /// Fold additional bytes into the running hash, truncated so the total
    /// number of bytes hashed never exceeds `max_len`. A no-op once full.
    pub fn update(&mut self, bytes: &[u8]) {
        if self.len >= self.max_len {
            return;
        }
        let remaining = (self.max_len - self.len) as usize;
        let take = remaining.min(bytes.len());
        for &byte in &bytes[..take] {
            self.hash = fnv::fnv1_64_step(self.hash, byte);
        }
        self.len += take as u64;
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.max_len
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The digest so far, as lowercase hex, matching `Position.head_hash`'s
    /// on-disk representation.
    pub fn hex(&self) -> String {
        format!("{:016x}", self.hash)
    }
}
