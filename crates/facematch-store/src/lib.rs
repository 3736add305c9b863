//! facematch-store — Record store backends.
//!
//! Every backend implements [`facematch_core::RecordStore`] and lists
//! records in a stable order so resolver tie-breaks are reproducible.

pub mod json;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use facematch_core::{EnrolledRecord, RecordSet, RecordStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("record '{identity}' is unreadable: {reason}")]
    UnreadableRecord { identity: String, reason: String },
}

/// Backend selection, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Json,
    Sqlite,
    Memory,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Json => f.write_str("json"),
            StoreKind::Sqlite => f.write_str("sqlite"),
            StoreKind::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StoreKind::Json),
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store '{other}' (expected json, sqlite or memory)")),
        }
    }
}

/// A store whose backend is chosen at runtime.
pub enum AnyStore {
    Json(JsonFileStore),
    Sqlite(SqliteStore),
    Memory(MemoryStore),
}

impl AnyStore {
    /// Open the backend `kind` at `path`. `path` is ignored for `Memory`.
    pub fn open(kind: StoreKind, path: &Path) -> Result<Self, StoreError> {
        let store = match kind {
            StoreKind::Json => AnyStore::Json(JsonFileStore::open(path)?),
            StoreKind::Sqlite => AnyStore::Sqlite(SqliteStore::open(path)?),
            StoreKind::Memory => AnyStore::Memory(MemoryStore::new()),
        };
        tracing::debug!(%kind, path = %path.display(), "record store opened");
        Ok(store)
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            AnyStore::Json(_) => StoreKind::Json,
            AnyStore::Sqlite(_) => StoreKind::Sqlite,
            AnyStore::Memory(_) => StoreKind::Memory,
        }
    }
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self {
            AnyStore::Json($s) => $call,
            AnyStore::Sqlite($s) => $call,
            AnyStore::Memory($s) => Ok(match $call {
                Ok(v) => v,
                Err(never) => match never {},
            }),
        }
    };
}

impl RecordStore for AnyStore {
    type Error = StoreError;

    fn list_records(&self) -> Result<RecordSet, StoreError> {
        delegate!(self, s => s.list_records())
    }

    fn exists(&self, identity: &str) -> Result<bool, StoreError> {
        delegate!(self, s => s.exists(identity))
    }

    fn get(&self, identity: &str) -> Result<Option<EnrolledRecord>, StoreError> {
        delegate!(self, s => s.get(identity))
    }

    fn put(&mut self, record: EnrolledRecord) -> Result<(), StoreError> {
        delegate!(self, s => s.put(record))
    }

    fn remove(&mut self, identity: &str) -> Result<bool, StoreError> {
        delegate!(self, s => s.remove(identity))
    }
}

/// Encode an embedding as little-endian f32 bytes.
pub(crate) fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes. Fails if the length is not a multiple of 4.
pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!("embedding blob of {} bytes is not a multiple of 4", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
