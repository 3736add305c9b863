//! SQLite store. Embeddings are stored as little-endian f32 blobs.

use std::path::Path;

use chrono::{DateTime, Utc};
use facematch_core::{Anomaly, Embedding, EnrolledRecord, RecordSet, RecordStore};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{embedding_from_bytes, embedding_to_bytes, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    identity    TEXT NOT NULL UNIQUE,
    embedding   BLOB NOT NULL,
    created_at  TEXT NOT NULL,
    metadata    TEXT NOT NULL DEFAULT 'null'
);
";

/// Raw row, decoded lazily so one bad row cannot fail a whole listing.
struct RawRecord {
    identity: String,
    embedding: Vec<u8>,
    created_at: String,
    metadata: String,
}

impl RawRecord {
    fn decode(self) -> Result<EnrolledRecord, (String, String)> {
        let fail = |identity: &str, reason: String| (identity.to_string(), reason);

        let values = embedding_from_bytes(&self.embedding).map_err(|r| fail(&self.identity, r))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| fail(&self.identity, format!("created_at '{}': {e}", self.created_at)))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| fail(&self.identity, format!("metadata: {e}")))?;

        Ok(EnrolledRecord {
            identity: self.identity,
            embedding: Embedding::new(values),
            created_at,
            metadata,
        })
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn query_rows(&self, identity: Option<&str>) -> Result<Vec<RawRecord>, StoreError> {
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<RawRecord> {
            Ok(RawRecord {
                identity: row.get(0)?,
                embedding: row.get(1)?,
                created_at: row.get(2)?,
                metadata: row.get(3)?,
            })
        };

        let rows = match identity {
            Some(id) => {
                let mut stmt = self.conn.prepare(
                    "SELECT identity, embedding, created_at, metadata FROM records WHERE identity = ?1",
                )?;
                let rows = stmt.query_map(params![id], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT identity, embedding, created_at, metadata FROM records ORDER BY seq",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }
}

impl RecordStore for SqliteStore {
    type Error = StoreError;

    /// Records in enrollment order.
    fn list_records(&self) -> Result<RecordSet, StoreError> {
        let mut set = RecordSet::default();
        for row in self.query_rows(None)? {
            match row.decode() {
                Ok(record) => set.records.push(record),
                Err((identity, reason)) => set.unreadable.push(Anomaly::Unreadable { identity, reason }),
            }
        }
        Ok(set)
    }

    fn exists(&self, identity: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE identity = ?1",
                params![identity],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, identity: &str) -> Result<Option<EnrolledRecord>, StoreError> {
        self.query_rows(Some(identity))?
            .into_iter()
            .next()
            .map(|row| {
                row.decode()
                    .map_err(|(identity, reason)| StoreError::UnreadableRecord { identity, reason })
            })
            .transpose()
    }

    /// Upsert. A replaced identity keeps its place in the listing order.
    fn put(&mut self, record: EnrolledRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO records (identity, embedding, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identity) DO UPDATE SET
                embedding = excluded.embedding,
                created_at = excluded.created_at,
                metadata = excluded.metadata",
            params![
                record.identity,
                embedding_to_bytes(record.embedding.as_slice()),
                record.created_at.to_rfc3339(),
                serde_json::to_string(&record.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn remove(&mut self, identity: &str) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM records WHERE identity = ?1", params![identity])?;
        Ok(n > 0)
    }
}
