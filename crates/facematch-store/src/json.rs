//! JSON file store.
//!
//! One object keyed by identity:
//!
//! ```json
//! {
//!   "alice": {
//!     "face_encoding": [0.01, -0.2, ...],
//!     "image_path": "data/images/alice_20240101_120000.jpg",
//!     "created_at": "2024-01-01T12:00:00.123456"
//!   }
//! }
//! ```
//!
//! Keys other than `face_encoding` and `created_at` are carried as record
//! metadata. Metadata that is not a plain object of keys is nested under a
//! single `metadata` key. Entries that fail to decode are kept on disk
//! untouched and reported as unreadable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use facematch_core::{Anomaly, Embedding, EnrolledRecord, RecordSet, RecordStore};
use serde_json::{Map, Value};

use crate::StoreError;

const FACE_ENCODING_KEY: &str = "face_encoding";
const CREATED_AT_KEY: &str = "created_at";
const METADATA_KEY: &str = "metadata";
/// Naive ISO 8601, as written without a UTC offset.
const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = load(&path)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "JSON store loaded");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, discarding the cached entries.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.entries = load(&self.path)?;
        Ok(())
    }

    /// Write atomically: temp file in the same directory, then rename.
    fn save(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<BTreeMap<String, Value>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(_) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "top-level value is not an object".into(),
        }),
        Err(e) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

fn decode_entry(identity: &str, value: &Value) -> Result<EnrolledRecord, String> {
    let Value::Object(fields) = value else {
        return Err("entry is not a JSON object".into());
    };
    let mut fields = fields.clone();

    let values: Vec<f32> = match fields.remove(FACE_ENCODING_KEY) {
        None | Some(Value::Null) => return Err(format!("{FACE_ENCODING_KEY} is missing")),
        Some(v) => serde_json::from_value(v).map_err(|e| format!("{FACE_ENCODING_KEY}: {e}"))?,
    };

    let created_at = match fields.remove(CREATED_AT_KEY) {
        None | Some(Value::Null) => {
            tracing::warn!(identity, "entry has no {CREATED_AT_KEY}, using the Unix epoch");
            DateTime::<Utc>::default()
        }
        Some(Value::String(s)) => {
            parse_timestamp(&s).ok_or_else(|| format!("{CREATED_AT_KEY} '{s}' is not a timestamp"))?
        }
        Some(other) => return Err(format!("{CREATED_AT_KEY} must be a string, got {other}")),
    };

    let metadata = if fields.is_empty() {
        Value::Null
    } else if fields.len() == 1 && fields.contains_key(METADATA_KEY) {
        fields.remove(METADATA_KEY).unwrap_or(Value::Null)
    } else {
        Value::Object(fields)
    };

    Ok(EnrolledRecord {
        identity: identity.to_string(),
        embedding: Embedding::new(values),
        created_at,
        metadata,
    })
}

fn encode_entry(record: &EnrolledRecord) -> Value {
    let mut fields = match &record.metadata {
        Value::Null => Map::new(),
        Value::Object(m) if !needs_wrapping(m) => m.clone(),
        other => Map::from_iter([(METADATA_KEY.to_string(), other.clone())]),
    };
    fields.insert(
        FACE_ENCODING_KEY.to_string(),
        Value::from(record.embedding.values.clone()),
    );
    fields.insert(
        CREATED_AT_KEY.to_string(),
        Value::String(record.created_at.to_rfc3339()),
    );
    Value::Object(fields)
}

/// Objects that would read back as something else when written flat.
fn needs_wrapping(metadata: &Map<String, Value>) -> bool {
    metadata.is_empty() || (metadata.len() == 1 && metadata.contains_key(METADATA_KEY))
}

/// RFC 3339, or naive ISO 8601 read as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, NAIVE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

impl RecordStore for JsonFileStore {
    type Error = StoreError;

    /// Records in identity order.
    fn list_records(&self) -> Result<RecordSet, StoreError> {
        let mut set = RecordSet::default();
        for (identity, value) in &self.entries {
            match decode_entry(identity, value) {
                Ok(record) => set.records.push(record),
                Err(reason) => set.unreadable.push(Anomaly::Unreadable {
                    identity: identity.clone(),
                    reason,
                }),
            }
        }
        Ok(set)
    }

    fn exists(&self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(identity))
    }

    fn get(&self, identity: &str) -> Result<Option<EnrolledRecord>, StoreError> {
        self.entries
            .get(identity)
            .map(|value| {
                decode_entry(identity, value).map_err(|reason| StoreError::UnreadableRecord {
                    identity: identity.to_string(),
                    reason,
                })
            })
            .transpose()
    }

    fn put(&mut self, record: EnrolledRecord) -> Result<(), StoreError> {
        let previous = self
            .entries
            .insert(record.identity.clone(), encode_entry(&record));
        if let Err(e) = self.save() {
            // Keep the cache consistent with the file.
            match previous {
                Some(v) => self.entries.insert(record.identity, v),
                None => self.entries.remove(&record.identity),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, identity: &str) -> Result<bool, StoreError> {
        let Some(previous) = self.entries.remove(identity) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.entries.insert(identity.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }
}
