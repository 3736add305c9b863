use std::convert::Infallible;

use facematch_core::{EnrolledRecord, RecordSet, RecordStore};

/// Insertion-ordered in-memory store.
///
/// `list_records` clones, so every resolution sees its own snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<EnrolledRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, identity: &str) -> Option<usize> {
        self.records.iter().position(|r| r.identity == identity)
    }
}

impl FromIterator<EnrolledRecord> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = EnrolledRecord>>(iter: I) -> Self {
        let mut store = MemoryStore::new();
        for record in iter {
            let _ = store.put(record);
        }
        store
    }
}

impl RecordStore for MemoryStore {
    type Error = Infallible;

    fn list_records(&self) -> Result<RecordSet, Infallible> {
        Ok(RecordSet::from(self.records.clone()))
    }

    fn exists(&self, identity: &str) -> Result<bool, Infallible> {
        Ok(self.position(identity).is_some())
    }

    fn get(&self, identity: &str) -> Result<Option<EnrolledRecord>, Infallible> {
        Ok(self.position(identity).map(|i| self.records[i].clone()))
    }

    /// Replacing an identity keeps its original position.
    fn put(&mut self, record: EnrolledRecord) -> Result<(), Infallible> {
        match self.position(&record.identity) {
            Some(i) => self.records[i] = record,
            None => self.records.push(record),
        }
        Ok(())
    }

    fn remove(&mut self, identity: &str) -> Result<bool, Infallible> {
        Ok(match self.position(identity) {
            Some(i) => {
                self.records.remove(i);
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::{resolve, Embedding, Metric};
    use serde_json::Value;

    fn record(identity: &str, values: Vec<f32>) -> EnrolledRecord {
        EnrolledRecord::new(identity, Embedding::new(values), Value::Null)
    }

    #[test]
    fn test_insertion_order_and_upsert() {
        let mut store: MemoryStore = [
            record("bob", vec![10.0, 10.0, 10.0]),
            record("alice", vec![0.0, 0.0, 0.0]),
        ]
        .into_iter()
        .collect();
        store.put(record("bob", vec![1.0, 1.0, 1.0])).unwrap();

        let ids: Vec<String> = store
            .list_records()
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(ids, vec!["bob", "alice"]);
        assert_eq!(store.get("bob").unwrap().unwrap().embedding.values, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_writes() {
        let mut store = MemoryStore::new();
        store.put(record("alice", vec![0.0, 0.0])).unwrap();
        let snapshot = store.list_records().unwrap();
        store.remove("alice").unwrap();

        let res = resolve(&Embedding::new(vec![0.0, 0.0]), &snapshot, Metric::Euclidean, 0.5);
        assert_eq!(res.result.identity.as_deref(), Some("alice"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_missing() {
        let mut store = MemoryStore::new();
        assert!(!store.remove("ghost").unwrap());
        assert!(store.get("ghost").unwrap().is_none());
    }
}
