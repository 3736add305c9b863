//! Record store contract consumed by the resolver and the auth flows.

use crate::resolver::RecordSet;
use crate::types::EnrolledRecord;

/// Persistent collection of enrolled records, keyed by identity.
pub trait RecordStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Snapshot of every record, in a stable order.
    fn list_records(&self) -> Result<RecordSet, Self::Error>;

    fn exists(&self, identity: &str) -> Result<bool, Self::Error>;

    fn get(&self, identity: &str) -> Result<Option<EnrolledRecord>, Self::Error>;

    /// Insert or replace the record for `record.identity`.
    fn put(&mut self, record: EnrolledRecord) -> Result<(), Self::Error>;

    /// Returns whether a record was removed.
    fn remove(&mut self, identity: &str) -> Result<bool, Self::Error>;
}
