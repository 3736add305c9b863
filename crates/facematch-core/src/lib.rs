//! facematch-core — Face identity matching.
//!
//! Compares face embeddings under a selectable metric and resolves a query
//! embedding against a snapshot of enrolled records. Embedding extraction
//! and persistence are collaborators, described here only as traits.

pub mod auth;
pub mod extractor;
pub mod matcher;
pub mod resolver;
pub mod store;
pub mod types;

pub use extractor::{EmbeddingExtractor, ExtractorBackend, ImageInput};
pub use matcher::{distance, is_match, MatchError};
pub use resolver::{resolve, Anomaly, MatchPolicy, RecordSet, Resolution, Resolver};
pub use store::RecordStore;
pub use types::{Embedding, EnrolledRecord, FaceRegion, MatchResult, Metric, SecurityTier};
