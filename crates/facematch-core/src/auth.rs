//! Signup and login flows over an extractor, a record store and a resolver.

use thiserror::Error;

use crate::extractor::{EmbeddingExtractor, ExtractError, ExtractorBackend, ImageInput};
use crate::matcher::MatchError;
use crate::resolver::{EnrollmentConflict, PolicyError, Resolution, Resolver};
use crate::store::RecordStore;
use crate::types::{Embedding, EnrolledRecord};

#[derive(Error, Debug)]
pub enum AuthError<E: std::error::Error + 'static> {
    #[error("identity must not be blank")]
    InvalidIdentity,
    #[error("identity '{0}' is already enrolled")]
    IdentityTaken(String),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{backend} produces {expected}-dim embeddings, got {actual}")]
    UnexpectedDimension {
        backend: ExtractorBackend,
        expected: usize,
        actual: usize,
    },
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(#[from] MatchError),
    #[error(transparent)]
    DuplicateFace(#[from] EnrollmentConflict),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("extractor: {0}")]
    Extractor(#[from] ExtractError),
    #[error("record store: {0}")]
    Store(#[source] E),
}

/// Enroll `identity` from an image.
pub fn signup<X, S>(
    extractor: &mut X,
    store: &mut S,
    resolver: &Resolver,
    identity: &str,
    image: &ImageInput<'_>,
    metadata: serde_json::Value,
) -> Result<EnrolledRecord, AuthError<S::Error>>
where
    X: EmbeddingExtractor,
    S: RecordStore,
{
    check_identity(store, identity)?;
    let embedding = extract(extractor, image)?;
    enroll_embedding(store, resolver, extractor.backend(), identity, embedding, metadata)
}

/// Identify the face in an image. A non-match is `Ok`.
pub fn login<X, S>(
    extractor: &mut X,
    store: &S,
    resolver: &Resolver,
    image: &ImageInput<'_>,
) -> Result<Resolution, AuthError<S::Error>>
where
    X: EmbeddingExtractor,
    S: RecordStore,
{
    let embedding = extract(extractor, image)?;
    verify_embedding(store, resolver, extractor.backend(), &embedding, None)
}

/// Enroll an already-extracted embedding produced by `backend`.
///
/// Rejects blank or taken identities, embeddings of the wrong length for
/// `backend`, and faces already enrolled under another identity within the
/// enrollment threshold.
pub fn enroll_embedding<S: RecordStore>(
    store: &mut S,
    resolver: &Resolver,
    backend: ExtractorBackend,
    identity: &str,
    embedding: Embedding,
    metadata: serde_json::Value,
) -> Result<EnrolledRecord, AuthError<S::Error>> {
    check_identity(store, identity)?;
    check_embedding(backend, &embedding)?;

    let records = store.list_records().map_err(AuthError::Store)?;
    resolver.check_enrollment(&embedding, &records)?;

    let record = EnrolledRecord::new(identity.trim(), embedding, metadata);
    store.put(record.clone()).map_err(AuthError::Store)?;

    tracing::info!(
        identity = %record.identity,
        dim = record.embedding.dim(),
        enrolled = records.len() + 1,
        "identity enrolled"
    );
    Ok(record)
}

/// Resolve an already-extracted embedding produced by `backend` against the store.
pub fn verify_embedding<S: RecordStore>(
    store: &S,
    resolver: &Resolver,
    backend: ExtractorBackend,
    embedding: &Embedding,
    threshold: Option<f32>,
) -> Result<Resolution, AuthError<S::Error>> {
    check_embedding(backend, embedding)?;
    let records = store.list_records().map_err(AuthError::Store)?;
    let resolution = resolver.resolve(embedding, &records, threshold)?;

    match &resolution.result.identity {
        Some(identity) => tracing::info!(
            identity = %identity,
            distance = resolution.result.distance,
            confidence = resolution.result.confidence,
            "face verified"
        ),
        None => tracing::info!(%resolution, "face not recognized"),
    }
    Ok(resolution)
}

fn check_identity<S: RecordStore>(store: &S, identity: &str) -> Result<(), AuthError<S::Error>> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(AuthError::InvalidIdentity);
    }
    if store.exists(identity).map_err(AuthError::Store)? {
        return Err(AuthError::IdentityTaken(identity.to_string()));
    }
    Ok(())
}

fn extract<X, E>(extractor: &mut X, image: &ImageInput<'_>) -> Result<Embedding, AuthError<E>>
where
    X: EmbeddingExtractor,
    E: std::error::Error + 'static,
{
    let embedding = extractor
        .extract_embedding(image)?
        .ok_or(AuthError::NoFaceDetected)?;
    check_embedding(extractor.backend(), &embedding)?;
    Ok(embedding)
}

/// Valid values, and the length every embedding from `backend` has.
fn check_embedding<E>(backend: ExtractorBackend, embedding: &Embedding) -> Result<(), AuthError<E>>
where
    E: std::error::Error + 'static,
{
    embedding.validate()?;
    if embedding.dim() != backend.embedding_dim() {
        return Err(AuthError::UnexpectedDimension {
            backend,
            expected: backend.embedding_dim(),
            actual: embedding.dim(),
        });
    }
    Ok(())
}
