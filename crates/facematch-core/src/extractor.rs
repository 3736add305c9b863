//! Embedding extractor capability.
//!
//! Detection and embedding models live outside this crate. Each backend
//! is a configuration choice carrying its own dimensionality, metric and
//! default threshold; implementations of [`EmbeddingExtractor`] wrap the
//! actual model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Embedding, FaceRegion, Metric};

// --- Backend constants ---
const DLIB_EMBEDDING_DIM: usize = 128;
const INSIGHTFACE_EMBEDDING_DIM: usize = 512;
const LOOSE_THRESHOLD: f32 = 0.6;
const STRICT_THRESHOLD: f32 = 0.49;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model not available: {0}")]
    ModelUnavailable(String),
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Supported extractor backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorBackend {
    /// dlib HOG detector + ResNet encoder.
    DlibHog,
    /// dlib CNN (MMOD) detector + ResNet encoder.
    DlibCnn,
    /// HOG detection with ResNet encoding and a stricter threshold.
    Hybrid,
    /// InsightFace buffalo_l (SCRFD + ArcFace).
    InsightFace,
    /// The `face_recognition` library defaults.
    FaceRecognitionLib,
}

impl ExtractorBackend {
    pub const ALL: [ExtractorBackend; 5] = [
        ExtractorBackend::DlibHog,
        ExtractorBackend::DlibCnn,
        ExtractorBackend::Hybrid,
        ExtractorBackend::InsightFace,
        ExtractorBackend::FaceRecognitionLib,
    ];

    pub fn embedding_dim(self) -> usize {
        match self {
            ExtractorBackend::InsightFace => INSIGHTFACE_EMBEDDING_DIM,
            _ => DLIB_EMBEDDING_DIM,
        }
    }

    pub fn default_metric(self) -> Metric {
        match self {
            ExtractorBackend::InsightFace => Metric::Cosine,
            _ => Metric::Euclidean,
        }
    }

    pub fn default_threshold(self) -> f32 {
        match self {
            ExtractorBackend::DlibHog | ExtractorBackend::FaceRecognitionLib => LOOSE_THRESHOLD,
            ExtractorBackend::DlibCnn | ExtractorBackend::Hybrid | ExtractorBackend::InsightFace => {
                STRICT_THRESHOLD
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractorBackend::DlibHog => "dlib-hog",
            ExtractorBackend::DlibCnn => "dlib-cnn",
            ExtractorBackend::Hybrid => "hybrid",
            ExtractorBackend::InsightFace => "insight-face",
            ExtractorBackend::FaceRecognitionLib => "face-recognition-lib",
        }
    }
}

impl fmt::Display for ExtractorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| format!("unknown extractor backend '{s}'"))
    }
}

/// Borrowed image pixels. The layout is agreed between caller and extractor.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// A face detection + embedding model.
pub trait EmbeddingExtractor {
    fn backend(&self) -> ExtractorBackend;

    /// Embedding of the most prominent face, or `Ok(None)` when no face is found.
    fn extract_embedding(&mut self, image: &ImageInput<'_>) -> Result<Option<Embedding>, ExtractError>;

    /// All detected faces.
    fn detect_face_regions(&mut self, image: &ImageInput<'_>) -> Result<Vec<FaceRegion>, ExtractError>;
}

/// Largest detected face, generally the one closest to the camera.
pub fn largest_region(regions: &[FaceRegion]) -> Option<&FaceRegion> {
    regions
        .iter()
        .fold(None, |best: Option<&FaceRegion>, r| match best {
            Some(b) if b.area() >= r.area() => Some(b),
            _ => Some(r),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_defaults() {
        assert_eq!(ExtractorBackend::DlibHog.embedding_dim(), 128);
        assert_eq!(ExtractorBackend::InsightFace.embedding_dim(), 512);
        assert_eq!(ExtractorBackend::InsightFace.default_metric(), Metric::Cosine);
        assert_eq!(ExtractorBackend::Hybrid.default_metric(), Metric::Euclidean);
        assert_eq!(ExtractorBackend::DlibHog.default_threshold(), 0.6);
        assert_eq!(ExtractorBackend::DlibCnn.default_threshold(), 0.49);
    }

    #[test]
    fn test_backend_name_round_trip() {
        for backend in ExtractorBackend::ALL {
            assert_eq!(backend.to_string().parse::<ExtractorBackend>().unwrap(), backend);
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{backend}\""));
        }
        assert!("opencv".parse::<ExtractorBackend>().is_err());
    }

    #[test]
    fn test_largest_region_prefers_first_on_tie() {
        let region = |x: f32, w: f32| FaceRegion { x, y: 0.0, width: w, height: w, confidence: 1.0 };
        let regions = [region(0.0, 10.0), region(1.0, 30.0), region(2.0, 30.0)];
        assert_eq!(largest_region(&regions).map(|r| r.x), Some(1.0));
        assert!(largest_region(&[]).is_none());
    }
}
