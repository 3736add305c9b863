use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchError;

/// Face embedding vector (128-dimensional for dlib, 512 for InsightFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Check the embedding invariants: non-empty, every value finite.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.values.is_empty() {
            return Err(MatchError::EmptyEmbedding);
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(MatchError::NonFinite);
        }
        Ok(())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An enrolled identity. `identity` is the unique key across a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledRecord {
    pub identity: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
    /// Opaque to the core, e.g. `{"image_path": "..."}`.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl EnrolledRecord {
    /// Create a record stamped with the current time.
    pub fn new(identity: impl Into<String>, embedding: Embedding, metadata: serde_json::Value) -> Self {
        Self {
            identity: identity.into(),
            embedding,
            created_at: Utc::now(),
            metadata,
        }
    }
}

/// Distance metric. Fixed per deployment; never mixed within one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// L2 norm of the difference. Range [0, inf).
    Euclidean,
    /// 1 - cosine similarity. Range [0, 2].
    Cosine,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => f.write_str("euclidean"),
            Metric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric '{other}' (expected euclidean or cosine)")),
        }
    }
}

/// Outcome of resolving a query against enrolled records.
///
/// A non-match is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Matched identity; `None` whenever `matched` is false.
    pub identity: Option<String>,
    /// Best distance seen, `+inf` when nothing was compared.
    pub distance: f32,
    pub threshold: f32,
    /// Display score in [0, 100]; 0 for non-matches.
    pub confidence: f32,
}

impl MatchResult {
    /// Security tier of a matched result. Non-matches have no tier.
    pub fn security_tier(&self) -> Option<SecurityTier> {
        self.matched
            .then(|| SecurityTier::from_confidence(self.confidence))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityTier {
    High,
    Medium,
    Low,
}

impl SecurityTier {
    /// `> 95` is high, `> 85` is medium, anything else low.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence > 95.0 {
            SecurityTier::High
        } else if confidence > 85.0 {
            SecurityTier::Medium
        } else {
            SecurityTier::Low
        }
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityTier::High => f.write_str("HIGH"),
            SecurityTier::Medium => f.write_str("MEDIUM"),
            SecurityTier::Low => f.write_str("LOW"),
        }
    }
}

/// Bounding box for a detected face, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score; 1.0 for detectors that do not report one.
    pub confidence: f32,
}

impl FaceRegion {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}
