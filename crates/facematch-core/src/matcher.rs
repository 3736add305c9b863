//! Pure numeric comparison between two embeddings.
//!
//! Nothing here holds state or picks a threshold: callers pass the metric
//! and threshold explicitly on every call.

use thiserror::Error;

use crate::types::Metric;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimensionality mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("zero-norm embedding cannot be compared under the cosine metric")]
    DegenerateVector,
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Distance between two embeddings under `metric`. Lower = more similar.
///
/// Accumulates in f64 so that `distance(v, v)` lands on zero for
/// realistic 128/512-dim vectors.
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(MatchError::EmptyEmbedding);
    }

    let d = match metric {
        Metric::Euclidean => euclidean(a, b),
        Metric::Cosine => cosine(a, b)?,
    };

    if !d.is_finite() {
        return Err(MatchError::NonFinite);
    }
    Ok(d as f32)
}

/// `distance(a, b, metric) <= threshold`.
pub fn is_match(a: &[f32], b: &[f32], metric: Metric, threshold: f32) -> Result<bool, MatchError> {
    Ok(distance(a, b, metric)? <= threshold)
}

/// Map a distance to a [0, 100] display score relative to `threshold`.
///
/// 100 at distance 0, exactly 0 at `distance == threshold`, clamped beyond.
pub fn confidence(distance: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return if distance <= 0.0 { 100.0 } else { 0.0 };
    }
    ((1.0 - distance / threshold) * 100.0).clamp(0.0, 100.0)
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let diff = x as f64 - y as f64;
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

fn cosine(a: &[f32], b: &[f32]) -> Result<f64, MatchError> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(MatchError::DegenerateVector);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    // Rounding can push 1 - similarity a hair outside [0, 2].
    Ok((1.0 - similarity).clamp(0.0, 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [[f32; 4]; 4] = [
        [0.0, 0.0, 0.0, 1.0],
        [0.3, -1.2, 4.5, 0.01],
        [-2.0, 7.5, 0.25, -0.5],
        [0.11, 0.22, 0.33, 0.44],
    ];

    #[test]
    fn test_self_distance_is_zero() {
        for v in &SAMPLES {
            assert_eq!(distance(v, v, Metric::Euclidean).unwrap(), 0.0);
            assert!(distance(v, v, Metric::Cosine).unwrap().abs() < 1e-6);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        for a in &SAMPLES {
            for b in &SAMPLES {
                for metric in [Metric::Euclidean, Metric::Cosine] {
                    assert_eq!(
                        distance(a, b, metric).unwrap(),
                        distance(b, a, metric).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn test_euclidean_triangle_inequality() {
        for a in &SAMPLES {
            for b in &SAMPLES {
                for c in &SAMPLES {
                    let ab = distance(a, b, Metric::Euclidean).unwrap();
                    let bc = distance(b, c, Metric::Euclidean).unwrap();
                    let ac = distance(a, c, Metric::Euclidean).unwrap();
                    assert!(ac <= ab + bc + 1e-5, "{ac} > {ab} + {bc}");
                }
            }
        }
    }

    #[test]
    fn test_euclidean_known_value() {
        let d = distance(&[0.0, 0.0, 0.0], &[0.1, 0.1, 0.1], Metric::Euclidean).unwrap();
        assert!((d - 0.173_205).abs() < 1e-5, "got {d}");
    }

    #[test]
    fn test_cosine_orthogonal_identical_opposite() {
        assert_eq!(distance(&[1.0, 0.0], &[0.0, 1.0], Metric::Cosine).unwrap(), 1.0);
        assert_eq!(distance(&[1.0, 0.0], &[1.0, 0.0], Metric::Cosine).unwrap(), 0.0);
        assert_eq!(distance(&[1.0, 0.0], &[-1.0, 0.0], Metric::Cosine).unwrap(), 2.0);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let d = distance(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0], Metric::Cosine).unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = distance(&[1.0, 0.0], &[1.0, 0.0, 0.0], Metric::Euclidean).unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { left: 2, right: 3 });
        assert!(is_match(&[1.0], &[1.0, 2.0], Metric::Cosine, 0.5).is_err());
    }

    #[test]
    fn test_cosine_zero_vector_is_degenerate() {
        let err = distance(&[0.0, 0.0], &[1.0, 0.0], Metric::Cosine).unwrap_err();
        assert_eq!(err, MatchError::DegenerateVector);
        // Euclidean has no such restriction.
        assert_eq!(distance(&[0.0, 0.0], &[3.0, 4.0], Metric::Euclidean).unwrap(), 5.0);
    }

    #[test]
    fn test_empty_and_non_finite_rejected() {
        assert_eq!(distance(&[], &[], Metric::Euclidean).unwrap_err(), MatchError::EmptyEmbedding);
        assert_eq!(
            distance(&[f32::NAN, 0.0], &[1.0, 0.0], Metric::Euclidean).unwrap_err(),
            MatchError::NonFinite
        );
        assert_eq!(
            distance(&[f32::INFINITY, 0.0], &[1.0, 0.0], Metric::Cosine).unwrap_err(),
            MatchError::NonFinite
        );
    }

    #[test]
    fn test_is_match_threshold_inclusive() {
        assert!(is_match(&[0.0, 0.0], &[3.0, 4.0], Metric::Euclidean, 5.0).unwrap());
        assert!(!is_match(&[0.0, 0.0], &[3.0, 4.0], Metric::Euclidean, 4.99).unwrap());
    }

    #[test]
    fn test_confidence_mapping() {
        assert_eq!(confidence(0.0, 0.49), 100.0);
        assert_eq!(confidence(0.49, 0.49), 0.0);
        assert_eq!(confidence(5.0, 0.49), 0.0);
        assert!((confidence(0.25, 1.0) - 75.0).abs() < 1e-4);
        assert!(confidence(0.1, 1.0) > confidence(0.2, 1.0));
    }

    #[test]
    fn test_confidence_zero_threshold() {
        assert_eq!(confidence(0.0, 0.0), 100.0);
        assert_eq!(confidence(0.1, 0.0), 0.0);
    }
}
