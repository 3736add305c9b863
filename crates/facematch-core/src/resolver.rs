//! Identity resolution: scan a record snapshot, keep the closest candidate,
//! decide against a threshold.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::extractor::ExtractorBackend;
use crate::matcher::{self, MatchError};
use crate::types::{Embedding, EnrolledRecord, MatchResult, Metric};

/// Point-in-time snapshot of enrolled records handed to the resolver.
///
/// Iteration order decides ties, so stores must produce it reproducibly.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub records: Vec<EnrolledRecord>,
    /// Records the store could not decode. Reported, never scanned.
    pub unreadable: Vec<Anomaly>,
}

impl RecordSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl From<Vec<EnrolledRecord>> for RecordSet {
    fn from(records: Vec<EnrolledRecord>) -> Self {
        Self {
            records,
            unreadable: Vec::new(),
        }
    }
}

/// A record skipped during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    DimensionMismatch {
        identity: String,
        expected: usize,
        actual: usize,
    },
    DegenerateVector {
        identity: String,
    },
    InvalidEmbedding {
        identity: String,
        reason: String,
    },
    Unreadable {
        identity: String,
        reason: String,
    },
}

impl Anomaly {
    pub fn identity(&self) -> &str {
        match self {
            Anomaly::DimensionMismatch { identity, .. }
            | Anomaly::DegenerateVector { identity }
            | Anomaly::InvalidEmbedding { identity, .. }
            | Anomaly::Unreadable { identity, .. } => identity,
        }
    }

    fn from_match_error(identity: &str, err: MatchError) -> Self {
        let identity = identity.to_string();
        match err {
            MatchError::DimensionMismatch { left, right } => Anomaly::DimensionMismatch {
                identity,
                expected: left,
                actual: right,
            },
            MatchError::DegenerateVector => Anomaly::DegenerateVector { identity },
            other => Anomaly::InvalidEmbedding {
                identity,
                reason: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::DimensionMismatch { identity, expected, actual } => write!(
                f,
                "'{identity}': embedding has {actual} dimensions, query has {expected}"
            ),
            Anomaly::DegenerateVector { identity } => {
                write!(f, "'{identity}': zero-norm embedding under cosine metric")
            }
            Anomaly::InvalidEmbedding { identity, reason } => write!(f, "'{identity}': {reason}"),
            Anomaly::Unreadable { identity, reason } => {
                write!(f, "'{identity}': unreadable record: {reason}")
            }
        }
    }
}

/// Closest enrolled identity, kept even when it falls outside the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub identity: String,
    pub distance: f32,
}

/// Full outcome of one resolution.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub result: MatchResult,
    pub closest: Option<Candidate>,
    pub anomalies: Vec<Anomaly>,
    /// Records actually compared.
    pub scanned: usize,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.result;
        match (&r.identity, &self.closest) {
            (Some(identity), _) => write!(
                f,
                "matched '{identity}' at distance {:.4} (threshold: {}, confidence: {:.1}%)",
                r.distance, r.threshold, r.confidence
            ),
            (None, Some(c)) => write!(
                f,
                "no match; closest was '{}' at distance {:.4} (threshold: {})",
                c.identity, c.distance, r.threshold
            ),
            (None, None) => f.write_str("no match; no comparable enrolled identities"),
        }
    }
}

/// Resolve `query` against `records`.
///
/// Never fails: bad records are skipped and reported in
/// [`Resolution::anomalies`]. Ties go to the first record in iteration order.
pub fn resolve(query: &Embedding, records: &RecordSet, metric: Metric, threshold: f32) -> Resolution {
    let mut anomalies = records.unreadable.clone();
    let mut best: Option<(usize, f32)> = None;
    let mut scanned = 0usize;

    // Every record is visited; no early exit on a match.
    for (i, record) in records.records.iter().enumerate() {
        let d = match matcher::distance(query.as_slice(), record.embedding.as_slice(), metric) {
            Ok(d) => d,
            Err(err) => {
                anomalies.push(Anomaly::from_match_error(&record.identity, err));
                continue;
            }
        };
        scanned += 1;

        // Strict `<` keeps the earliest record on ties.
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((i, d));
        }
    }

    for anomaly in &anomalies {
        tracing::warn!(identity = anomaly.identity(), %anomaly, "skipped enrolled record");
    }

    let closest = best.map(|(i, d)| Candidate {
        identity: records.records[i].identity.clone(),
        distance: d,
    });
    let distance = closest.as_ref().map_or(f32::INFINITY, |c| c.distance);
    let matched = closest.is_some() && distance <= threshold;

    let result = MatchResult {
        matched,
        identity: if matched {
            closest.as_ref().map(|c| c.identity.clone())
        } else {
            None
        },
        distance,
        threshold,
        confidence: if matched {
            matcher::confidence(distance, threshold)
        } else {
            0.0
        },
    };

    tracing::debug!(
        matched,
        distance,
        threshold,
        %metric,
        scanned,
        anomalies = anomalies.len(),
        "resolved query"
    );

    Resolution {
        result,
        closest,
        anomalies,
        scanned,
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("{name} threshold must be finite and non-negative, got {value}")]
    InvalidThreshold { name: &'static str, value: f32 },
}

/// Matching policy for one deployment.
///
/// Login and enrollment thresholds are independent: a stricter duplicate
/// check on enroll and a looser accept on login are both legitimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchPolicy {
    pub metric: Metric,
    pub login_threshold: f32,
    pub enroll_threshold: f32,
}

impl MatchPolicy {
    /// Backend defaults, with the same threshold for login and enrollment.
    pub fn for_backend(backend: ExtractorBackend) -> Self {
        let threshold = backend.default_threshold();
        Self {
            metric: backend.default_metric(),
            login_threshold: threshold,
            enroll_threshold: threshold,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        check_threshold("login", self.login_threshold)?;
        check_threshold("enroll", self.enroll_threshold)
    }
}

/// An infinite threshold accepts any face at confidence 100; a negative one
/// rejects even an exact copy.
fn check_threshold(name: &'static str, value: f32) -> Result<(), PolicyError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PolicyError::InvalidThreshold { name, value });
    }
    Ok(())
}

/// Enrollment refused: the face is already enrolled under another identity.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("face already enrolled as '{existing}' (distance {distance:.4}, threshold {threshold})")]
pub struct EnrollmentConflict {
    pub existing: String,
    pub distance: f32,
    pub threshold: f32,
}

/// Applies a validated [`MatchPolicy`]. Holds no record state.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    policy: MatchPolicy,
}

impl Resolver {
    pub fn new(policy: MatchPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Resolve for login. `threshold` overrides the policy's login threshold
    /// and is held to the same rules.
    pub fn resolve(
        &self,
        query: &Embedding,
        records: &RecordSet,
        threshold: Option<f32>,
    ) -> Result<Resolution, PolicyError> {
        let threshold = match threshold {
            Some(t) => {
                check_threshold("override", t)?;
                t
            }
            None => self.policy.login_threshold,
        };
        Ok(resolve(query, records, self.policy.metric, threshold))
    }

    /// Duplicate-face check run before enrolling a new identity.
    pub fn check_enrollment(&self, query: &Embedding, records: &RecordSet) -> Result<(), EnrollmentConflict> {
        let resolution = resolve(query, records, self.policy.metric, self.policy.enroll_threshold);
        match resolution.result.identity {
            Some(existing) => Err(EnrollmentConflict {
                existing,
                distance: resolution.result.distance,
                threshold: self.policy.enroll_threshold,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record(identity: &str, values: Vec<f32>) -> EnrolledRecord {
        EnrolledRecord::new(identity, Embedding::new(values), Value::Null)
    }

    fn alice_and_bob() -> RecordSet {
        RecordSet::from(vec![
            record("alice", vec![0.0, 0.0, 0.0]),
            record("bob", vec![10.0, 10.0, 10.0]),
        ])
    }

    #[test]
    fn test_resolve_empty_never_matches() {
        let empty = RecordSet::default();
        for threshold in [0.0, 1.0, f32::MAX] {
            let res = resolve(&Embedding::new(vec![1.0, 2.0]), &empty, Metric::Euclidean, threshold);
            assert!(!res.result.matched);
            assert_eq!(res.result.identity, None);
            assert_eq!(res.result.distance, f32::INFINITY);
            assert!(res.closest.is_none());
            assert_eq!(res.scanned, 0);
        }
    }

    #[test]
    fn test_resolve_close_query_matches_alice() {
        let res = resolve(&Embedding::new(vec![0.1, 0.1, 0.1]), &alice_and_bob(), Metric::Euclidean, 1.0);
        assert!(res.result.matched);
        assert_eq!(res.result.identity.as_deref(), Some("alice"));
        assert!((res.result.distance - 0.1732).abs() < 1e-3);
        assert!(res.anomalies.is_empty());
        assert_eq!(res.scanned, 2);
    }

    #[test]
    fn test_resolve_midpoint_tie_is_first_and_unmatched() {
        let records = alice_and_bob();
        for _ in 0..3 {
            let res = resolve(&Embedding::new(vec![5.0, 5.0, 5.0]), &records, Metric::Euclidean, 1.0);
            assert!(!res.result.matched);
            assert_eq!(res.result.identity, None);
            assert!((res.result.distance - 8.660_254).abs() < 1e-3);
            assert_eq!(res.closest.as_ref().map(|c| c.identity.as_str()), Some("alice"));
            assert_eq!(res.result.confidence, 0.0);
        }
    }

    #[test]
    fn test_resolve_tie_follows_iteration_order() {
        let records = RecordSet::from(vec![
            record("zed", vec![1.0, 0.0]),
            record("amy", vec![1.0, 0.0]),
        ]);
        let res = resolve(&Embedding::new(vec![1.0, 0.0]), &records, Metric::Cosine, 0.5);
        assert_eq!(res.result.identity.as_deref(), Some("zed"));
    }

    #[test]
    fn test_resolve_skips_mismatched_records() {
        let records = RecordSet::from(vec![
            record("short", vec![1.0, 0.0]),
            record("alice", vec![0.0, 0.0, 0.0]),
        ]);
        let res = resolve(&Embedding::new(vec![0.0, 0.0, 0.1]), &records, Metric::Euclidean, 1.0);
        assert!(res.result.matched);
        assert_eq!(res.result.identity.as_deref(), Some("alice"));
        assert_eq!(
            res.anomalies,
            vec![Anomaly::DimensionMismatch {
                identity: "short".into(),
                expected: 3,
                actual: 2
            }]
        );
        assert_eq!(res.scanned, 1);
    }

    #[test]
    fn test_resolve_query_mismatched_against_all() {
        let res = resolve(&Embedding::new(vec![1.0; 5]), &alice_and_bob(), Metric::Euclidean, 100.0);
        assert!(!res.result.matched);
        assert_eq!(res.anomalies.len(), 2);
        assert_eq!(res.scanned, 0);
        assert!(res.closest.is_none());
    }

    #[test]
    fn test_resolve_reports_degenerate_and_unreadable() {
        let mut records = RecordSet::from(vec![
            record("zero", vec![0.0, 0.0]),
            record("bob", vec![0.0, 1.0]),
        ]);
        records.unreadable.push(Anomaly::Unreadable {
            identity: "broken".into(),
            reason: "face_encoding is null".into(),
        });

        let res = resolve(&Embedding::new(vec![0.0, 2.0]), &records, Metric::Cosine, 0.49);
        assert_eq!(res.result.identity.as_deref(), Some("bob"));
        let ids: Vec<&str> = res.anomalies.iter().map(|a| a.identity()).collect();
        assert_eq!(ids, vec!["broken", "zero"]);
        assert!(matches!(res.anomalies[1], Anomaly::DegenerateVector { .. }));
    }

    #[test]
    fn test_confidence_bounds_in_result() {
        let records = RecordSet::from(vec![record("alice", vec![0.0, 0.0])]);
        let exact = resolve(&Embedding::new(vec![0.0, 0.0]), &records, Metric::Euclidean, 0.5);
        assert_eq!(exact.result.confidence, 100.0);
        assert_eq!(exact.result.security_tier(), Some(crate::types::SecurityTier::High));

        let edge = resolve(&Embedding::new(vec![0.0, 0.5]), &records, Metric::Euclidean, 0.5);
        assert!(edge.result.matched);
        assert_eq!(edge.result.confidence, 0.0);
        assert_eq!(edge.result.security_tier(), Some(crate::types::SecurityTier::Low));
    }

    #[test]
    fn test_enrolled_embedding_resolves_to_itself() {
        let mut records = alice_and_bob();
        let carol = Embedding::new(vec![0.3, -0.7, 2.5]);
        records.records.push(EnrolledRecord::new("carol", carol.clone(), Value::Null));

        for metric in [Metric::Euclidean, Metric::Cosine] {
            let res = resolve(&carol, &records, metric, 0.01);
            assert!(res.result.matched);
            assert_eq!(res.result.identity.as_deref(), Some("carol"));
            assert!(res.result.distance.abs() < 1e-6);
        }
    }

    #[test]
    fn test_display_messages() {
        let records = alice_and_bob();
        let miss = resolve(&Embedding::new(vec![5.0, 5.0, 5.0]), &records, Metric::Euclidean, 1.0);
        assert_eq!(
            miss.to_string(),
            "no match; closest was 'alice' at distance 8.6603 (threshold: 1)"
        );
        let none = resolve(&Embedding::new(vec![5.0]), &RecordSet::default(), Metric::Euclidean, 1.0);
        assert_eq!(none.to_string(), "no match; no comparable enrolled identities");
    }

    #[test]
    fn test_policy_rejects_bad_thresholds() {
        let mut policy = MatchPolicy::for_backend(ExtractorBackend::InsightFace);
        assert!(Resolver::new(policy).is_ok());
        policy.enroll_threshold = -0.1;
        assert_eq!(
            Resolver::new(policy).unwrap_err(),
            PolicyError::InvalidThreshold { name: "enroll", value: -0.1 }
        );
        policy.enroll_threshold = 0.3;
        policy.login_threshold = f32::NAN;
        assert!(Resolver::new(policy).is_err());
    }

    #[test]
    fn test_resolver_threshold_override() {
        let resolver = Resolver::new(MatchPolicy {
            metric: Metric::Euclidean,
            login_threshold: 0.1,
            enroll_threshold: 0.1,
        })
        .unwrap();
        let query = Embedding::new(vec![0.1, 0.1, 0.1]);
        assert!(!resolver.resolve(&query, &alice_and_bob(), None).unwrap().result.matched);
        assert!(resolver.resolve(&query, &alice_and_bob(), Some(1.0)).unwrap().result.matched);
    }

    #[test]
    fn test_resolver_rejects_invalid_override() {
        let resolver = Resolver::new(MatchPolicy::for_backend(ExtractorBackend::DlibHog)).unwrap();
        let records = RecordSet::from(vec![record("alice", vec![0.0, 0.0, 0.0])]);

        let far = Embedding::new(vec![50.0, 50.0, 50.0]);
        assert_eq!(
            resolver.resolve(&far, &records, Some(f32::INFINITY)).unwrap_err(),
            PolicyError::InvalidThreshold { name: "override", value: f32::INFINITY }
        );
        let exact = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(resolver.resolve(&exact, &records, Some(-1.0)).is_err());
        assert!(resolver.resolve(&exact, &records, Some(f32::NAN)).is_err());

        let zero = resolver.resolve(&exact, &records, Some(0.0)).unwrap();
        assert!(zero.result.matched);
        assert_eq!(zero.result.confidence, 100.0);
    }

    #[test]
    fn test_enrollment_uses_its_own_threshold() {
        let resolver = Resolver::new(MatchPolicy {
            metric: Metric::Euclidean,
            login_threshold: 0.1,
            enroll_threshold: 1.0,
        })
        .unwrap();
        let query = Embedding::new(vec![0.1, 0.1, 0.1]);
        let records = alice_and_bob();

        assert!(!resolver.resolve(&query, &records, None).unwrap().result.matched);
        let conflict = resolver.check_enrollment(&query, &records).unwrap_err();
        assert_eq!(conflict.existing, "alice");
        assert_eq!(conflict.threshold, 1.0);

        let far = Embedding::new(vec![-20.0, 3.0, 3.0]);
        assert!(resolver.check_enrollment(&far, &records).is_ok());
    }
}
