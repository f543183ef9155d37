use serde::{Deserialize, Serialize};
use std::fmt;

/// Face bounding box in frame pixel coordinates, edges in (top, right, bottom, left) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Face feature vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different length are not comparable and are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known face sample: one identity label and one embedding.
/// Several references may share a label.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEncoding {
    pub identity: String,
    pub embedding: Embedding,
}

/// One face found in one frame.
#[derive(Debug, Clone)]
pub struct ObservedFace {
    pub embedding: Embedding,
    pub bbox: FaceBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// Who a face belongs to, or the unknown sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub const UNKNOWN_LABEL: &'static str = "Unknown";

    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(name) => f.write_str(name),
            Identity::Unknown => f.write_str(Self::UNKNOWN_LABEL),
        }
    }
}

/// Distance gates applied to the closest gallery reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Primary gate: maximum distance for a plausible match.
    pub tolerance: f32,
    /// Stricter cap that must also hold before the identity is trusted.
    pub confirmation_cap: f32,
}

impl MatchPolicy {
    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.tolerance && distance <= self.confirmation_cap
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            confirmation_cap: 0.5,
        }
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: Identity,
    /// Distance to the closest reference, `+inf` when nothing was comparable.
    pub distance: f32,
    pub accepted: bool,
    /// Gallery index of the closest reference, accepted or not.
    pub best_index: Option<usize>,
}

impl MatchResult {
    fn unknown(distance: f32, best_index: Option<usize>) -> Self {
        Self {
            identity: Identity::Unknown,
            distance,
            accepted: false,
            best_index,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of references.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[ReferenceEncoding],
        policy: MatchPolicy,
    ) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Visits every gallery entry. Ties go to the earliest entry in gallery order,
/// so results are reproducible for a given gallery file.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[ReferenceEncoding],
        policy: MatchPolicy,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, reference) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&reference.embedding);
            // Strict `<` keeps the first of equal distances; NaN never wins.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if policy.accepts(best_dist) => MatchResult {
                identity: Identity::Known(gallery[idx].identity.clone()),
                distance: best_dist,
                accepted: true,
                best_index: Some(idx),
            },
            _ => MatchResult::unknown(best_dist, best_idx),
        }
    }
}
