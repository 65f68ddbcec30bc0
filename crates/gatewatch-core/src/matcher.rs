//! Nearest-neighbour identity resolution with a threshold and a margin.
//!
//! A face is accepted as the nearest gallery label only when the match is
//! both close enough (`distance <= threshold`) and unambiguous: the nearest
//! entry belonging to any *other* label must be at least `margin` further
//! away. With a single-label gallery there is no competitor and the margin
//! test passes.
//!
//! The runner-up is taken per label, not per entry: a gallery usually holds
//! several embeddings of the same person, and a second embedding of the
//! nearest person must not make its own match ambiguous.

use crate::gallery::Gallery;
use crate::types::Embedding;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_THRESHOLD: f32 = 0.50;
pub const DEFAULT_MARGIN: f32 = 0.07;
pub const UNKNOWN_LABEL: &str = "unknown";

/// Distance between a query and every gallery embedding (lower = closer).
pub trait DistanceMetric {
    fn distances(&self, gallery: &[Embedding], query: &Embedding) -> Vec<f32>;
}

/// L2 distance, the usual face-distance semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceMetric for EuclideanDistance {
    fn distances(&self, gallery: &[Embedding], query: &Embedding) -> Vec<f32> {
        gallery.iter().map(|g| g.euclidean_distance(query)).collect()
    }
}

/// `1 - cosine similarity`, in [0, 2].
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineDistance;

impl DistanceMetric for CosineDistance {
    fn distances(&self, gallery: &[Embedding], query: &Embedding) -> Vec<f32> {
        gallery.iter().map(|g| 1.0 - g.similarity(query)).collect()
    }
}

/// Config-level choice of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Euclidean,
    Cosine,
}

impl MetricKind {
    pub fn build(self) -> Box<dyn DistanceMetric> {
        match self {
            MetricKind::Euclidean => Box::new(EuclideanDistance),
            MetricKind::Cosine => Box::new(CosineDistance),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!("unknown distance metric '{other}' (expected euclidean or cosine)")),
        }
    }
}

/// A per-frame identity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn label(&self) -> &str {
        match self {
            Identity::Known(label) => label,
            Identity::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub identity: Identity,
    /// Distance to the nearest gallery entry, whatever the verdict.
    pub distance: f32,
    /// Distance to the nearest entry of a different label.
    pub runner_up: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginMatcher {
    pub threshold: f32,
    pub margin: f32,
}

impl Default for MarginMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            margin: DEFAULT_MARGIN,
        }
    }
}

impl MarginMatcher {
    pub fn new(threshold: f32, margin: f32) -> Self {
        Self { threshold, margin }
    }

    pub fn resolve(&self, gallery: &Gallery, metric: &dyn DistanceMetric, query: &Embedding) -> IdentityMatch {
        let distances = metric.distances(gallery.embeddings(), query);
        let labels = gallery.entries().iter().map(|e| e.label.as_str());
        self.resolve_distances(labels.zip(distances.iter().copied()))
    }

    /// Core decision over `(label, distance)` pairs.
    pub fn resolve_distances<'a>(&self, scored: impl IntoIterator<Item = (&'a str, f32)>) -> IdentityMatch {
        let scored: Vec<(&str, f32)> = scored.into_iter().filter(|(_, d)| d.is_finite()).collect();

        let Some(&(best_label, best)) = scored.iter().min_by(|a, b| a.1.total_cmp(&b.1)) else {
            return IdentityMatch {
                identity: Identity::Unknown,
                distance: f32::INFINITY,
                runner_up: None,
            };
        };

        let runner_up = scored
            .iter()
            .filter(|(label, _)| *label != best_label)
            .map(|&(_, d)| d)
            .min_by(f32::total_cmp);

        let close_enough = best <= self.threshold;
        let unambiguous = runner_up.map_or(true, |second| second - best >= self.margin);

        let identity = if close_enough && unambiguous {
            Identity::Known(best_label.to_string())
        } else {
            Identity::Unknown
        };

        IdentityMatch {
            identity,
            distance: best,
            runner_up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;

    fn matcher() -> MarginMatcher {
        MarginMatcher::default()
    }

    #[test]
    fn test_clear_winner_resolves() {
        let m = matcher().resolve_distances([("A", 0.3), ("B", 0.5)]);
        assert_eq!(m.identity, Identity::Known("A".into()));
        assert_eq!(m.runner_up, Some(0.5));
    }

    #[test]
    fn test_near_tie_is_unknown() {
        let m = matcher().resolve_distances([("A", 0.45), ("B", 0.48)]);
        assert_eq!(m.identity, Identity::Unknown);
        assert_eq!(m.distance, 0.45);
    }

    #[test]
    fn test_above_threshold_is_unknown() {
        let m = matcher().resolve_distances([("A", 0.55), ("B", 0.9)]);
        assert_eq!(m.identity, Identity::Unknown);
    }

    #[test]
    fn test_same_label_is_not_a_competitor() {
        // Two samples of A are close together; B is far away.
        let m = matcher().resolve_distances([("A", 0.30), ("A", 0.31), ("B", 0.60)]);
        assert_eq!(m.identity, Identity::Known("A".into()));
        assert_eq!(m.runner_up, Some(0.60));
    }

    #[test]
    fn test_single_label_gallery_has_no_runner_up() {
        let m = matcher().resolve_distances([("A", 0.40), ("A", 0.41)]);
        assert_eq!(m.identity, Identity::Known("A".into()));
        assert_eq!(m.runner_up, None);
    }

    #[test]
    fn test_empty_is_unknown() {
        let m = matcher().resolve_distances(std::iter::empty());
        assert_eq!(m.identity, Identity::Unknown);
        assert!(m.distance.is_infinite());
    }

    #[test]
    fn test_resolve_against_gallery() {
        let gallery = Gallery::from_entries(vec![
            GalleryEntry {
                label: "A".into(),
                embedding: Embedding::new(vec![0.0, 0.0]),
            },
            GalleryEntry {
                label: "B".into(),
                embedding: Embedding::new(vec![1.0, 0.0]),
            },
        ])
        .unwrap();
        let m = matcher().resolve(&gallery, &EuclideanDistance, &Embedding::new(vec![0.3, 0.0]));
        assert_eq!(m.identity, Identity::Known("A".into()));
        assert!((m.distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance() {
        let d = CosineDistance.distances(
            &[Embedding::new(vec![1.0, 0.0]), Embedding::new(vec![0.0, 1.0])],
            &Embedding::new(vec![1.0, 0.0]),
        );
        assert!(d[0].abs() < 1e-6);
        assert!((d[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("Cosine".parse::<MetricKind>().unwrap(), MetricKind::Cosine);
        assert!("manhattan".parse::<MetricKind>().is_err());
        assert_eq!(Identity::Unknown.to_string(), "unknown");
    }
}
