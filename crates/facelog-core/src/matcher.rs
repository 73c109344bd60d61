//! Nearest-neighbour matching of a probe embedding against a gallery snapshot.

use crate::gallery::Gallery;
use crate::types::Embedding;

/// Default maximum distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Known {
        name: String,
        /// Gallery index of the winning entry.
        index: usize,
        distance: f32,
    },
    Unknown {
        /// Distance to the nearest entry, if the gallery was not empty.
        nearest: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Known { name, .. } => Some(name),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MatchOutcome::Known { .. })
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchOutcome;
}

/// Euclidean argmin matcher.
///
/// Ties on the minimal distance resolve to the lowest gallery index. Entries
/// whose dimension differs from the probe's, and NaN distances from corrupt
/// values, never win.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.embeddings().iter().enumerate() {
            if entry.len() != probe.len() {
                continue;
            }
            let dist = probe.euclidean_distance(entry);
            if dist.is_nan() {
                continue;
            }
            // Strict `<` keeps the first of equally distant entries.
            let is_better = match best {
                None => true,
                Some((_, best_dist)) => dist < best_dist,
            };
            if is_better {
                best = Some((i, dist));
            }
        }

        match best {
            Some((index, distance)) if distance <= tolerance => MatchOutcome::Known {
                name: gallery.names()[index].clone(),
                index,
                distance,
            },
            Some((_, distance)) => MatchOutcome::Unknown {
                nearest: Some(distance),
            },
            None => MatchOutcome::Unknown { nearest: None },
        }
    }
}
