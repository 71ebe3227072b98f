//! Temporal stability of facial geometry across sampled frames.
//!
//! Face-swap and reenactment models render each frame largely independently,
//! so the structural points of a synthesized face tend to jitter between
//! frames more than a real face under the same camera. The tracker compares
//! each face-bearing frame against the one before it and turns the mean
//! displacement of a fixed set of structural landmarks into a score.
//!
//! Missing landmark data never counts against a video: an empty set or no
//! common indices score as fully stable.

use crate::types::{Landmark, StabilityScore};

/// Face-mesh indices compared between frames: jaw line, eye corners and
/// mouth corners.
pub const KEY_LANDMARK_INDICES: [usize; 10] = [0, 17, 33, 61, 78, 93, 132, 164, 172, 187];

/// Multiplier applied to the mean normalized displacement before inversion.
const MOVEMENT_SCALE: f32 = 100.0;

/// Fold state of the stability tracker.
///
/// Holds the landmark set of the most recent face-bearing frame. The tracker
/// is a plain value: each [`observe`](Self::observe) consumes it and returns
/// the next state, so nothing is shared between concurrent analyses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StabilityTracker {
    previous: Option<Vec<Landmark>>,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the landmarks of the next face-bearing frame.
    ///
    /// A score is produced only when the previous face-bearing frame left a
    /// landmark set behind. The retained set is always replaced by `current`,
    /// even when `current` is `None`.
    pub fn observe(self, current: Option<Vec<Landmark>>) -> (Self, Option<StabilityScore>) {
        let score = self
            .previous
            .as_deref()
            .map(|prev| landmark_stability(prev, current.as_deref().unwrap_or(&[])));
        (Self { previous: current }, score)
    }

    /// Whether a landmark set is retained for the next comparison.
    pub fn has_reference(&self) -> bool {
        self.previous.is_some()
    }
}

/// Stability between two landmark sets.
///
/// Averages the planar displacement of every key index present in both sets,
/// then maps it to `1 / (1 + avg * 100)`, clamped to `[0, 1]`.
pub fn landmark_stability(prev: &[Landmark], curr: &[Landmark]) -> StabilityScore {
    if prev.is_empty() || curr.is_empty() {
        return 1.0;
    }

    let mut total = 0.0f32;
    let mut count = 0usize;
    for &idx in &KEY_LANDMARK_INDICES {
        let (Some(p), Some(c)) = (prev.get(idx), curr.get(idx)) else {
            continue;
        };
        total += p.planar_distance(c);
        count += 1;
    }

    if count == 0 {
        return 1.0;
    }

    let avg_movement = total / count as f32;
    let stability = 1.0 / (1.0 + avg_movement * MOVEMENT_SCALE);
    if stability.is_nan() {
        return 1.0;
    }
    stability.clamp(0.0, 1.0)
}
