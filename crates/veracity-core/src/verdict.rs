//! Multi-factor verdict synthesis.
//!
//! The thresholds below are heuristic constants carried over unchanged. They
//! have not been fitted against labeled data and should be treated as
//! calibration parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{sanitize_unit, AggregateMetrics};

/// Fewer face-bearing frames than this yields an inconclusive verdict.
pub const MIN_ANALYZED_FRAMES: usize = 5;

const QUALITY_VARIANCE_LIMIT: f64 = 0.1;
const MIN_LANDMARK_STABILITY: f64 = 0.7;
const MAX_NATURAL_QUALITY: f64 = 0.95;
const MIN_NATURAL_QUALITY: f64 = 0.3;

const INDICATOR_COUNT: usize = 3;
const FAKE_RATIO: f32 = 0.6;
const REAL_RATIO: f32 = 0.3;
const MAX_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Real,
    Fake,
    Inconclusive,
}

impl VerdictLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictLabel::Real => "real",
            VerdictLabel::Fake => "fake",
            VerdictLabel::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal output of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictLabel,
    /// Always in `[0, 1]`.
    pub confidence: f32,
    pub explanation: String,
}

impl Verdict {
    fn new(verdict: VerdictLabel, confidence: f32, explanation: String) -> Self {
        Self {
            verdict,
            confidence: sanitize_unit(confidence),
            explanation,
        }
    }

    fn inconclusive(explanation: impl Into<String>) -> Self {
        Self::new(VerdictLabel::Inconclusive, 0.0, explanation.into())
    }

    /// The video could not be analyzed at all (e.g. the source failed to open).
    pub fn analysis_failed(reason: impl fmt::Display) -> Self {
        Self::inconclusive(format!("Analysis failed: {reason}"))
    }

    /// The analysis was stopped by its caller before it finished.
    pub fn cancelled() -> Self {
        Self::inconclusive("Analysis cancelled before completion")
    }

    /// Map aggregated metrics to a verdict.
    pub fn from_metrics(metrics: &AggregateMetrics) -> Self {
        if metrics.analyzed_frames < MIN_ANALYZED_FRAMES {
            return Self::inconclusive("Insufficient frames analyzed for reliable detection");
        }

        let indicators = Indicators::evaluate(metrics);
        let fired = indicators.fired();
        let ratio = fired as f32 / INDICATOR_COUNT as f32;

        if ratio >= FAKE_RATIO {
            Self::new(
                VerdictLabel::Fake,
                (0.5 + ratio * 0.4).min(MAX_CONFIDENCE),
                format!(
                    "Video shows {fired}/{INDICATOR_COUNT} deepfake indicators. \
                     Face quality variance: {:.3}, landmark stability: {:.3}",
                    metrics.quality_variance, metrics.landmark_stability
                ),
            )
        } else if ratio <= REAL_RATIO {
            Self::new(
                VerdictLabel::Real,
                (0.5 + (1.0 - ratio) * 0.4).min(MAX_CONFIDENCE),
                format!(
                    "Video appears authentic with {fired}/{INDICATOR_COUNT} concerning indicators. \
                     Analysis shows consistent facial features and natural movement patterns."
                ),
            )
        } else {
            Self::new(
                VerdictLabel::Inconclusive,
                0.5,
                format!(
                    "Mixed indicators ({fired}/{INDICATOR_COUNT}) make definitive classification \
                     difficult. Manual review recommended."
                ),
            )
        }
    }
}

/// The three independent fusion indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicators {
    pub quality_inconsistent: bool,
    pub geometry_unstable: bool,
    pub quality_extreme: bool,
}

impl Indicators {
    pub fn evaluate(metrics: &AggregateMetrics) -> Self {
        let avg = metrics.average_face_quality;
        Self {
            quality_inconsistent: metrics.quality_variance > QUALITY_VARIANCE_LIMIT,
            geometry_unstable: metrics.landmark_stability < MIN_LANDMARK_STABILITY,
            quality_extreme: avg > MAX_NATURAL_QUALITY || avg < MIN_NATURAL_QUALITY,
        }
    }

    pub fn fired(&self) -> usize {
        [
            self.quality_inconsistent,
            self.geometry_unstable,
            self.quality_extreme,
        ]
        .iter()
        .filter(|&&f| f)
        .count()
    }
}
