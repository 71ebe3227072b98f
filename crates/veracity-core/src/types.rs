use serde::{Deserialize, Serialize};

/// One decoded RGB frame.
pub type Frame = image::RgbImage;

/// Stability between two temporally adjacent face-bearing frames, in `[0, 1]`.
/// Higher means steadier facial geometry.
pub type StabilityScore = f32;

/// A facial landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in the image plane, ignoring depth.
    pub fn planar_distance(&self, other: &Landmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<[f32; 3]> for Landmark {
    fn from(p: [f32; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

/// Raw output of a face feature extractor for one frame.
///
/// Detection and landmark results come from separate models and may disagree:
/// `detection_score` is `None` when the detector found no face, `landmarks`
/// is `None` when the landmark model located none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceFeatures {
    pub detection_score: Option<f32>,
    pub landmarks: Option<Vec<Landmark>>,
}

/// Per-sampled-frame result consumed by the tracker and the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameObservation {
    pub frame_index: u64,
    pub has_face: bool,
    /// Detector confidence for the primary face, clamped to `[0, 1]`.
    /// Zero when no face was detected.
    pub face_quality: f32,
    /// Landmarks of the primary face. Only attached to face-bearing frames.
    pub landmarks: Option<Vec<Landmark>>,
}

impl FrameObservation {
    /// Observation for a frame where nothing usable was found.
    pub fn no_face(frame_index: u64) -> Self {
        Self {
            frame_index,
            has_face: false,
            face_quality: 0.0,
            landmarks: None,
        }
    }

    /// Build an observation from extractor output.
    ///
    /// `has_face` follows the detector alone; landmarks are kept only when the
    /// detector also found a face.
    pub fn from_features(frame_index: u64, features: FaceFeatures) -> Self {
        match features.detection_score {
            Some(score) => Self {
                frame_index,
                has_face: true,
                face_quality: sanitize_unit(score),
                landmarks: features.landmarks,
            },
            None => Self::no_face(frame_index),
        }
    }
}

/// Session-level summary of the analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_frames: u64,
    /// Face-bearing frames, the only ones counted against the sampling budget.
    pub analyzed_frames: usize,
    pub duration_secs: f64,
    pub average_face_quality: f64,
    /// Population variance of face quality over face-bearing frames.
    pub quality_variance: f64,
    /// Mean stability over all consecutive face-bearing pairs; 1.0 if none.
    pub landmark_stability: f64,
    pub stability_pairs: usize,
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
pub(crate) fn sanitize_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
