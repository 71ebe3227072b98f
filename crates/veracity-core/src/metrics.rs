use crate::types::{AggregateMetrics, FrameObservation, StabilityScore};

/// Running statistics over the analysis window.
///
/// Face quality uses Welford's update so mean and population variance come
/// out of a single pass without retaining the per-frame values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsAccumulator {
    face_frames: usize,
    quality_mean: f64,
    quality_m2: f64,
    stability_sum: f64,
    stability_pairs: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation (and the stability score it produced, if any).
    ///
    /// Faceless observations leave the accumulator untouched.
    pub fn record(mut self, observation: &FrameObservation, stability: Option<StabilityScore>) -> Self {
        if !observation.has_face {
            return self;
        }

        self.face_frames += 1;
        let q = f64::from(observation.face_quality);
        let delta = q - self.quality_mean;
        self.quality_mean += delta / self.face_frames as f64;
        self.quality_m2 += delta * (q - self.quality_mean);

        if let Some(s) = stability {
            self.stability_sum += f64::from(s);
            self.stability_pairs += 1;
        }
        self
    }

    /// Face-bearing frames recorded so far.
    pub fn analyzed_frames(&self) -> usize {
        self.face_frames
    }

    pub fn finalize(&self, total_frames: u64, duration_secs: f64) -> AggregateMetrics {
        let (average, variance) = if self.face_frames == 0 {
            (0.0, 0.0)
        } else {
            (
                self.quality_mean,
                (self.quality_m2 / self.face_frames as f64).max(0.0),
            )
        };

        let landmark_stability = if self.stability_pairs == 0 {
            1.0
        } else {
            self.stability_sum / self.stability_pairs as f64
        };

        AggregateMetrics {
            total_frames,
            analyzed_frames: self.face_frames,
            duration_secs,
            average_face_quality: average,
            quality_variance: variance,
            landmark_stability,
            stability_pairs: self.stability_pairs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(idx: u64, quality: f32) -> FrameObservation {
        FrameObservation {
            frame_index: idx,
            has_face: true,
            face_quality: quality,
            landmarks: None,
        }
    }

    #[test]
    fn empty_window_defaults() {
        let m = MetricsAccumulator::new().finalize(0, 0.0);
        assert_eq!(m.analyzed_frames, 0);
        assert_eq!(m.average_face_quality, 0.0);
        assert_eq!(m.quality_variance, 0.0);
        assert_eq!(m.landmark_stability, 1.0);
        assert_eq!(m.stability_pairs, 0);
    }

    #[test]
    fn single_face_frame_is_fully_stable() {
        let m = MetricsAccumulator::new()
            .record(&face(0, 0.8), None)
            .finalize(1, 0.04);
        assert_eq!(m.analyzed_frames, 1);
        assert_eq!(m.landmark_stability, 1.0);
        assert!((m.average_face_quality - 0.8).abs() < 1e-6);
        assert_eq!(m.quality_variance, 0.0);
    }

    #[test]
    fn population_variance() {
        // values 0.2, 0.4, 0.6, 0.8: mean 0.5, population variance 0.05
        let acc = [0.2, 0.4, 0.6, 0.8]
            .iter()
            .enumerate()
            .fold(MetricsAccumulator::new(), |acc, (i, &q)| {
                acc.record(&face(i as u64, q), None)
            });
        let m = acc.finalize(4, 0.0);
        assert!((m.average_face_quality - 0.5).abs() < 1e-6);
        assert!((m.quality_variance - 0.05).abs() < 1e-6);
    }

    #[test]
    fn faceless_frames_are_ignored() {
        let acc = MetricsAccumulator::new()
            .record(&face(0, 0.9), None)
            .record(&FrameObservation::no_face(1), Some(0.1))
            .record(&face(2, 0.9), Some(0.5));
        let m = acc.finalize(3, 0.0);
        assert_eq!(m.analyzed_frames, 2);
        assert!((m.average_face_quality - 0.9).abs() < 1e-6);
        assert_eq!(m.stability_pairs, 1);
        assert!((m.landmark_stability - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stability_is_mean_of_pairs() {
        let acc = MetricsAccumulator::new()
            .record(&face(0, 0.5), None)
            .record(&face(1, 0.5), Some(0.2))
            .record(&face(2, 0.5), Some(0.6));
        let m = acc.finalize(3, 0.1);
        assert!((m.landmark_stability - 0.4).abs() < 1e-6);
        assert_eq!(m.total_frames, 3);
        assert!((m.duration_secs - 0.1).abs() < 1e-12);
    }
}
