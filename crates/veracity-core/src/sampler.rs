/// Maximum number of face-bearing frames analyzed per video. Also the target
/// number of sample points used to derive the stride.
pub const MAX_ANALYZED_FRAMES: usize = 50;

/// Stride between sampled frame indices for a video of `frame_count` frames.
///
/// Unknown length (0) samples every frame.
pub fn sample_interval(frame_count: u64) -> u64 {
    (frame_count / MAX_ANALYZED_FRAMES as u64).max(1)
}

/// Decides which frame indices are analyzed and when the walk stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    interval: u64,
    budget: usize,
}

impl FrameSampler {
    pub fn new(frame_count: u64) -> Self {
        Self {
            interval: sample_interval(frame_count),
            budget: MAX_ANALYZED_FRAMES,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether the frame at `index` should go to the feature extractor.
    pub fn should_sample(&self, index: u64) -> bool {
        index % self.interval == 0
    }

    /// Whether enough face-bearing frames have been analyzed to stop walking.
    pub fn budget_reached(&self, analyzed_frames: usize) -> bool {
        analyzed_frames >= self.budget
    }
}
