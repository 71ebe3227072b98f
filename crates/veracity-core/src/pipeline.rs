use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::extractor::FaceFeatureExtractor;
use crate::metrics::MetricsAccumulator;
use crate::sampler::FrameSampler;
use crate::source::{SessionOpenError, VideoAnalysisSession, VideoOpener};
use crate::stability::StabilityTracker;
use crate::types::{AggregateMetrics, Frame, FrameObservation};
use crate::verdict::Verdict;

/// Consecutive undecodable frames after which the source is treated as exhausted.
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 16;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    SessionOpen(#[from] SessionOpenError),
    #[error("analysis cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Accumulated state of one frame walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkState {
    pub tracker: StabilityTracker,
    pub metrics: MetricsAccumulator,
}

impl WalkState {
    /// Fold one sampled observation into the state.
    pub fn step(self, mut observation: FrameObservation) -> Self {
        if !observation.has_face {
            return self;
        }
        let (tracker, score) = self.tracker.observe(observation.landmarks.take());
        let metrics = self.metrics.record(&observation, score);
        Self { tracker, metrics }
    }
}

/// Run the full analysis and synthesize a verdict.
///
/// Never fails: an unopenable video or a cancelled walk both come back as an
/// inconclusive verdict with zero confidence.
pub fn analyze(
    opener: &dyn VideoOpener,
    extractor: &mut dyn FaceFeatureExtractor,
    path: &Path,
    cancel: &CancelToken,
) -> Verdict {
    match analyze_with_metrics(opener, extractor, path, cancel) {
        Ok(metrics) => {
            let verdict = Verdict::from_metrics(&metrics);
            tracing::info!(
                path = %path.display(),
                verdict = %verdict.verdict,
                confidence = verdict.confidence,
                analyzed = metrics.analyzed_frames,
                "analysis complete"
            );
            verdict
        }
        Err(AnalysisError::Cancelled) => {
            tracing::warn!(path = %path.display(), "analysis cancelled");
            Verdict::cancelled()
        }
        Err(AnalysisError::SessionOpen(e)) => {
            tracing::error!(error = %e, "analysis failed");
            Verdict::analysis_failed(e)
        }
    }
}

/// Walk the video and return the aggregated metrics.
pub fn analyze_with_metrics(
    opener: &dyn VideoOpener,
    extractor: &mut dyn FaceFeatureExtractor,
    path: &Path,
    cancel: &CancelToken,
) -> Result<AggregateMetrics, AnalysisError> {
    let mut session = VideoAnalysisSession::open(opener, path)?;
    let sampler = FrameSampler::new(session.frame_count());
    tracing::info!(
        path = %path.display(),
        frames = session.frame_count(),
        fps = session.fps(),
        interval = sampler.interval(),
        "analyzing video"
    );

    let mut state = WalkState::default();
    let mut index = 0u64;
    let mut decode_errors = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        if sampler.budget_reached(state.metrics.analyzed_frames()) {
            break;
        }

        let frame = match session.source_mut().next_frame() {
            Ok(Some(frame)) => {
                decode_errors = 0;
                frame
            }
            Ok(None) => break,
            Err(e) => {
                decode_errors += 1;
                tracing::warn!(frame = index, error = %e, "skipping undecodable frame");
                if decode_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                    tracing::warn!(frame = index, "too many consecutive decode errors, ending walk");
                    break;
                }
                index += 1;
                continue;
            }
        };

        if sampler.should_sample(index) {
            state = state.step(observe_frame(extractor, &frame, index));
        }
        index += 1;
    }

    let metrics = state
        .metrics
        .finalize(session.frame_count(), session.duration_secs());
    tracing::debug!(
        walked = index,
        analyzed = metrics.analyzed_frames,
        avg_quality = metrics.average_face_quality,
        variance = metrics.quality_variance,
        stability = metrics.landmark_stability,
        "walk finished"
    );
    Ok(metrics)
}

/// Run the extractor on one frame, degrading any failure to "no face".
fn observe_frame(
    extractor: &mut dyn FaceFeatureExtractor,
    frame: &Frame,
    index: u64,
) -> FrameObservation {
    match extractor.extract(frame) {
        Ok(features) => FrameObservation::from_features(index, features),
        Err(e) => {
            tracing::warn!(frame = index, error = %e, "feature extraction failed");
            FrameObservation::no_face(index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FeatureExtractionError;
    use crate::source::{FrameDecodeError, FrameSource};
    use crate::types::{FaceFeatures, Landmark};
    use crate::verdict::VerdictLabel;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Frames carry their index in the red channel of pixel (0, 0) so the
    /// fake extractor can look up a scripted response.
    fn tagged_frame(index: u64) -> Frame {
        let mut frame = Frame::new(2, 2);
        frame.put_pixel(0, 0, image::Rgb([(index % 256) as u8, (index / 256) as u8, 0]));
        frame
    }

    fn frame_tag(frame: &Frame) -> u64 {
        let p = frame.get_pixel(0, 0);
        p[0] as u64 + p[1] as u64 * 256
    }

    enum Slot {
        Frame,
        DecodeError,
    }

    struct FakeSource {
        frame_count: u64,
        fps: f64,
        slots: VecDeque<Slot>,
        next_index: u64,
        cancel_after: Option<(u64, CancelToken)>,
    }

    impl FrameSource for FakeSource {
        fn frame_count(&self) -> u64 {
            self.frame_count
        }

        fn fps(&self) -> f64 {
            self.fps
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
            let index = self.next_index;
            self.next_index += 1;
            if let Some((after, token)) = &self.cancel_after {
                if index >= *after {
                    token.cancel();
                }
            }
            match self.slots.pop_front() {
                None => Ok(None),
                Some(Slot::Frame) => Ok(Some(tagged_frame(index))),
                Some(Slot::DecodeError) => Err(FrameDecodeError::BufferSize {
                    expected: 12,
                    got: 3,
                }),
            }
        }
    }

    /// Opener that hands out a scripted source once, or fails.
    struct FakeOpener {
        source: Mutex<Option<FakeSource>>,
    }

    impl FakeOpener {
        fn with_frames(frame_count: u64, decoded: usize) -> Self {
            Self::with_slots(frame_count, (0..decoded).map(|_| Slot::Frame).collect())
        }

        fn with_slots(frame_count: u64, slots: Vec<Slot>) -> Self {
            Self {
                source: Mutex::new(Some(FakeSource {
                    frame_count,
                    fps: 25.0,
                    slots: slots.into(),
                    next_index: 0,
                    cancel_after: None,
                })),
            }
        }

        fn failing() -> Self {
            Self {
                source: Mutex::new(None),
            }
        }
    }

    impl VideoOpener for FakeOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, SessionOpenError> {
            match self.source.lock().unwrap().take() {
                Some(source) => Ok(Box::new(source)),
                None => Err(SessionOpenError::new(path, "moov atom not found")),
            }
        }
    }

    /// Extractor whose response is a pure function of the frame index.
    struct FakeExtractor<F: FnMut(u64) -> Result<FaceFeatures, FeatureExtractionError>> {
        respond: F,
        seen: Vec<u64>,
    }

    impl<F> FakeExtractor<F>
    where
        F: FnMut(u64) -> Result<FaceFeatures, FeatureExtractionError>,
    {
        fn new(respond: F) -> Self {
            Self {
                respond,
                seen: Vec::new(),
            }
        }
    }

    impl<F> FaceFeatureExtractor for FakeExtractor<F>
    where
        F: FnMut(u64) -> Result<FaceFeatures, FeatureExtractionError> + Send,
    {
        fn extract(&mut self, frame: &Frame) -> Result<FaceFeatures, FeatureExtractionError> {
            let idx = frame_tag(frame);
            self.seen.push(idx);
            (self.respond)(idx)
        }
    }

    fn steady_face(_: u64) -> Result<FaceFeatures, FeatureExtractionError> {
        Ok(FaceFeatures {
            detection_score: Some(0.6),
            landmarks: Some(vec![Landmark::new(0.5, 0.5, 0.0); 200]),
        })
    }

    fn no_face(_: u64) -> Result<FaceFeatures, FeatureExtractionError> {
        Ok(FaceFeatures::default())
    }

    fn path() -> &'static Path {
        Path::new("/tmp/clip.mp4")
    }

    #[test]
    fn steady_face_is_real() {
        let opener = FakeOpener::with_frames(100, 100);
        let mut ex = FakeExtractor::new(steady_face);
        let v = analyze(&opener, &mut ex, path(), &CancelToken::new());
        assert_eq!(v.verdict, VerdictLabel::Real);
        assert!((v.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn samples_every_interval_until_budget() {
        // 1000 frames -> interval 20; all face-bearing -> 50 analyzed frames
        let opener = FakeOpener::with_frames(1000, 1000);
        let mut ex = FakeExtractor::new(steady_face);
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        assert_eq!(m.analyzed_frames, 50);
        assert_eq!(m.stability_pairs, 49);
        assert_eq!(ex.seen.len(), 50);
        assert!(ex.seen.iter().all(|i| i % 20 == 0));
        assert_eq!(ex.seen.first(), Some(&0));
        assert_eq!(ex.seen.last(), Some(&980));
        assert!((m.duration_secs - 40.0).abs() < 1e-9);
    }

    #[test]
    fn stops_at_budget_before_source_ends() {
        // unknown length -> every frame sampled; stops after 50 faces
        let opener = FakeOpener::with_frames(0, 500);
        let mut ex = FakeExtractor::new(steady_face);
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        assert_eq!(m.analyzed_frames, 50);
        assert_eq!(ex.seen.len(), 50);
        assert_eq!(m.duration_secs, 0.0);
    }

    #[test]
    fn faceless_frames_do_not_consume_budget() {
        // only even frames carry a face; 200 frames, interval 4
        let opener = FakeOpener::with_frames(200, 200);
        let mut ex = FakeExtractor::new(|i| if i % 8 == 0 { steady_face(i) } else { no_face(i) });
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        // sampled: 0,4,...,196 (50 frames), faces at multiples of 8 -> 25
        assert_eq!(ex.seen.len(), 50);
        assert_eq!(m.analyzed_frames, 25);
    }

    #[test]
    fn short_video_is_inconclusive() {
        let opener = FakeOpener::with_frames(3, 3);
        let mut ex = FakeExtractor::new(steady_face);
        let v = analyze(&opener, &mut ex, path(), &CancelToken::new());
        assert_eq!(v.verdict, VerdictLabel::Inconclusive);
        assert_eq!(v.confidence, 0.0);
        assert!(v.explanation.contains("Insufficient frames"));
    }

    #[test]
    fn open_failure_is_reported_in_verdict() {
        let opener = FakeOpener::failing();
        let mut ex = FakeExtractor::new(steady_face);
        let v = analyze(&opener, &mut ex, path(), &CancelToken::new());
        assert_eq!(v.verdict, VerdictLabel::Inconclusive);
        assert_eq!(v.confidence, 0.0);
        assert!(v.explanation.contains("moov atom not found"));
        assert!(ex.seen.is_empty());
    }

    #[test]
    fn extraction_errors_degrade_to_no_face() {
        let opener = FakeOpener::with_frames(20, 20);
        let mut ex = FakeExtractor::new(|i| {
            if i % 2 == 1 {
                Err(FeatureExtractionError::MalformedReply("truncated".into()))
            } else {
                steady_face(i)
            }
        });
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        assert_eq!(ex.seen.len(), 20);
        assert_eq!(m.analyzed_frames, 10);
    }

    #[test]
    fn decode_errors_skip_frame_but_advance_index() {
        let slots = vec![Slot::Frame, Slot::DecodeError, Slot::Frame, Slot::Frame];
        let opener = FakeOpener::with_slots(4, slots);
        let mut ex = FakeExtractor::new(steady_face);
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        assert_eq!(ex.seen, vec![0, 2, 3]);
        assert_eq!(m.analyzed_frames, 3);
    }

    #[test]
    fn persistent_decode_errors_end_walk() {
        let mut slots: Vec<Slot> = (0..100).map(|_| Slot::DecodeError).collect();
        slots.push(Slot::Frame);
        let opener = FakeOpener::with_slots(101, slots);
        let mut ex = FakeExtractor::new(steady_face);
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        assert!(ex.seen.is_empty());
        assert_eq!(m.analyzed_frames, 0);
    }

    #[test]
    fn cancellation_stops_walk() {
        let token = CancelToken::new();
        let opener = FakeOpener::with_frames(0, 1000);
        opener.source.lock().unwrap().as_mut().unwrap().cancel_after = Some((10, token.clone()));
        let mut ex = FakeExtractor::new(steady_face);

        let v = analyze(&opener, &mut ex, path(), &token);
        assert_eq!(v.verdict, VerdictLabel::Inconclusive);
        assert_eq!(v.confidence, 0.0);
        assert!(v.explanation.contains("cancelled"));
        assert!(ex.seen.len() <= 11);
    }

    #[test]
    fn pre_cancelled_token_does_no_work() {
        let token = CancelToken::new();
        token.cancel();
        let opener = FakeOpener::with_frames(100, 100);
        let mut ex = FakeExtractor::new(steady_face);
        let err = analyze_with_metrics(&opener, &mut ex, path(), &token).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
        assert!(ex.seen.is_empty());
    }

    #[test]
    fn jittery_landmarks_with_inconsistent_quality_are_fake() {
        let opener = FakeOpener::with_frames(50, 50);
        let mut ex = FakeExtractor::new(|i| {
            let offset = if i % 2 == 0 { 0.0 } else { 0.05 };
            let quality = if i % 2 == 0 { 0.99 } else { 0.2 };
            Ok(FaceFeatures {
                detection_score: Some(quality),
                landmarks: Some(vec![Landmark::new(0.5 + offset, 0.5, 0.0); 200]),
            })
        });
        let v = analyze(&opener, &mut ex, path(), &CancelToken::new());
        assert_eq!(v.verdict, VerdictLabel::Fake);
    }

    #[test]
    fn repeated_analysis_is_deterministic() {
        let respond = |i: u64| -> Result<FaceFeatures, FeatureExtractionError> {
            Ok(FaceFeatures {
                detection_score: Some(0.4 + (i % 7) as f32 * 0.05),
                landmarks: Some(vec![Landmark::new(0.5 + (i % 3) as f32 * 0.002, 0.5, 0.0); 200]),
            })
        };
        let run = || {
            let opener = FakeOpener::with_frames(300, 300);
            let mut ex = FakeExtractor::new(respond);
            analyze(&opener, &mut ex, path(), &CancelToken::new())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn one_face_frame_keeps_default_stability() {
        let opener = FakeOpener::with_frames(10, 10);
        let mut ex = FakeExtractor::new(|i| if i == 4 { steady_face(i) } else { no_face(i) });
        let m = analyze_with_metrics(&opener, &mut ex, path(), &CancelToken::new()).unwrap();
        assert_eq!(m.analyzed_frames, 1);
        assert_eq!(m.landmark_stability, 1.0);
    }
}
