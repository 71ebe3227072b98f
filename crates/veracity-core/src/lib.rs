//! Core of the Veracity video deepfake analysis pipeline.
//!
//! The pipeline walks a video through a [`FrameSampler`], hands each selected
//! frame to a [`FaceFeatureExtractor`], folds the observations through a
//! [`StabilityTracker`] and [`MetricsAccumulator`], and finally maps the
//! aggregated statistics to a [`Verdict`].
//!
//! Decoding and face/landmark models live behind the [`VideoOpener`] and
//! [`FaceFeatureExtractor`] traits; this crate never touches a codec or a model.

pub mod extractor;
pub mod metrics;
pub mod pipeline;
pub mod sampler;
pub mod source;
pub mod stability;
pub mod types;
pub mod verdict;

pub use extractor::{FaceFeatureExtractor, FeatureExtractionError};
pub use metrics::MetricsAccumulator;
pub use pipeline::{analyze, analyze_with_metrics, AnalysisError, CancelToken};
pub use sampler::FrameSampler;
pub use source::{FrameDecodeError, FrameSource, SessionOpenError, VideoAnalysisSession, VideoOpener};
pub use stability::StabilityTracker;
pub use types::{AggregateMetrics, FaceFeatures, Frame, FrameObservation, Landmark, StabilityScore};
pub use verdict::{Verdict, VerdictLabel};
