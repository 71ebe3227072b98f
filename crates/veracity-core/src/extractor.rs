use std::time::Duration;

use thiserror::Error;

use crate::types::{FaceFeatures, Frame};

/// Feature extraction failed for one frame. The frame counts as faceless.
#[derive(Error, Debug)]
pub enum FeatureExtractionError {
    #[error("extractor I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed extractor reply: {0}")]
    MalformedReply(String),
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("extractor did not reply within {0:?}")]
    Timeout(Duration),
}

/// Face detection and landmark extraction for a single frame.
///
/// Takes `&mut self`: implementations are not required to be reentrant.
/// Callers that analyze videos concurrently give each worker its own instance.
pub trait FaceFeatureExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Result<FaceFeatures, FeatureExtractionError>;
}

impl<T: FaceFeatureExtractor + ?Sized> FaceFeatureExtractor for Box<T> {
    fn extract(&mut self, frame: &Frame) -> Result<FaceFeatures, FeatureExtractionError> {
        (**self).extract(frame)
    }
}
