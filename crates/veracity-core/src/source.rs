use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::Frame;

/// The video could not be opened or probed. Fatal to the whole analysis.
#[derive(Error, Debug)]
#[error("could not open video {}: {reason}", path.display())]
pub struct SessionOpenError {
    pub path: PathBuf,
    pub reason: String,
}

impl SessionOpenError {
    pub fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// A single frame could not be decoded. The walk skips it and continues.
#[derive(Error, Debug)]
pub enum FrameDecodeError {
    #[error("frame read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoded frame buffer has {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
}

/// A decoded, in-order stream of frames from one video.
pub trait FrameSource: Send {
    /// Total frame count as reported by the container; 0 when unknown.
    fn frame_count(&self) -> u64;

    /// Nominal frame rate; 0 when unknown.
    fn fps(&self) -> f64;

    /// Next frame in decode order, or `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError>;
}

/// Opens a video file as a [`FrameSource`].
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, SessionOpenError>;
}

/// Per-call analysis context.
///
/// Owns the opened frame source; dropping the session releases it.
pub struct VideoAnalysisSession {
    path: PathBuf,
    frame_count: u64,
    fps: f64,
    source: Box<dyn FrameSource>,
}

impl VideoAnalysisSession {
    pub fn open(opener: &dyn VideoOpener, path: &Path) -> Result<Self, SessionOpenError> {
        let source = opener.open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            frame_count: source.frame_count(),
            fps: source.fps(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Duration in seconds derived from frame count and rate; 0 when the rate is unknown.
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn FrameSource {
        self.source.as_mut()
    }
}

impl std::fmt::Debug for VideoAnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoAnalysisSession")
            .field("path", &self.path)
            .field("frame_count", &self.frame_count)
            .field("fps", &self.fps)
            .finish_non_exhaustive()
    }
}
