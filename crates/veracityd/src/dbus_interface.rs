use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zbus::interface;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::report::VerificationResult;
use crate::validation::{validate_video, ValidationError};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub analyses_completed: AtomicU64,
}

impl AppState {
    pub fn new(config: Config, engine: EngineHandle) -> Self {
        Self {
            config,
            engine,
            analyses_completed: AtomicU64::new(0),
        }
    }
}

/// D-Bus interface for the Veracity analysis daemon.
///
/// Bus name: org.freedesktop.Veracity1
/// Object path: /org/freedesktop/Veracity1
pub struct VeracityService {
    pub state: Arc<AppState>,
}

fn validation_to_fdo(err: &ValidationError) -> zbus::fdo::Error {
    match err {
        ValidationError::NotFound(_) => zbus::fdo::Error::FileNotFound(err.to_string()),
        ValidationError::Io { .. } => zbus::fdo::Error::Failed(err.to_string()),
        _ => zbus::fdo::Error::InvalidArgs(err.to_string()),
    }
}

fn engine_to_fdo(err: &EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Timeout(_) => zbus::fdo::Error::TimedOut(err.to_string()),
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}

#[interface(name = "org.freedesktop.Veracity1")]
impl VeracityService {
    /// Analyze a video file for deepfake indicators.
    ///
    /// Returns the verification record as JSON. Analysis problems inside the
    /// video produce an inconclusive record; bad requests and timeouts are
    /// D-Bus errors.
    async fn analyze_video(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "analyze_video requested");
        let config = &self.state.config;

        let video = validate_video(Path::new(path), &config.allowed_formats, config.max_file_size)
            .map_err(|e| {
                tracing::warn!(path, error = %e, "analyze_video: rejected");
                validation_to_fdo(&e)
            })?;

        let timeout = Duration::from_secs(config.analysis_timeout_secs);
        let verdict = self
            .state
            .engine
            .analyze(video.path.clone(), timeout)
            .await
            .map_err(|e| {
                tracing::error!(path, error = %e, "analyze_video failed");
                engine_to_fdo(&e)
            })?;

        self.state.analyses_completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            path,
            verdict = %verdict.verdict,
            confidence = verdict.confidence,
            "analysis complete"
        );

        let record = VerificationResult::for_video(&video, verdict);
        serde_json::to_string(&record).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = &self.state;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workers": state.engine.workers(),
            "analyses_completed": state.analyses_completed.load(Ordering::Relaxed),
            "analysis_timeout_secs": state.config.analysis_timeout_secs,
            "allowed_formats": state.config.allowed_formats,
            "max_file_size": state.config.max_file_size,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_file_maps_to_file_not_found() {
        let err = ValidationError::NotFound(PathBuf::from("/videos/gone.mp4"));
        assert!(matches!(
            validation_to_fdo(&err),
            zbus::fdo::Error::FileNotFound(msg) if msg.contains("gone.mp4")
        ));
    }

    #[test]
    fn bad_requests_map_to_invalid_args() {
        let errs = [
            ValidationError::RelativePath(PathBuf::from("clip.mp4")),
            ValidationError::NotAFile(PathBuf::from("/videos")),
            ValidationError::UnsupportedFormat {
                found: ".gif".into(),
                allowed: ".mp4".into(),
            },
            ValidationError::TooLarge { size: 10, max: 5 },
        ];
        for err in &errs {
            assert!(matches!(validation_to_fdo(err), zbus::fdo::Error::InvalidArgs(_)));
        }
    }

    #[test]
    fn timeout_maps_to_timed_out() {
        let err = EngineError::Timeout(Duration::from_secs(300));
        assert!(matches!(
            engine_to_fdo(&err),
            zbus::fdo::Error::TimedOut(msg) if msg.contains("300s")
        ));
        assert!(matches!(
            engine_to_fdo(&EngineError::ChannelClosed),
            zbus::fdo::Error::Failed(_)
        ));
    }
}
