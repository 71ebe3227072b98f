use chrono::{DateTime, Utc};
use serde::Serialize;
use veracity_core::{Verdict, VerdictLabel};

use crate::validation::ValidatedVideo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMethod {
    Video,
}

/// Verification record returned to API clients.
///
/// Video analysis cites no fact-check sources, so `sources` is always empty.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub id: String,
    pub input_text: String,
    pub input_method: InputMethod,
    pub verdict: VerdictLabel,
    pub confidence: f32,
    pub explanation: String,
    pub sources: Vec<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub additional_data: Option<serde_json::Value>,
}

impl VerificationResult {
    pub fn for_video(video: &ValidatedVideo, verdict: Verdict) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input_text: format!("Video analysis: {}", video.filename),
            input_method: InputMethod::Video,
            verdict: verdict.verdict,
            confidence: verdict.confidence,
            explanation: verdict.explanation,
            sources: Vec::new(),
            timestamp: Utc::now(),
            additional_data: Some(serde_json::json!({
                "filename": video.filename,
                "file_size": video.size,
            })),
        }
    }
}
