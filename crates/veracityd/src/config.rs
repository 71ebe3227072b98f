use std::path::PathBuf;
use std::time::Duration;

use veracity_media::HelperCommand;

const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
const DEFAULT_ALLOWED_FORMATS: &str = ".mp4,.avi,.mov,.mkv";

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Landmark helper executable.
    pub helper_program: PathBuf,
    /// Extra arguments passed to the landmark helper.
    pub helper_args: Vec<String>,
    /// Directory holding the helper's model files and their `SHA256SUMS`.
    pub model_dir: PathBuf,
    /// Seconds to wait for the helper's reply to one frame.
    pub helper_timeout_secs: u64,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Number of analysis worker threads, each with its own helper process.
    pub workers: usize,
    /// Timeout in seconds for one video analysis.
    pub analysis_timeout_secs: u64,
    /// Largest accepted video, in bytes.
    pub max_file_size: u64,
    /// Accepted file extensions, lowercase with leading dot.
    pub allowed_formats: Vec<String>,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `VERACITY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            helper_program: std::env::var("VERACITY_HELPER_COMMAND")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("veracity-landmarks")),
            helper_args: std::env::var("VERACITY_HELPER_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            model_dir: veracity_models::default_model_dir(),
            helper_timeout_secs: env_u64("VERACITY_HELPER_TIMEOUT_SECS", 10).max(1),
            ffmpeg_path: std::env::var("VERACITY_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            ffprobe_path: std::env::var("VERACITY_FFPROBE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffprobe")),
            workers: env_usize("VERACITY_WORKERS", 2).max(1),
            analysis_timeout_secs: env_u64("VERACITY_ANALYSIS_TIMEOUT_SECS", 300),
            max_file_size: env_u64("VERACITY_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE),
            allowed_formats: parse_formats(
                &std::env::var("VERACITY_ALLOWED_FORMATS")
                    .unwrap_or_else(|_| DEFAULT_ALLOWED_FORMATS.to_string()),
            ),
            session_bus: std::env::var("VERACITY_SESSION_BUS").is_ok(),
        }
    }

    /// Command line used to launch one landmark helper.
    pub fn helper_command(&self) -> HelperCommand {
        HelperCommand::new(self.helper_program.clone(), self.helper_args.clone())
            .with_model_dir(self.model_dir.clone())
            .with_reply_timeout(Duration::from_secs(self.helper_timeout_secs))
    }
}

/// Split a comma-separated extension list, normalizing to lowercase `.ext`.
pub fn parse_formats(list: &str) -> Vec<String> {
    list.split(',')
        .map(|f| f.trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty() && f != ".")
        .map(|f| if f.starts_with('.') { f } else { format!(".{f}") })
        .collect()
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_are_normalized() {
        assert_eq!(
            parse_formats(".MP4, mov ,,.mkv,."),
            vec![".mp4", ".mov", ".mkv"]
        );
    }

    #[test]
    fn helper_command_carries_model_dir_and_timeout() {
        let config = Config {
            helper_program: PathBuf::from("/usr/libexec/veracity-landmarks"),
            helper_args: vec!["--gpu".into()],
            model_dir: PathBuf::from("/var/lib/veracity/models"),
            helper_timeout_secs: 7,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            workers: 2,
            analysis_timeout_secs: 300,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_formats: parse_formats(DEFAULT_ALLOWED_FORMATS),
            session_bus: false,
        };
        let cmd = config.helper_command();
        assert_eq!(cmd.program, PathBuf::from("/usr/libexec/veracity-landmarks"));
        assert_eq!(cmd.args, vec!["--gpu".to_string()]);
        assert_eq!(cmd.model_dir, Some(PathBuf::from("/var/lib/veracity/models")));
        assert_eq!(cmd.reply_timeout, Duration::from_secs(7));
    }

    #[test]
    fn default_formats() {
        assert_eq!(
            parse_formats(DEFAULT_ALLOWED_FORMATS),
            vec![".mp4", ".avi", ".mov", ".mkv"]
        );
    }
}
