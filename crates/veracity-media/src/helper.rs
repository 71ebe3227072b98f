//! Face detection and landmarking through an external helper process.
//!
//! The helper wraps whatever detector and mesh model the deployment uses and
//! talks over stdin/stdout:
//!
//! ```text
//! helper  -> {"ready": true}
//! service -> {"width": W, "height": H}\n  followed by W*H*3 raw RGB bytes
//! helper  -> {"detections": [{"score": 0.93}], "landmarks": [[x, y, z], ...]}
//! ```
//!
//! The first detection is the primary face. `landmarks` is `null` when the
//! mesh model found nothing. A reply that does not arrive within the reply
//! timeout, or any I/O or protocol failure, tears the process down. It is
//! restarted on a later frame, with a growing delay while restarts keep failing.

use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use veracity_core::{FaceFeatureExtractor, FaceFeatures, FeatureExtractionError, Frame, Landmark};

/// Detector confidence assumed when the helper reports a face without a score.
const DEFAULT_DETECTION_SCORE: f32 = 0.5;

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// Model loading happens before the greeting, so startup gets a longer deadline.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

const RESTART_BACKOFF_BASE: Duration = Duration::from_millis(500);
const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("failed to start landmark helper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("landmark helper handshake failed: {0}")]
    Handshake(String),
    #[error("landmark helper I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How to launch the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Exported to the helper as `VERACITY_MODEL_DIR`.
    pub model_dir: Option<PathBuf>,
    /// Longest wait for one frame's reply before the helper is killed.
    pub reply_timeout: Duration,
    /// Longest wait for the `ready` greeting.
    pub startup_timeout: Duration,
}

impl HelperCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model_dir: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct Ready {
    ready: bool,
}

#[derive(Deserialize)]
struct Detection {
    score: Option<f32>,
}

#[derive(Deserialize)]
struct HelperReply {
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    landmarks: Option<Vec<Vec<f32>>>,
}

/// Translate one reply line into [`FaceFeatures`].
pub fn parse_reply(line: &str) -> Result<FaceFeatures, FeatureExtractionError> {
    let reply: HelperReply = serde_json::from_str(line.trim())
        .map_err(|e| FeatureExtractionError::MalformedReply(e.to_string()))?;

    let detection_score = reply
        .detections
        .first()
        .map(|d| d.score.unwrap_or(DEFAULT_DETECTION_SCORE));

    let landmarks = match reply.landmarks {
        None => None,
        Some(points) => Some(
            points
                .iter()
                .map(|p| match p.as_slice() {
                    [x, y] => Ok(Landmark::new(*x, *y, 0.0)),
                    [x, y, z, ..] => Ok(Landmark::new(*x, *y, *z)),
                    _ => Err(FeatureExtractionError::MalformedReply(format!(
                        "landmark with {} coordinates",
                        p.len()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };

    Ok(FaceFeatures {
        detection_score,
        landmarks,
    })
}

fn read_line(reader: &mut impl BufRead) -> std::io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "landmark helper closed its output",
        ));
    }
    Ok(line)
}

fn write_frame(writer: &mut impl Write, frame: &Frame) -> std::io::Result<()> {
    let header = FrameHeader {
        width: frame.width(),
        height: frame.height(),
    };
    serde_json::to_writer(&mut *writer, &header)?;
    writer.write_all(b"\n")?;
    writer.write_all(frame.as_raw())?;
    writer.flush()
}

/// Pipe I/O for one helper process: forwards the greeting, then one reply per frame.
///
/// Runs on its own thread so the caller can stop waiting on a hung helper.
/// Exits on the first I/O error or when either channel closes.
fn run_io(
    stdin: ChildStdin,
    stdout: ChildStdout,
    frames: mpsc::Receiver<Frame>,
    replies: mpsc::Sender<std::io::Result<String>>,
) {
    let mut stdin = BufWriter::new(stdin);
    let mut stdout = BufReader::new(stdout);

    let greeting = read_line(&mut stdout);
    let ok = greeting.is_ok();
    if replies.send(greeting).is_err() || !ok {
        return;
    }

    for frame in frames {
        let reply = write_frame(&mut stdin, &frame).and_then(|()| read_line(&mut stdout));
        let ok = reply.is_ok();
        if replies.send(reply).is_err() || !ok {
            return;
        }
    }
}

fn io_thread_gone() -> std::io::Error {
    std::io::Error::new(ErrorKind::BrokenPipe, "landmark helper I/O thread exited")
}

struct HelperProcess {
    child: Child,
    frames: mpsc::Sender<Frame>,
    replies: mpsc::Receiver<std::io::Result<String>>,
    reply_timeout: Duration,
}

impl HelperProcess {
    fn spawn(command: &HelperCommand) -> Result<Self, HelperError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.model_dir {
            cmd.env("VERACITY_MODEL_DIR", dir);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| HelperError::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HelperError::Handshake("helper pipes not captured".into()));
        };

        let (frame_tx, frame_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let io = std::thread::Builder::new()
            .name("veracity-helper-io".into())
            .spawn(move || run_io(stdin, stdout, frame_rx, reply_tx));
        if let Err(e) = io {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HelperError::Io(e));
        }

        let process = Self {
            child,
            frames: frame_tx,
            replies: reply_rx,
            reply_timeout: command.reply_timeout,
        };

        let line = match process.replies.recv_timeout(command.startup_timeout) {
            Ok(greeting) => greeting?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(HelperError::Handshake(format!(
                    "no greeting within {:?}",
                    command.startup_timeout
                )));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(HelperError::Io(io_thread_gone())),
        };
        let ready: Ready = serde_json::from_str(line.trim())
            .map_err(|e| HelperError::Handshake(format!("unexpected greeting {line:?}: {e}")))?;
        if !ready.ready {
            return Err(HelperError::Handshake("helper reported not ready".into()));
        }
        Ok(process)
    }

    fn exchange(&mut self, frame: &Frame) -> Result<FaceFeatures, FeatureExtractionError> {
        self.frames
            .send(frame.clone())
            .map_err(|_| FeatureExtractionError::Io(io_thread_gone()))?;

        match self.replies.recv_timeout(self.reply_timeout) {
            Ok(reply) => parse_reply(&reply?),
            Err(RecvTimeoutError::Timeout) => Err(FeatureExtractionError::Timeout(self.reply_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(FeatureExtractionError::Io(io_thread_gone())),
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        // Killing the child unblocks the I/O thread with EOF or EPIPE.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Wait before the next restart attempt after `failures` consecutive failures.
///
/// The first failure restarts immediately; after that the delay doubles up to a cap.
fn restart_delay(failures: u32) -> Duration {
    if failures <= 1 {
        return Duration::ZERO;
    }
    let exponent = (failures - 2).min(16);
    RESTART_BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(RESTART_BACKOFF_MAX)
}

/// [`FaceFeatureExtractor`] backed by a landmark helper process.
///
/// One instance owns one process and is not shareable; give each worker its own.
pub struct LandmarkHelper {
    command: HelperCommand,
    process: Option<HelperProcess>,
    failures: u32,
    retry_at: Option<Instant>,
}

impl LandmarkHelper {
    /// Launch the helper and wait for its greeting.
    pub fn start(command: HelperCommand) -> Result<Self, HelperError> {
        let process = HelperProcess::spawn(&command)?;
        tracing::info!(program = %command.program.display(), "landmark helper started");
        Ok(Self {
            command,
            process: Some(process),
            failures: 0,
            retry_at: None,
        })
    }

    pub fn command(&self) -> &HelperCommand {
        &self.command
    }

    fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        let delay = restart_delay(self.failures);
        self.retry_at = (!delay.is_zero()).then(|| Instant::now() + delay);
        if !delay.is_zero() {
            tracing::warn!(failures = self.failures, ?delay, "landmark helper backing off");
        }
    }
}

impl FaceFeatureExtractor for LandmarkHelper {
    fn extract(&mut self, frame: &Frame) -> Result<FaceFeatures, FeatureExtractionError> {
        if self.process.is_none() {
            if self.retry_at.is_some_and(|at| Instant::now() < at) {
                return Err(FeatureExtractionError::Unavailable(
                    "landmark helper restart backing off".into(),
                ));
            }
            tracing::info!(program = %self.command.program.display(), "restarting landmark helper");
            match HelperProcess::spawn(&self.command) {
                Ok(process) => self.process = Some(process),
                Err(e) => {
                    self.record_failure();
                    return Err(FeatureExtractionError::Unavailable(e.to_string()));
                }
            }
        }
        let Some(process) = self.process.as_mut() else {
            return Err(FeatureExtractionError::Unavailable("landmark helper not running".into()));
        };

        let result = process.exchange(frame);
        match &result {
            Ok(_) => {
                self.failures = 0;
                self.retry_at = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "landmark helper failed, dropping process");
                self.process = None;
                self.record_failure();
            }
        }
        result
    }
}
