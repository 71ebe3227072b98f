use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use thiserror::Error;
use veracity_core::{Frame, FrameDecodeError, FrameSource, SessionOpenError, VideoOpener};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ffprobe exited with {0}")]
    Failed(std::process::ExitStatus),
    #[error("unparseable ffprobe output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no video stream found")]
    NoVideoStream,
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Properties of the first video stream of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// 0 when neither the container nor the duration gives a frame count.
    pub frame_count: u64,
    pub fps: f64,
}

impl StreamInfo {
    /// Bytes per decoded rgb24 frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: Option<ProbeTags>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

/// Older ffprobe builds report rotation only as a `rotate` tag.
#[derive(Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rational like `30000/1001`. Returns 0 for anything unusable.
pub fn parse_frame_rate(rate: &str) -> f64 {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => rate.trim().parse().unwrap_or(0.0),
    };
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

impl ProbeStream {
    /// Display rotation in degrees, normalized to `0..360`.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .filter(|r| r.is_finite())
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360) as u32
    }
}

/// Extract [`StreamInfo`] from `ffprobe -print_format json` output.
///
/// ffmpeg applies the display rotation while decoding, so for streams rotated
/// by 90 or 270 degrees the reported frame size is the stored size transposed.
pub fn parse_probe_output(json: &[u8]) -> Result<StreamInfo, ProbeError> {
    let output: ProbeOutput = serde_json::from_slice(json)?;
    let stream = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref().map_or(true, |t| t == "video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(ProbeError::InvalidDimensions { width, height });
    }
    let (width, height) = match stream.rotation() {
        90 | 270 => (height, width),
        _ => (width, height),
    };

    let fps = [&stream.r_frame_rate, &stream.avg_frame_rate]
        .into_iter()
        .flatten()
        .map(|r| parse_frame_rate(r))
        .find(|&r| r > 0.0)
        .unwrap_or(0.0);

    let duration = stream
        .duration
        .as_deref()
        .or(output.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .or_else(|| duration.map(|d| (d * fps).round() as u64))
        .unwrap_or(0);

    Ok(StreamInfo {
        width,
        height,
        frame_count,
        fps,
    })
}

/// Run ffprobe against `path`.
pub fn probe(ffprobe: &Path, path: &Path) -> Result<StreamInfo, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|source| ProbeError::Spawn {
            program: ffprobe.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProbeError::Failed(output.status));
    }
    parse_probe_output(&output.stdout)
}

/// Opens videos through the system `ffprobe`/`ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegOpener {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for FfmpegOpener {
    /// Resolve both binaries through `PATH`.
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, SessionOpenError> {
        let info = probe(&self.ffprobe, path).map_err(|e| SessionOpenError::new(path, e.to_string()))?;
        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            frames = info.frame_count,
            fps = info.fps,
            "probed video"
        );
        let source = FfmpegSource::spawn(&self.ffmpeg, path, info)
            .map_err(|e| SessionOpenError::new(path, format!("failed to start decoder: {e}")))?;
        Ok(Box::new(source))
    }
}

/// Frames read from an `ffmpeg` child decoding to raw rgb24 on stdout.
///
/// The child is killed and reaped when the source is dropped.
pub struct FfmpegSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    info: StreamInfo,
    finished: bool,
}

impl FfmpegSource {
    pub fn spawn(ffmpeg: &Path, path: &Path, info: StreamInfo) -> std::io::Result<Self> {
        let mut child = Command::new(ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "ffmpeg stdout not captured"))?;
        Ok(Self {
            child,
            stdout: BufReader::with_capacity(info.frame_len().max(8192), stdout),
            info,
            finished: false,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one rgb24 frame of `width`x`height`. `Ok(None)` at end of stream,
/// including a truncated trailing frame.
fn read_frame(reader: &mut impl Read, width: u32, height: u32) -> Result<Option<Frame>, FrameDecodeError> {
    let expected = width as usize * height as usize * 3;
    let mut buf = vec![0u8; expected];
    let got = read_full(reader, &mut buf)?;
    if got < expected {
        if got > 0 {
            tracing::debug!(expected, got, "discarding truncated trailing frame");
        }
        return Ok(None);
    }
    Frame::from_raw(width, height, buf)
        .map(Some)
        .ok_or(FrameDecodeError::BufferSize { expected, got })
}

impl FrameSource for FfmpegSource {
    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn fps(&self) -> f64 {
        self.info.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        if self.finished {
            return Ok(None);
        }
        let frame = read_frame(&mut self.stdout, self.info.width, self.info.height);
        if matches!(frame, Ok(None)) {
            self.finished = true;
        }
        frame
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
