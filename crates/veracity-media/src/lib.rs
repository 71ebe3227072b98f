//! Concrete collaborators for the Veracity pipeline.
//!
//! - [`FfmpegOpener`] decodes videos by piping raw RGB frames out of `ffmpeg`.
//! - [`LandmarkHelper`] runs face detection and landmarking in an external
//!   helper process that speaks a line-oriented JSON protocol.

pub mod ffmpeg;
pub mod helper;

pub use ffmpeg::{FfmpegOpener, FfmpegSource, ProbeError, StreamInfo};
pub use helper::{HelperCommand, HelperError, LandmarkHelper};
