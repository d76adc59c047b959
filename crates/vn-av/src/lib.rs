//! # vn-av
//!
//! External media-engine plumbing for vidnorm.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation and stderr streaming for running external processes.
//! - **Workspace management** ([`Workspace`]) -- per-job temporary directory
//!   next to the destination with atomic finalization.
//! - **Probing** ([`probe::FfprobeProber`]) -- structured metadata via
//!   `ffprobe -print_format json`.
//! - **Actions** ([`actions`]) -- stream-copy remux and re-encode.
//! - **Engine seam** ([`MediaEngine`]) -- the narrow capability trait the
//!   pipeline drives, implemented for real by [`FfmpegEngine`].

pub mod actions;
pub mod command;
pub mod engine;
pub mod probe;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use engine::{FfmpegEngine, MediaEngine, ProgressFn};
pub use probe::{FfprobeProber, MediaInfo, ProbeDepth, StreamInfo};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::Workspace;

pub use actions::{
    adaptive_crf, audio_encoder_for, fit_h264_level, h264_level_name, h264_max_frame_macroblocks,
    resolve_hw_accel, software_encoder_for, AudioEncode, EncodeProgress, HwAccel, ProgressParser,
    Quality, RemuxRequest, TranscodeRequest, VideoEncode,
};
