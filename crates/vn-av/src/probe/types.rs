//! Engine-level metadata types.
//!
//! [`MediaInfo`] mirrors what the inspection engine reports, with every
//! field optional where the engine may omit it. The pipeline derives its own
//! `Analysis` from it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vn_core::{Container, StreamKind};

/// How much work the prober does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeDepth {
    /// Container and stream headers only.
    #[default]
    Headers,
    /// Also demux the whole file to count packets per stream.
    CountFrames,
}

/// Structural metadata for one media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub container: Container,
    /// Raw engine format name (e.g. `"matroska,webm"`).
    pub format_name: String,
    pub duration: Option<Duration>,
    /// Streams in container order, cover art excluded.
    pub streams: Vec<StreamInfo>,
}

/// One elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec_name: String,
    pub profile: Option<String>,
    pub level: Option<i32>,
    /// Sample-entry tag (`"avc1"`, `"mp4a"`, ...), when the container has one.
    pub codec_tag: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    /// Packet count, present for [`ProbeDepth::CountFrames`] probes or when
    /// the container header records it.
    pub frame_count: Option<u64>,
    pub default: bool,
}

impl StreamInfo {
    /// A stream with only identity fields set.
    pub fn new(index: u32, kind: StreamKind, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec_name: codec_name.into(),
            profile: None,
            level: None,
            codec_tag: None,
            width: None,
            height: None,
            channels: None,
            sample_rate: None,
            frame_count: None,
            default: false,
        }
    }
}

impl MediaInfo {
    /// Streams of the given kind, in container order.
    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn has(&self, kind: StreamKind) -> bool {
        self.streams.iter().any(|s| s.kind == kind)
    }

    /// The stream a player would pick for `kind`: the first one flagged
    /// default, else the first one.
    pub fn primary(&self, kind: StreamKind) -> Option<&StreamInfo> {
        self.streams_of(kind)
            .find(|s| s.default)
            .or_else(|| self.streams_of(kind).next())
    }

    /// Stream kinds in container order.
    pub fn stream_order(&self) -> Vec<StreamKind> {
        self.streams.iter().map(|s| s.kind).collect()
    }

    /// Whether any audio or video stream is present.
    pub fn has_decodable_streams(&self) -> bool {
        self.has(StreamKind::Video) || self.has(StreamKind::Audio)
    }
}
