//! Media-domain enums for containers, codecs, stream kinds, issues, and
//! remediation methods.
//!
//! All enums serialize in lowercase (snake_case for multi-word variants) and
//! implement `Display` manually for consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Container families as reported by the media-inspection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// ISO BMFF family (mp4, mov, m4v, 3gp).
    Mp4,
    Mkv,
    Webm,
    Avi,
    /// MPEG transport stream.
    Ts,
    Flv,
    Other,
}

impl Container {
    /// Map an ffprobe `format_name` (e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`).
    pub fn from_format_name(format_name: &str) -> Self {
        let lower = format_name.to_ascii_lowercase();
        let names: Vec<&str> = lower.split(',').map(str::trim).collect();
        if names.iter().any(|n| matches!(*n, "mp4" | "mov" | "m4a" | "3gp")) {
            Self::Mp4
        } else if names.contains(&"matroska") {
            // ffprobe reports "matroska,webm" for both; the caller refines by
            // codec or extension when it matters.
            Self::Mkv
        } else if names.contains(&"webm") {
            Self::Webm
        } else if names.contains(&"avi") {
            Self::Avi
        } else if names.contains(&"mpegts") {
            Self::Ts
        } else if names.contains(&"flv") {
            Self::Flv
        } else {
            Self::Other
        }
    }

    /// File extension used for outputs in this container.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
            Self::Avi => "avi",
            Self::Ts => "ts",
            Self::Flv => "flv",
            Self::Other => "bin",
        }
    }

    /// ffmpeg muxer name for this container, if vidnorm can write it.
    pub fn muxer(&self) -> Option<&'static str> {
        match self {
            Self::Mp4 => Some("mp4"),
            Self::Mkv => Some("matroska"),
            Self::Webm => Some("webm"),
            _ => None,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "mp4"),
            Self::Mkv => write!(f, "mkv"),
            Self::Webm => write!(f, "webm"),
            Self::Avi => write!(f, "avi"),
            Self::Ts => write!(f, "ts"),
            Self::Flv => write!(f, "flv"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// VideoCodec
// ---------------------------------------------------------------------------

/// Canonical video codec identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
    Vp8,
    Vp9,
    Mpeg4,
    Mpeg2,
    Other,
}

impl VideoCodec {
    /// Map an ffprobe `codec_name`.
    pub fn from_codec_name(codec_name: &str) -> Self {
        match codec_name.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "avc1" => Self::H264,
            "hevc" | "h265" => Self::H265,
            "av1" | "libdav1d" | "libaom-av1" => Self::Av1,
            "vp8" => Self::Vp8,
            "vp9" => Self::Vp9,
            "mpeg4" => Self::Mpeg4,
            "mpeg2video" | "mpeg1video" => Self::Mpeg2,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::H265 => write!(f, "h265"),
            Self::Av1 => write!(f, "av1"),
            Self::Vp8 => write!(f, "vp8"),
            Self::Vp9 => write!(f, "vp9"),
            Self::Mpeg4 => write!(f, "mpeg4"),
            Self::Mpeg2 => write!(f, "mpeg2"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioCodec
// ---------------------------------------------------------------------------

/// Canonical audio codec identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    Vorbis,
    Ac3,
    Eac3,
    Flac,
    Pcm,
    Other,
}

impl AudioCodec {
    /// Map an ffprobe `codec_name`.
    pub fn from_codec_name(codec_name: &str) -> Self {
        let lower = codec_name.to_ascii_lowercase();
        match lower.as_str() {
            "aac" | "aac_latm" => Self::Aac,
            "mp3" | "mp3float" => Self::Mp3,
            "opus" => Self::Opus,
            "vorbis" => Self::Vorbis,
            "ac3" => Self::Ac3,
            "eac3" => Self::Eac3,
            "flac" => Self::Flac,
            _ if lower.starts_with("pcm_") => Self::Pcm,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aac => write!(f, "aac"),
            Self::Mp3 => write!(f, "mp3"),
            Self::Opus => write!(f, "opus"),
            Self::Vorbis => write!(f, "vorbis"),
            Self::Ac3 => write!(f, "ac3"),
            Self::Eac3 => write!(f, "eac3"),
            Self::Flac => write!(f, "flac"),
            Self::Pcm => write!(f, "pcm"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamKind
// ---------------------------------------------------------------------------

/// Kind of an elementary stream inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

impl StreamKind {
    /// Map an ffprobe `codec_type`.
    pub fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "subtitle" => Self::Subtitle,
            _ => Self::Data,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
            Self::Data => write!(f, "data"),
        }
    }
}

// ---------------------------------------------------------------------------
// IssueType / Severity
// ---------------------------------------------------------------------------

/// Closed set of compatibility problems the detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    StreamOrder,
    AudioCodec,
    VideoCodec,
    Container,
    ProfileMismatch,
}

impl IssueType {
    /// Whether a lossless repackage can resolve this issue class.
    pub fn is_repackage_class(&self) -> bool {
        !matches!(self, Self::VideoCodec)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamOrder => write!(f, "stream_order"),
            Self::AudioCodec => write!(f, "audio_codec"),
            Self::VideoCodec => write!(f, "video_codec"),
            Self::Container => write!(f, "container"),
            Self::ProfileMismatch => write!(f, "profile_mismatch"),
        }
    }
}

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// Remediation method chosen for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    None,
    QuickFix,
    FullConversion,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::QuickFix => write!(f, "quick_fix"),
            Self::FullConversion => write!(f, "full_conversion"),
        }
    }
}
