//! The per-file [`Analysis`] record.
//!
//! An `Analysis` is built once from a probe result and never changes
//! afterwards. Derived flags (`needs_*`, the chosen method) are computed at
//! construction so every consumer sees the same answer.

use std::path::{Path, PathBuf};

use serde::Serialize;
use vn_av::{MediaInfo, StreamInfo};
use vn_core::{AudioCodec, Container, IssueType, Method, StreamKind, VideoCodec};

use crate::decision::DecisionEngine;
use crate::detect::{IssueDetector, IssueSet};

/// Frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Structural and compatibility facts about one source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    path: PathBuf,
    container: Container,
    duration_seconds: Option<f64>,
    resolution: Option<Resolution>,
    video_codec: Option<VideoCodec>,
    video_codec_name: Option<String>,
    video_profile: Option<String>,
    video_level: Option<i32>,
    audio_codec: Option<AudioCodec>,
    audio_codec_name: Option<String>,
    audio_profile: Option<String>,
    audio_codec_tag: Option<String>,
    stream_order: Vec<StreamKind>,
    issues: IssueSet,
    needs_normalization: bool,
    needs_quick_fix: bool,
    needs_full_conversion: bool,
    method: Method,
    #[serde(skip)]
    media: MediaInfo,
}

impl Analysis {
    /// Build an analysis from a probe result, running `detector` over it.
    pub fn from_media(media: MediaInfo, detector: &IssueDetector) -> Self {
        let mut analysis = Self::observe(media);
        let issues = detector.detect(&analysis);
        analysis.needs_normalization = !issues.is_empty();
        analysis.needs_quick_fix = issues.iter().any(|i| i.kind.is_repackage_class());
        analysis.needs_full_conversion = issues.contains(IssueType::VideoCodec);
        analysis.method = DecisionEngine::decide(&issues);
        analysis.issues = issues;
        analysis
    }

    /// Facts only, no issues yet.
    pub(crate) fn observe(media: MediaInfo) -> Self {
        let video = media.primary(StreamKind::Video);
        let audio = media.primary(StreamKind::Audio);

        let resolution = video.and_then(|v| match (v.width, v.height) {
            (Some(width), Some(height)) => Some(Resolution { width, height }),
            _ => None,
        });

        Self {
            path: media.file_path.clone(),
            container: media.container,
            duration_seconds: media.duration.map(|d| d.as_secs_f64()),
            resolution,
            video_codec: video.map(|v| VideoCodec::from_codec_name(&v.codec_name)),
            video_codec_name: video.map(|v| v.codec_name.clone()),
            video_profile: video.and_then(|v| v.profile.clone()),
            video_level: video.and_then(|v| v.level),
            audio_codec: audio.map(|a| AudioCodec::from_codec_name(&a.codec_name)),
            audio_codec_name: audio.map(|a| a.codec_name.clone()),
            audio_profile: audio.and_then(|a| a.profile.clone()),
            audio_codec_tag: audio.and_then(|a| a.codec_tag.clone()),
            stream_order: media.stream_order(),
            issues: IssueSet::default(),
            needs_normalization: false,
            needs_quick_fix: false,
            needs_full_conversion: false,
            method: Method::None,
            media,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> Container {
        self.container
    }

    /// Best effort; `None` when the container does not record it.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video_codec
    }

    /// Raw engine codec name of the primary video stream.
    pub fn video_codec_name(&self) -> Option<&str> {
        self.video_codec_name.as_deref()
    }

    pub fn video_profile(&self) -> Option<&str> {
        self.video_profile.as_deref()
    }

    pub fn video_level(&self) -> Option<i32> {
        self.video_level
    }

    pub fn audio_codec(&self) -> Option<AudioCodec> {
        self.audio_codec
    }

    pub fn audio_codec_name(&self) -> Option<&str> {
        self.audio_codec_name.as_deref()
    }

    pub fn audio_profile(&self) -> Option<&str> {
        self.audio_profile.as_deref()
    }

    pub fn audio_codec_tag(&self) -> Option<&str> {
        self.audio_codec_tag.as_deref()
    }

    pub fn stream_order(&self) -> &[StreamKind] {
        &self.stream_order
    }

    pub fn issues(&self) -> &IssueSet {
        &self.issues
    }

    pub fn needs_normalization(&self) -> bool {
        self.needs_normalization
    }

    /// Some repackage-class issue is present.
    pub fn needs_quick_fix(&self) -> bool {
        self.needs_quick_fix
    }

    /// A `video_codec` issue is present.
    pub fn needs_full_conversion(&self) -> bool {
        self.needs_full_conversion
    }

    /// The method chosen by the dominance rule.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The probe result this analysis was built from.
    pub fn media(&self) -> &MediaInfo {
        &self.media
    }

    pub fn primary_video(&self) -> Option<&StreamInfo> {
        self.media.primary(StreamKind::Video)
    }

    pub fn primary_audio(&self) -> Option<&StreamInfo> {
        self.media.primary(StreamKind::Audio)
    }
}
