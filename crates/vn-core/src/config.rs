//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! tool locations, the compatibility policy (allow-lists), the re-encode
//! targets, and the pipeline limits. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::media::{AudioCodec, Container, StreamKind, VideoCodec};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub policy: PolicyConfig,
    pub conversion: ConversionConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.policy.allowed_video_codecs.is_empty() {
            warnings.push("policy.allowed_video_codecs is empty; every video stream will be re-encoded".into());
        }
        if self.policy.allowed_audio_codecs.is_empty() {
            warnings.push("policy.allowed_audio_codecs is empty; every audio stream will be flagged".into());
        }
        if self.policy.allowed_containers.is_empty() {
            warnings.push("policy.allowed_containers is empty; every file will be flagged".into());
        }

        if !self
            .policy
            .allowed_video_codecs
            .contains(&self.conversion.target_video_codec)
        {
            warnings.push(format!(
                "conversion.target_video_codec '{}' is not in policy.allowed_video_codecs; converted files will fail verification",
                self.conversion.target_video_codec
            ));
        }
        if !self
            .policy
            .allowed_audio_codecs
            .contains(&self.conversion.target_audio_codec)
        {
            warnings.push(format!(
                "conversion.target_audio_codec '{}' is not in policy.allowed_audio_codecs; converted files will fail verification",
                self.conversion.target_audio_codec
            ));
        }
        if !self
            .policy
            .allowed_containers
            .contains(&self.policy.target_container)
        {
            warnings.push(format!(
                "policy.target_container '{}' is not in policy.allowed_containers",
                self.policy.target_container
            ));
        }
        if self.policy.target_container.muxer().is_none() {
            warnings.push(format!(
                "policy.target_container '{}' cannot be written",
                self.policy.target_container
            ));
        }

        if let Some(ref hw) = self.conversion.hw_accel {
            let valid = ["none", "videotoolbox", "nvenc", "vaapi", "qsv"];
            if !valid.contains(&hw.as_str()) {
                warnings.push(format!(
                    "conversion.hw_accel '{}' is not a recognized method (valid: {})",
                    hw,
                    valid.join(", ")
                ));
            }
        }

        if self.pipeline.concurrency == 0 {
            warnings.push("pipeline.concurrency is 0; one worker will be used".into());
        }
        if self.pipeline.job_timeout_secs == Some(0) {
            warnings.push("pipeline.job_timeout_secs is 0; every job will time out".into());
        }
        if self.pipeline.output_suffix.trim().is_empty() {
            warnings.push("pipeline.output_suffix is empty; outputs may collide with sources".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Compatibility policy: which layouts are directly deliverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allowed_video_codecs: Vec<VideoCodec>,
    pub allowed_audio_codecs: Vec<AudioCodec>,
    /// Video profiles (as reported by ffprobe) accepted for allow-listed codecs.
    pub allowed_video_profiles: Vec<String>,
    /// Highest accepted video level, in ffprobe units (e.g. 51 for 5.1).
    pub max_video_level: Option<i32>,
    /// Audio profiles that must be explicitly re-tagged for delivery.
    pub retag_audio_profiles: Vec<String>,
    /// Stream kind players expect to find first in the container.
    pub canonical_first_stream: StreamKind,
    pub target_container: Container,
    pub allowed_containers: Vec<Container>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_video_codecs: vec![VideoCodec::H264],
            allowed_audio_codecs: vec![AudioCodec::Aac, AudioCodec::Mp3],
            allowed_video_profiles: vec![
                "Baseline".into(),
                "Constrained Baseline".into(),
                "Main".into(),
                "High".into(),
            ],
            max_video_level: Some(52),
            retag_audio_profiles: vec!["HE-AAC".into(), "HE-AACv2".into()],
            canonical_first_stream: StreamKind::Video,
            target_container: Container::Mp4,
            allowed_containers: vec![Container::Mp4],
        }
    }
}

/// Re-encode targets and encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub target_video_codec: VideoCodec,
    pub target_audio_codec: AudioCodec,
    #[serde(default = "default_video_crf")]
    pub video_crf: u32,
    #[serde(default = "default_video_preset")]
    pub video_preset: String,
    #[serde(default = "default_adaptive_crf")]
    pub adaptive_crf: bool,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    pub audio_channels: Option<u32>,
    /// Hardware acceleration method (none, videotoolbox, nvenc, vaapi, qsv).
    #[serde(default)]
    pub hw_accel: Option<String>,
}

fn default_video_crf() -> u32 {
    20
}
fn default_video_preset() -> String {
    "medium".into()
}
fn default_adaptive_crf() -> bool {
    true
}
fn default_audio_bitrate() -> String {
    "192k".into()
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            target_video_codec: VideoCodec::H264,
            target_audio_codec: AudioCodec::Aac,
            video_crf: default_video_crf(),
            video_preset: default_video_preset(),
            adaptive_crf: default_adaptive_crf(),
            audio_bitrate: default_audio_bitrate(),
            audio_channels: Some(2),
            hw_accel: None,
        }
    }
}

/// Worker pool and output placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub queue_capacity: Option<usize>,
    /// Per-job deadline; the job's external process is killed when it expires.
    pub job_timeout_secs: Option<u64>,
    /// Directory for outputs; defaults to the source file's directory.
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
    #[serde(default = "default_true")]
    pub verify_frame_counts: bool,
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance_secs: f64,
}

fn default_output_suffix() -> String {
    "normalized".into()
}
fn default_true() -> bool {
    true
}
fn default_duration_tolerance() -> f64 {
    1.0
}

impl PipelineConfig {
    /// Effective number of workers (never zero).
    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Effective queue capacity (defaults to twice the worker count).
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers() * 2).max(1)
    }

    /// Per-job deadline, if configured.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            queue_capacity: None,
            job_timeout_secs: None,
            output_dir: None,
            output_suffix: default_output_suffix(),
            verify_frame_counts: default_true(),
            duration_tolerance_secs: default_duration_tolerance(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.policy.allowed_video_codecs, vec![VideoCodec::H264]);
        assert_eq!(cfg.policy.target_container, Container::Mp4);
        assert_eq!(cfg.policy.canonical_first_stream, StreamKind::Video);
        assert_eq!(cfg.conversion.video_crf, 20);
        assert_eq!(cfg.conversion.video_preset, "medium");
        assert_eq!(cfg.pipeline.output_suffix, "normalized");
        assert!(cfg.pipeline.concurrency >= 1);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.policy.allowed_audio_codecs, vec![AudioCodec::Aac, AudioCodec::Mp3]);
        assert_eq!(cfg.conversion.audio_bitrate, "192k");
    }

    #[test]
    fn parse_policy_overrides() {
        let json = r#"{
            "policy": {"allowed_video_codecs": ["h264", "h265"], "canonical_first_stream": "audio"},
            "pipeline": {"concurrency": 3, "job_timeout_secs": 600}
        }"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(
            cfg.policy.allowed_video_codecs,
            vec![VideoCodec::H264, VideoCodec::H265]
        );
        assert_eq!(cfg.policy.canonical_first_stream, StreamKind::Audio);
        assert_eq!(cfg.pipeline.workers(), 3);
        assert_eq!(cfg.pipeline.queue_capacity(), 6);
        assert_eq!(cfg.pipeline.job_timeout(), Some(Duration::from_secs(600)));
        // Unspecified fields in a present section keep their defaults.
        assert_eq!(cfg.policy.target_container, Container::Mp4);
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert_eq!(cfg.pipeline.output_suffix, "normalized");
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/vidnorm.json")));
        assert_eq!(cfg.conversion.target_video_codec, VideoCodec::H264);
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidnorm.json");
        std::fs::write(&path, r#"{"conversion": {"video_crf": 23}}"#).unwrap();
        let cfg = Config::load_or_default(Some(&path));
        assert_eq!(cfg.conversion.video_crf, 23);
    }

    #[test]
    fn unknown_hw_accel_warns() {
        let mut cfg = Config::default();
        cfg.conversion.hw_accel = Some("cuda-magic".into());
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("hw_accel")));
    }

    #[test]
    fn target_outside_allow_list_warns() {
        let mut cfg = Config::default();
        cfg.conversion.target_video_codec = VideoCodec::H265;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("target_video_codec")));
    }

    #[test]
    fn zero_concurrency_warns_and_clamps() {
        let mut cfg = Config::default();
        cfg.pipeline.concurrency = 0;
        assert!(cfg.validate().iter().any(|w| w.contains("concurrency")));
        assert_eq!(cfg.pipeline.workers(), 1);
    }
}
