//! FFprobe-backed prober.
//!
//! Shells out to `ffprobe -print_format json -show_format -show_streams`
//! and maps the JSON into [`MediaInfo`]. Every field in the JSON is treated
//! as optional: real-world files routinely omit profile, level, tags and
//! durations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use vn_core::{Container, Error, StreamKind};

use super::types::{MediaInfo, ProbeDepth, StreamInfo};
use crate::command::ToolCommand;

/// Header probes finish quickly; packet counting reads the whole file.
const HEADER_TIMEOUT: Duration = Duration::from_secs(60);
const COUNT_TIMEOUT: Duration = Duration::from_secs(3600);

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Probe `path`.
    ///
    /// # Errors
    ///
    /// [`Error::Probe`] when ffprobe fails, its output cannot be parsed, or
    /// the file has no streams at all. Cancellation is passed through as
    /// [`Error::Cancelled`].
    pub async fn probe(
        &self,
        path: &Path,
        depth: ProbeDepth,
        cancel: &CancellationToken,
    ) -> vn_core::Result<MediaInfo> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"]);
        match depth {
            ProbeDepth::Headers => {
                cmd.timeout(HEADER_TIMEOUT);
            }
            ProbeDepth::CountFrames => {
                cmd.arg("-count_packets");
                cmd.timeout(COUNT_TIMEOUT);
            }
        }
        cmd.arg(path.to_string_lossy().as_ref());
        cmd.cancel_on(cancel.clone());

        let output = cmd.execute().await.map_err(|e| match e {
            Error::Cancelled { .. } => e,
            other => Error::probe(path, other.to_string()),
        })?;

        let parsed: FfprobeOutput = serde_json::from_str(&output.stdout)
            .map_err(|e| Error::probe(path, format!("ffprobe JSON parse error: {e}")))?;

        let media = parse_ffprobe_output(path, parsed);
        if media.streams.is_empty() {
            return Err(Error::probe(path, "no decodable streams"));
        }

        tracing::debug!(
            path = %path.display(),
            container = %media.container,
            streams = media.streams.len(),
            ?depth,
            "probed"
        );
        Ok(media)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    index: Option<u32>,
    codec_type: Option<String>,
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i32>,
    codec_tag_string: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    attached_pic: u8,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_ffprobe_output(path: &Path, output: FfprobeOutput) -> MediaInfo {
    let duration = output
        .format
        .duration
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64);

    let file_size = output
        .format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| std::fs::metadata(path).ok().map(|m| m.len()))
        .unwrap_or(0);

    let format_name = output.format.format_name.unwrap_or_default();
    let container = refine_container(Container::from_format_name(&format_name), path);

    let streams = output
        .streams
        .into_iter()
        .enumerate()
        .filter(|(_, s)| s.disposition.attached_pic != 1)
        .filter_map(|(pos, s)| map_stream(pos as u32, s))
        .collect();

    MediaInfo {
        file_path: path.to_path_buf(),
        file_size,
        container,
        format_name,
        duration,
        streams,
    }
}

fn map_stream(position: u32, s: FfprobeStream) -> Option<StreamInfo> {
    let kind = StreamKind::from_codec_type(s.codec_type.as_deref()?);
    Some(StreamInfo {
        index: s.index.unwrap_or(position),
        kind,
        codec_name: s
            .codec_name
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        profile: s.profile.filter(|p| !p.is_empty() && p != "unknown"),
        // ffprobe reports -99 when the level is unknown.
        level: s.level.filter(|l| *l > 0),
        codec_tag: s.codec_tag_string.and_then(|t| clean_codec_tag(&t)),
        width: s.width.filter(|w| *w > 0),
        height: s.height.filter(|h| *h > 0),
        channels: s.channels.filter(|c| *c > 0),
        sample_rate: s.sample_rate.as_deref().and_then(|r| r.parse().ok()),
        frame_count: s
            .nb_read_packets
            .as_deref()
            .or(s.nb_frames.as_deref())
            .and_then(|n| n.parse().ok()),
        default: s.disposition.default == 1,
    })
}

/// `"[0][0][0][0]"` means "no tag".
fn clean_codec_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.is_empty() || tag.starts_with('[') {
        None
    } else {
        Some(tag.to_ascii_lowercase())
    }
}

/// ffprobe reports "matroska,webm" for both; use the extension to tell
/// WebM apart.
fn refine_container(container: Container, path: &Path) -> Container {
    let is_webm = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("webm"))
        .unwrap_or(false);
    if container == Container::Mkv && is_webm {
        Container::Webm
    } else {
        container
    }
}
