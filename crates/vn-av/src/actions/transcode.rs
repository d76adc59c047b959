//! Re-encoding using ffmpeg.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use vn_core::{AudioCodec, Container, VideoCodec};

use crate::command::ToolCommand;
use crate::engine::ProgressFn;

/// Minimum spacing between progress callbacks.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Scale a base CRF by source resolution height.
///
/// Small frames get a lower CRF (higher quality) since artifacts are more
/// visible when upscaled by players; 4K+ can afford a higher one.
///
/// - SD (≤480p): base - 2
/// - 720p: base - 1
/// - 1080p: base
/// - above: base + 2
pub fn adaptive_crf(height: u32, base: u32) -> u32 {
    let crf = if height <= 480 {
        base.saturating_sub(2)
    } else if height <= 720 {
        base.saturating_sub(1)
    } else if height <= 1080 {
        base
    } else {
        base + 2
    };
    crf.min(51)
}

/// Largest frame, in 16x16 macroblocks, an H.264 level allows (MaxFS).
///
/// `level` is in ffprobe units (41 for 4.1).
pub fn h264_max_frame_macroblocks(level: i32) -> u32 {
    match level {
        i32::MIN..=10 => 99,
        11..=20 => 396,
        21 => 792,
        22..=30 => 1620,
        31 => 3600,
        32 => 5120,
        33..=41 => 8192,
        42 => 8704,
        43..=50 => 22080,
        51..=52 => 36864,
        _ => 139_264,
    }
}

/// The `-level` value for an ffprobe level number: 52 becomes `"5.2"`.
pub fn h264_level_name(level: i32) -> String {
    format!("{}.{}", level / 10, level % 10)
}

/// Frame size to scale to so a `width`x`height` source fits `level`.
///
/// Keeps the aspect ratio with even dimensions. `None` when the source
/// already fits.
pub fn fit_h264_level(width: u32, height: u32, level: i32) -> Option<(u32, u32)> {
    let max_fs = u64::from(h264_max_frame_macroblocks(level));
    let macroblocks = |w: u32, h: u32| u64::from(w.div_ceil(16)) * u64::from(h.div_ceil(16));
    if width == 0 || height == 0 || macroblocks(width, height) <= max_fs {
        return None;
    }

    // The epsilon keeps exact ratios like 7680 * 0.5333.. from rounding down.
    let even = |v: f64| (((v + 1e-6) as u32) & !1).max(2);
    let factor = ((max_fs * 256) as f64 / (f64::from(width) * f64::from(height))).sqrt();
    let (mut w, mut h) = (even(f64::from(width) * factor), even(f64::from(height) * factor));
    while macroblocks(w, h) > max_fs && w > 2 {
        w -= 2;
        h = even(f64::from(w) * f64::from(height) / f64::from(width));
    }
    Some((w, h))
}

/// Software encoder for a target video codec.
pub fn software_encoder_for(codec: VideoCodec) -> Option<&'static str> {
    match codec {
        VideoCodec::H264 => Some("libx264"),
        VideoCodec::H265 => Some("libx265"),
        VideoCodec::Av1 => Some("libsvtav1"),
        VideoCodec::Vp9 => Some("libvpx-vp9"),
        VideoCodec::Vp8 => Some("libvpx"),
        VideoCodec::Mpeg4 => Some("mpeg4"),
        VideoCodec::Mpeg2 => Some("mpeg2video"),
        VideoCodec::Other => None,
    }
}

/// Encoder for a target audio codec.
pub fn audio_encoder_for(codec: AudioCodec) -> Option<&'static str> {
    match codec {
        AudioCodec::Aac => Some("aac"),
        AudioCodec::Mp3 => Some("libmp3lame"),
        AudioCodec::Opus => Some("libopus"),
        AudioCodec::Vorbis => Some("libvorbis"),
        AudioCodec::Ac3 => Some("ac3"),
        AudioCodec::Eac3 => Some("eac3"),
        AudioCodec::Flac => Some("flac"),
        AudioCodec::Pcm | AudioCodec::Other => None,
    }
}

/// Encoder selection for one target codec and acceleration method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwAccel {
    /// Flags that must appear before `-i`.
    pub input_args: Vec<&'static str>,
    pub encoder: &'static str,
    /// Whether the encoder takes `-crf`; otherwise bitrate targeting is used.
    pub supports_crf: bool,
    /// Frames stay on the GPU, so `-pix_fmt` must not be forced.
    pub hw_frames: bool,
}

/// Resolve a hardware acceleration method for `codec`.
///
/// Only H.264 and H.265 have hardware encoders here; anything else, and an
/// unknown or `"none"` method, falls back to the software encoder. Returns
/// `None` when no encoder exists for the codec at all.
pub fn resolve_hw_accel(hw_accel: Option<&str>, codec: VideoCodec) -> Option<HwAccel> {
    let hw = |input_args: Vec<&'static str>, encoder: &'static str, hw_frames: bool| HwAccel {
        input_args,
        encoder,
        supports_crf: false,
        hw_frames,
    };

    let accelerated = match (hw_accel, codec) {
        (Some("videotoolbox"), VideoCodec::H264) => {
            Some(hw(vec!["-hwaccel", "videotoolbox"], "h264_videotoolbox", false))
        }
        (Some("videotoolbox"), VideoCodec::H265) => {
            Some(hw(vec!["-hwaccel", "videotoolbox"], "hevc_videotoolbox", false))
        }
        (Some("nvenc"), VideoCodec::H264) => Some(hw(vec!["-hwaccel", "cuda"], "h264_nvenc", false)),
        (Some("nvenc"), VideoCodec::H265) => Some(hw(vec!["-hwaccel", "cuda"], "hevc_nvenc", false)),
        (Some("vaapi"), VideoCodec::H264) => Some(hw(
            vec!["-hwaccel", "vaapi", "-hwaccel_output_format", "vaapi"],
            "h264_vaapi",
            true,
        )),
        (Some("vaapi"), VideoCodec::H265) => Some(hw(
            vec!["-hwaccel", "vaapi", "-hwaccel_output_format", "vaapi"],
            "hevc_vaapi",
            true,
        )),
        (Some("qsv"), VideoCodec::H264) => Some(hw(vec!["-hwaccel", "qsv"], "h264_qsv", false)),
        (Some("qsv"), VideoCodec::H265) => Some(hw(vec!["-hwaccel", "qsv"], "hevc_qsv", false)),
        _ => None,
    };

    accelerated.or_else(|| {
        let encoder = software_encoder_for(codec)?;
        Some(HwAccel {
            input_args: Vec::new(),
            encoder,
            supports_crf: matches!(encoder, "libx264" | "libx265" | "libsvtav1" | "libvpx-vp9"),
            hw_frames: false,
        })
    })
}

/// Rate control for a video encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    Crf(u32),
    Bitrate {
        target: String,
        maxrate: String,
        bufsize: String,
    },
}

/// What happens to the video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEncode {
    Copy,
    Encode {
        encoder: String,
        hwaccel_args: Vec<String>,
        quality: Quality,
        preset: Option<String>,
        profile: Option<String>,
        /// Level cap passed as `-level:v`, e.g. `"5.2"`.
        level: Option<String>,
        /// Output frame size when the source is too large for `level`.
        scale: Option<(u32, u32)>,
        pix_fmt: Option<String>,
    },
}

/// What happens to the audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEncode {
    Copy,
    Encode {
        encoder: String,
        bitrate: String,
        channels: Option<u32>,
    },
}

/// A full re-encode of `input` into `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub container: Container,
    /// Absolute index of the video stream to keep; first video if `None`.
    pub video_index: Option<u32>,
    /// Absolute index of the audio stream to keep; first audio if `None`.
    pub audio_index: Option<u32>,
    pub video: VideoEncode,
    pub audio: AudioEncode,
    /// Source duration, used to turn `out_time_us` into a percentage.
    pub duration_secs: Option<f64>,
}

impl TranscodeRequest {
    /// The ffmpeg argument list for this request.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        push(&mut args, &["-y", "-nostdin", "-hide_banner", "-progress", "pipe:2", "-nostats"]);

        // Hardware acceleration flags must appear before -i.
        if let VideoEncode::Encode { hwaccel_args, .. } = &self.video {
            for a in hwaccel_args {
                push(&mut args, &[a.as_str()]);
            }
        }

        push(&mut args, &["-i", self.input.to_string_lossy().as_ref()]);

        // Canonical mapping: the video stream first, then the audio stream.
        match self.video_index {
            Some(i) => push(&mut args, &["-map", &format!("0:{i}")]),
            None => push(&mut args, &["-map", "0:V:0?"]),
        }
        match self.audio_index {
            Some(i) => push(&mut args, &["-map", &format!("0:{i}")]),
            None => push(&mut args, &["-map", "0:a:0?"]),
        }

        match &self.video {
            VideoEncode::Copy => push(&mut args, &["-c:v", "copy"]),
            VideoEncode::Encode {
                encoder,
                quality,
                preset,
                profile,
                level,
                scale,
                pix_fmt,
                ..
            } => {
                if let Some((w, h)) = scale {
                    let filter = if encoder.ends_with("_vaapi") {
                        format!("scale_vaapi=w={w}:h={h}")
                    } else {
                        format!("scale={w}:{h}")
                    };
                    push(&mut args, &["-vf", &filter]);
                }
                push(&mut args, &["-c:v", encoder]);
                if let Some(p) = profile {
                    push(&mut args, &["-profile:v", p]);
                }
                if let Some(l) = level {
                    push(&mut args, &["-level:v", l]);
                }
                match quality {
                    Quality::Crf(crf) => {
                        push(&mut args, &["-crf", &crf.to_string()]);
                        // libvpx only honours CRF in constrained-quality mode.
                        if encoder == "libvpx-vp9" {
                            push(&mut args, &["-b:v", "0"]);
                        }
                    }
                    Quality::Bitrate {
                        target,
                        maxrate,
                        bufsize,
                    } => push(&mut args, &["-b:v", target, "-maxrate", maxrate, "-bufsize", bufsize]),
                }
                if let Some(p) = preset {
                    push(&mut args, &["-preset", p]);
                }
                if let Some(f) = pix_fmt {
                    push(&mut args, &["-pix_fmt", f]);
                }
                push(&mut args, &["-force_key_frames", "expr:gte(t,n_forced*2)"]);
            }
        }

        match &self.audio {
            AudioEncode::Copy => push(&mut args, &["-c:a", "copy"]),
            AudioEncode::Encode {
                encoder,
                bitrate,
                channels,
            } => {
                push(&mut args, &["-c:a", encoder, "-b:a", bitrate]);
                if let Some(ch) = channels {
                    push(&mut args, &["-ac", &ch.to_string()]);
                }
            }
        }

        if self.container == Container::Mp4 {
            push(&mut args, &["-movflags", "+faststart"]);
        }
        if let Some(muxer) = self.container.muxer() {
            push(&mut args, &["-f", muxer]);
        }

        push(&mut args, &[self.output.to_string_lossy().as_ref()]);
        args
    }
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// Progress stats from an ffmpeg encode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeProgress {
    /// 0.0..=1.0, when the source duration is known.
    pub pct: Option<f64>,
    pub fps: Option<f64>,
    pub speed: Option<String>,
    pub frame: Option<u64>,
    /// Set on the final block (`progress=end`).
    pub done: bool,
}

/// Incremental parser for ffmpeg `-progress` key=value blocks.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    out_time_us: Option<i64>,
    fps: Option<f64>,
    speed: Option<String>,
    frame: Option<u64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            ..Self::default()
        }
    }

    /// Feed one line; returns a snapshot at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<EncodeProgress> {
        let (key, value) = line.split_once('=')?;
        let value = value.trim();
        match key.trim() {
            "out_time_us" | "out_time_ms" => self.out_time_us = value.parse().ok(),
            "fps" => self.fps = value.parse().ok(),
            "speed" if value != "N/A" => self.speed = Some(value.to_string()),
            "frame" => self.frame = value.parse().ok(),
            "progress" => {
                let done = value == "end";
                let pct = match (self.out_time_us, self.duration_secs) {
                    (_, Some(_)) if done => Some(1.0),
                    (Some(us), Some(dur)) => Some((us as f64 / 1_000_000.0 / dur).clamp(0.0, 1.0)),
                    _ => None,
                };
                return Some(EncodeProgress {
                    pct,
                    fps: self.fps,
                    speed: self.speed.clone(),
                    frame: self.frame,
                    done,
                });
            }
            _ => {}
        }
        None
    }
}

/// Run the encode described by `req`, streaming progress to `on_progress`
/// (throttled, the final block always delivered).
///
/// 24-hour timeout to handle very large files.
pub async fn transcode(
    ffmpeg: &Path,
    req: &TranscodeRequest,
    on_progress: &ProgressFn,
    cancel: &CancellationToken,
) -> vn_core::Result<()> {
    tracing::info!(
        "transcode {:?} -> {:?} (video={:?}, audio={:?})",
        req.input,
        req.output,
        req.video,
        req.audio
    );

    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.timeout(Duration::from_secs(86_400));
    cmd.args(req.ffmpeg_args());
    cmd.cancel_on(cancel.clone());

    let mut parser = ProgressParser::new(req.duration_secs);
    let mut last_emit: Option<Instant> = None;

    cmd.execute_with_stderr_callback(|line| {
        if let Some(progress) = parser.feed(line) {
            let due = last_emit.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
            if progress.done || due {
                on_progress(progress);
                last_emit = Some(Instant::now());
            }
        }
    })
    .await?;

    Ok(())
}
