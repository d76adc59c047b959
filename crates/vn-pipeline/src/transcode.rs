//! Full re-encode (the full conversion).

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vn_av::{
    adaptive_crf, audio_encoder_for, fit_h264_level, h264_level_name, resolve_hw_accel,
    AudioEncode, MediaEngine, ProgressFn, Quality, TranscodeRequest, VideoEncode, Workspace,
};
use vn_core::config::ConversionConfig;
use vn_core::{Error, VideoCodec};

use crate::analysis::Analysis;
use crate::decision::Plan;

/// Height assumed for adaptive CRF when the source does not report one.
const DEFAULT_HEIGHT: u32 = 1080;

/// Re-encodes a source to the plan's target codecs, retrying once on a
/// transient engine failure.
#[derive(Clone)]
pub struct Transcoder {
    engine: Arc<dyn MediaEngine>,
    conversion: ConversionConfig,
    max_level: Option<i32>,
}

impl Transcoder {
    pub fn new(engine: Arc<dyn MediaEngine>, conversion: ConversionConfig) -> Self {
        Self {
            engine,
            conversion,
            max_level: None,
        }
    }

    /// Cap H.264 output at `level` (ffprobe units), downscaling sources
    /// whose frame size the level cannot hold.
    pub fn with_max_level(mut self, level: Option<i32>) -> Self {
        self.max_level = level;
        self
    }

    /// Build the engine request for `plan`.
    pub fn build_request(
        &self,
        analysis: &Analysis,
        plan: &Plan,
        output: PathBuf,
    ) -> vn_core::Result<TranscodeRequest> {
        let video = match plan.target_video_codec {
            Some(codec) => self.video_encode(analysis, codec)?,
            None => VideoEncode::Copy,
        };

        let audio = match plan.target_audio_codec {
            Some(codec) => AudioEncode::Encode {
                encoder: audio_encoder_for(codec)
                    .ok_or_else(|| Error::Validation(format!("no encoder for audio codec {codec}")))?
                    .to_string(),
                bitrate: self.conversion.audio_bitrate.clone(),
                channels: self.conversion.audio_channels,
            },
            None => AudioEncode::Copy,
        };

        Ok(TranscodeRequest {
            input: analysis.path().to_path_buf(),
            output,
            container: plan.target_container,
            video_index: analysis.primary_video().map(|s| s.index),
            audio_index: analysis.primary_audio().map(|s| s.index),
            video,
            audio,
            duration_secs: analysis.duration_seconds(),
        })
    }

    fn video_encode(&self, analysis: &Analysis, codec: VideoCodec) -> vn_core::Result<VideoEncode> {
        let hw = resolve_hw_accel(self.conversion.hw_accel.as_deref(), codec)
            .ok_or_else(|| Error::Validation(format!("no encoder for video codec {codec}")))?;

        let (level, scale) = match (codec, self.max_level) {
            (VideoCodec::H264, Some(max)) => {
                let scale = analysis
                    .resolution()
                    .and_then(|r| fit_h264_level(r.width, r.height, max));
                (Some(h264_level_name(max)), scale)
            }
            _ => (None, None),
        };
        if let Some((w, h)) = scale {
            tracing::info!(
                path = %analysis.path().display(),
                "downscaling to {w}x{h} to fit the level limit"
            );
        }

        let quality = if hw.supports_crf {
            let crf = if self.conversion.adaptive_crf {
                let height = scale
                    .map(|(_, h)| h)
                    .or_else(|| analysis.resolution().map(|r| r.height))
                    .unwrap_or(DEFAULT_HEIGHT);
                adaptive_crf(height, self.conversion.video_crf)
            } else {
                self.conversion.video_crf
            };
            Quality::Crf(crf)
        } else {
            // Hardware encoders don't support CRF; use bitrate targeting.
            Quality::Bitrate {
                target: "5M".into(),
                maxrate: "8M".into(),
                bufsize: "16M".into(),
            }
        };

        let preset = matches!(hw.encoder, "libx264" | "libx265")
            .then(|| self.conversion.video_preset.clone());
        let profile = (codec == VideoCodec::H264).then(|| "high".to_string());
        let pix_fmt = (!hw.hw_frames).then(|| "yuv420p".to_string());

        Ok(VideoEncode::Encode {
            encoder: hw.encoder.to_string(),
            hwaccel_args: hw.input_args.iter().map(|s| s.to_string()).collect(),
            quality,
            preset,
            profile,
            level,
            scale,
            pix_fmt,
        })
    }

    /// Re-encode into the workspace output.
    ///
    /// # Errors
    ///
    /// [`Error::Transcode`] after the retry is spent or for a non-transient
    /// failure; cancellation is passed through unchanged and never retried.
    pub async fn transcode(
        &self,
        analysis: &Analysis,
        plan: &Plan,
        workspace: &Workspace,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> vn_core::Result<PathBuf> {
        let path = analysis.path();
        let req = self
            .build_request(analysis, plan, workspace.output())
            .map_err(|e| Error::transcode(path, e.to_string()))?;

        let first = self.engine.transcode(&req, on_progress, cancel).await;
        let result = match first {
            Err(e) if e.is_transient() && !cancel.is_cancelled() => {
                tracing::warn!(path = %path.display(), error = %e, "transcode failed; retrying once");
                workspace.reset_output()?;
                self.engine.transcode(&req, on_progress, cancel).await
            }
            other => other,
        };

        result.map_err(|e| match e {
            Error::Cancelled { .. } => e,
            other => Error::transcode(path, other.to_string()),
        })?;

        if !req.output.exists() {
            return Err(Error::transcode(path, "engine produced no output"));
        }
        Ok(req.output)
    }
}
