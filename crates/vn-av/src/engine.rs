//! The media-engine capability seam.
//!
//! The pipeline only ever talks to a [`MediaEngine`]: probe a file, remux it,
//! transcode it. [`FfmpegEngine`] is the real implementation; tests use a
//! scripted fake.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vn_core::config::ToolsConfig;

use crate::actions::{self, EncodeProgress, RemuxRequest, TranscodeRequest};
use crate::probe::{FfprobeProber, MediaInfo, ProbeDepth};
use crate::tools::ToolRegistry;

/// Callback receiving encode progress.
pub type ProgressFn = dyn Fn(EncodeProgress) + Send + Sync;

/// External probe/transform engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Inspect `path`. Fails with [`vn_core::Error::Probe`] when the file
    /// cannot be read or has no streams.
    async fn probe(
        &self,
        path: &Path,
        depth: ProbeDepth,
        cancel: &CancellationToken,
    ) -> vn_core::Result<MediaInfo>;

    /// Repackage without re-encoding.
    async fn remux(&self, req: &RemuxRequest, cancel: &CancellationToken) -> vn_core::Result<()>;

    /// Re-encode.
    async fn transcode(
        &self,
        req: &TranscodeRequest,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> vn_core::Result<()>;
}

/// [`MediaEngine`] backed by the ffmpeg and ffprobe CLIs.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    tools: ToolRegistry,
}

impl FfmpegEngine {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    /// Discover the tools named (or not) in `config`.
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(ToolRegistry::discover(config))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe(
        &self,
        path: &Path,
        depth: ProbeDepth,
        cancel: &CancellationToken,
    ) -> vn_core::Result<MediaInfo> {
        let ffprobe = self.tools.require("ffprobe")?;
        FfprobeProber::new(ffprobe.path.clone())
            .probe(path, depth, cancel)
            .await
    }

    async fn remux(&self, req: &RemuxRequest, cancel: &CancellationToken) -> vn_core::Result<()> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        actions::remux(&ffmpeg.path, req, cancel).await
    }

    async fn transcode(
        &self,
        req: &TranscodeRequest,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> vn_core::Result<()> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        actions::transcode(&ffmpeg.path, req, on_progress, cancel).await
    }
}
