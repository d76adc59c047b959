//! Lossless repackaging (the quick fix).

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vn_av::{MediaEngine, RemuxRequest, Workspace};
use vn_core::config::PolicyConfig;
use vn_core::{AudioCodec, Error, IssueType};

use crate::analysis::Analysis;
use crate::decision::Plan;

/// Rewrites stream order and audio tagging without touching bitstreams.
#[derive(Clone)]
pub struct Remuxer {
    engine: Arc<dyn MediaEngine>,
    policy: PolicyConfig,
}

impl Remuxer {
    pub fn new(engine: Arc<dyn MediaEngine>, policy: PolicyConfig) -> Self {
        Self { engine, policy }
    }

    /// Check that every bitstream can be carried as-is in the target.
    ///
    /// Returns the [`Error::Remux`] that triggers escalation when it cannot.
    pub fn preflight(&self, analysis: &Analysis) -> vn_core::Result<()> {
        let path = analysis.path();

        if let Some(codec) = analysis.audio_codec() {
            if !self.policy.allowed_audio_codecs.contains(&codec) {
                return Err(Error::remux(
                    path,
                    format!(
                        "audio codec {} cannot be delivered without re-encoding",
                        analysis.audio_codec_name().unwrap_or("unknown")
                    ),
                ));
            }
        }
        if let Some(codec) = analysis.video_codec() {
            if !self.policy.allowed_video_codecs.contains(&codec) {
                return Err(Error::remux(path, format!("video codec {codec} needs re-encoding")));
            }
        }
        if let Some(issue) = analysis.issues().get(IssueType::ProfileMismatch) {
            return Err(Error::remux(
                path,
                format!("{} (profile and level are fixed in the bitstream)", issue.description),
            ));
        }
        Ok(())
    }

    /// Repackage `analysis.path()` into the workspace output.
    ///
    /// # Errors
    ///
    /// [`Error::Remux`] for anything the fallback should handle;
    /// cancellation is passed through unchanged.
    pub async fn remux(
        &self,
        analysis: &Analysis,
        plan: &Plan,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> vn_core::Result<PathBuf> {
        self.preflight(analysis)?;

        let req = RemuxRequest {
            input: analysis.path().to_path_buf(),
            output: workspace.output(),
            container: plan.target_container,
            retag_aac: analysis.audio_codec() == Some(AudioCodec::Aac),
        };

        self.engine
            .remux(&req, cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled { .. } => e,
                other => Error::remux(analysis.path(), other.to_string()),
            })?;

        if !req.output.exists() {
            return Err(Error::remux(analysis.path(), "engine produced no output"));
        }
        Ok(req.output)
    }
}
