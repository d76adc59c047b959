//! Builds an [`Analysis`] for a path.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vn_av::{MediaEngine, ProbeDepth};
use vn_core::Error;

use crate::analysis::Analysis;
use crate::detect::IssueDetector;

/// Probes a file through the engine and classifies it.
#[derive(Clone)]
pub struct Prober {
    engine: Arc<dyn MediaEngine>,
    detector: IssueDetector,
}

impl Prober {
    pub fn new(engine: Arc<dyn MediaEngine>, detector: IssueDetector) -> Self {
        Self { engine, detector }
    }

    /// Analyze `path`.
    ///
    /// # Errors
    ///
    /// [`Error::Probe`] when the path is missing, unreadable, not a regular
    /// file, zero-length, or has no audio or video stream.
    pub async fn analyze(&self, path: &Path, cancel: &CancellationToken) -> vn_core::Result<Analysis> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::probe(path, format!("unreadable: {e}")))?;
        if !meta.is_file() {
            return Err(Error::probe(path, "not a regular file"));
        }
        if meta.len() == 0 {
            return Err(Error::probe(path, "zero-length file"));
        }
        // Open once so permission problems surface as probe errors.
        tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::probe(path, format!("unreadable: {e}")))?;

        let media = self
            .engine
            .probe(path, ProbeDepth::Headers, cancel)
            .await
            .map_err(|e| match e {
                Error::Probe { .. } | Error::Cancelled { .. } => e,
                other => Error::probe(path, other.to_string()),
            })?;

        if !media.has_decodable_streams() {
            return Err(Error::probe(path, "no decodable streams"));
        }

        let analysis = Analysis::from_media(media, &self.detector);
        tracing::debug!(
            path = %path.display(),
            container = %analysis.container(),
            video = ?analysis.video_codec(),
            audio = ?analysis.audio_codec(),
            method = %analysis.method(),
            "analyzed"
        );
        Ok(analysis)
    }
}
