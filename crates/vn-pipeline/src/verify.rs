//! Post-transform verification.
//!
//! The produced file is re-probed and must satisfy the delivery contract
//! before it is moved into place. A quick fix must additionally be lossless:
//! every video and audio stream keeps its codec fingerprint and frame count.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vn_av::{MediaEngine, MediaInfo, ProbeDepth, StreamInfo};
use vn_core::config::{PipelineConfig, PolicyConfig};
use vn_core::{Error, Method, StreamKind};

use crate::analysis::Analysis;
use crate::decision::Plan;
use crate::detect::{is_canonical_order, IssueDetector};

/// Per-stream identity used for the losslessness check.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    codec_name: String,
    profile: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sample_rate: Option<u32>,
    channels: Option<u32>,
    frame_count: Option<u64>,
}

impl From<&StreamInfo> for Fingerprint {
    fn from(s: &StreamInfo) -> Self {
        Self {
            codec_name: s.codec_name.clone(),
            profile: s.profile.clone(),
            width: s.width,
            height: s.height,
            sample_rate: s.sample_rate,
            channels: s.channels,
            frame_count: s.frame_count,
        }
    }
}

fn fingerprints(media: &MediaInfo, kind: StreamKind) -> Vec<Fingerprint> {
    media.streams_of(kind).map(Fingerprint::from).collect()
}

/// Checks a produced file against the target contract.
#[derive(Clone)]
pub struct Verifier {
    engine: Arc<dyn MediaEngine>,
    detector: IssueDetector,
    count_frames: bool,
    duration_tolerance: f64,
}

impl Verifier {
    pub fn new(engine: Arc<dyn MediaEngine>, policy: PolicyConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            engine,
            detector: IssueDetector::new(policy),
            count_frames: pipeline.verify_frame_counts,
            duration_tolerance: pipeline.duration_tolerance_secs,
        }
    }

    fn depth(&self) -> ProbeDepth {
        if self.count_frames {
            ProbeDepth::CountFrames
        } else {
            ProbeDepth::Headers
        }
    }

    /// Verify `output` produced from `source` under `plan`.
    ///
    /// # Errors
    ///
    /// [`Error::Verify`] naming the first violated check. Cancellation is
    /// passed through.
    pub async fn verify(
        &self,
        output: &Path,
        source: &Analysis,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> vn_core::Result<bool> {
        let src = source.path();
        let fail = |msg: String| Error::verify(src, msg);

        let media = self
            .engine
            .probe(output, self.depth(), cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled { .. } => e,
                other => fail(format!("output could not be probed: {other}")),
            })?;
        let produced = Analysis::from_media(media, &self.detector);
        let policy = self.detector.policy();

        if let Some(codec) = produced.video_codec() {
            if !policy.allowed_video_codecs.contains(&codec) {
                return Err(fail(format!("output video codec {codec} is not allowed")));
            }
        }
        if let Some(codec) = produced.audio_codec() {
            if !policy.allowed_audio_codecs.contains(&codec) {
                return Err(fail(format!("output audio codec {codec} is not allowed")));
            }
        }
        if !is_canonical_order(produced.stream_order(), policy.canonical_first_stream) {
            return Err(fail(format!(
                "output stream order {:?} is not canonical",
                produced.stream_order()
            )));
        }
        if !policy.allowed_containers.contains(&produced.container()) {
            return Err(fail(format!(
                "output container {} is not allowed",
                produced.container()
            )));
        }
        if !produced.issues().is_empty() {
            return Err(fail(format!(
                "output still has issues: {:?}",
                produced.issues().kinds()
            )));
        }

        for kind in [StreamKind::Video, StreamKind::Audio] {
            if source.media().has(kind) && !produced.media().has(kind) {
                return Err(fail(format!("output lost its {kind} stream")));
            }
        }

        if let (Some(before), Some(after)) = (source.duration_seconds(), produced.duration_seconds()) {
            if (before - after).abs() > self.duration_tolerance {
                return Err(fail(format!(
                    "output duration {after:.2}s differs from source {before:.2}s"
                )));
            }
        }

        if plan.method == Method::QuickFix {
            self.check_lossless(source, produced.media(), cancel).await?;
        }

        tracing::debug!(
            path = %src.display(),
            output = %output.display(),
            method = %plan.method,
            "output verified"
        );
        Ok(true)
    }

    async fn check_lossless(
        &self,
        source: &Analysis,
        produced: &MediaInfo,
        cancel: &CancellationToken,
    ) -> vn_core::Result<()> {
        let src = source.path();

        // Count the source the same way the output was counted.
        let counted;
        let source_media = if self.count_frames {
            counted = self
                .engine
                .probe(src, ProbeDepth::CountFrames, cancel)
                .await
                .map_err(|e| match e {
                    Error::Cancelled { .. } => e,
                    other => Error::verify(src, format!("source could not be re-probed: {other}")),
                })?;
            &counted
        } else {
            source.media()
        };

        for kind in [StreamKind::Video, StreamKind::Audio] {
            let before = fingerprints(source_media, kind);
            let after = fingerprints(produced, kind);
            if before != after {
                return Err(Error::verify(
                    src,
                    format!("{kind} streams changed during repackaging: {before:?} -> {after:?}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionEngine;
    use crate::testing::{aac_audio, h264_video, he_aac_audio, media_file, opus_audio, write_media, FakeEngine};
    use vn_core::Container;

    struct Fixture {
        dir: tempfile::TempDir,
        analysis: Analysis,
        plan: Plan,
    }

    fn fixture(streams: Vec<StreamInfo>, container: Container) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.src");
        let media = media_file(&src, container, streams);
        write_media(&src, &media);
        let analysis = Analysis::from_media(media, &IssueDetector::default());
        let plan = DecisionEngine::default().plan(&analysis);
        Fixture { dir, analysis, plan }
    }

    fn verifier(engine: Arc<FakeEngine>) -> Verifier {
        Verifier::new(engine, PolicyConfig::default(), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn accepts_lossless_repackage() {
        let f = fixture(vec![he_aac_audio(0), h264_video(1, 1280, 720)], Container::Mp4);
        let out = f.dir.path().join("out.mp4");
        let mut fixed = media_file(&out, Container::Mp4, vec![h264_video(0, 1280, 720), he_aac_audio(1)]);
        fixed.streams[1].codec_tag = Some("mp4a".into());
        write_media(&out, &fixed);

        let ok = verifier(Arc::new(FakeEngine::new()))
            .verify(&out, &f.analysis, &f.plan, &CancellationToken::new())
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn rejects_wrong_order() {
        let f = fixture(vec![he_aac_audio(0), h264_video(1, 1280, 720)], Container::Mp4);
        let out = f.dir.path().join("out.mp4");
        write_media(&out, &media_file(&out, Container::Mp4, vec![aac_audio(0), h264_video(1, 1280, 720)]));

        let err = verifier(Arc::new(FakeEngine::new()))
            .verify(&out, &f.analysis, &f.plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verify { .. }));
        assert!(err.to_string().contains("order"));
    }

    #[tokio::test]
    async fn rejects_disallowed_codec() {
        let f = fixture(vec![h264_video(0, 1280, 720), opus_audio(1)], Container::Mkv);
        let out = f.dir.path().join("out.mp4");
        write_media(&out, &media_file(&out, Container::Mp4, vec![h264_video(0, 1280, 720), opus_audio(1)]));

        let err = verifier(Arc::new(FakeEngine::new()))
            .verify(&out, &f.analysis, &f.plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("opus"));
    }

    #[tokio::test]
    async fn rejects_dropped_frames_on_quick_fix() {
        let f = fixture(vec![he_aac_audio(0), h264_video(1, 1280, 720)], Container::Mp4);
        let out = f.dir.path().join("out.mp4");
        let mut lossy = media_file(&out, Container::Mp4, vec![h264_video(0, 1280, 720), he_aac_audio(1)]);
        lossy.streams[1].codec_tag = Some("mp4a".into());
        lossy.streams[0].frame_count = Some(1439);
        write_media(&out, &lossy);

        let err = verifier(Arc::new(FakeEngine::new()))
            .verify(&out, &f.analysis, &f.plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("changed during repackaging"));
    }

    #[tokio::test]
    async fn rejects_lost_audio() {
        let f = fixture(vec![he_aac_audio(0), h264_video(1, 1280, 720)], Container::Mp4);
        let out = f.dir.path().join("out.mp4");
        write_media(&out, &media_file(&out, Container::Mp4, vec![h264_video(0, 1280, 720)]));

        let err = verifier(Arc::new(FakeEngine::new()))
            .verify(&out, &f.analysis, &f.plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("lost its audio"));
    }

    #[tokio::test]
    async fn unprobeable_output_is_verify_error() {
        let f = fixture(vec![h264_video(0, 1280, 720), aac_audio(1)], Container::Mkv);
        let out = f.dir.path().join("out.mp4");
        std::fs::write(&out, b"truncated").unwrap();

        let err = verifier(Arc::new(FakeEngine::new()))
            .verify(&out, &f.analysis, &f.plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verify { .. }));
    }
}
