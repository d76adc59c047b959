//! Per-file normalization state machine.
//!
//! ```text
//! Pending -> Probed -> Classified -> NoOp ------------------------> Done
//!                                 -> Remuxing ----> Verifying --> Done
//!                                 |      |  (remux error, once)
//!                                 |      v
//!                                 -> Transcoding -> Verifying
//! ```
//!
//! `Failed` is reachable from every non-terminal state. The source file is
//! never written; outputs go through a [`Workspace`] and are only moved into
//! place after verification.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use vn_av::{EncodeProgress, MediaEngine, Workspace};
use vn_core::config::Config;
use vn_core::{Error, IssueType, Method};

use crate::analysis::Analysis;
use crate::decision::DecisionEngine;
use crate::detect::IssueDetector;
use crate::prober::Prober;
use crate::remux::Remuxer;
use crate::transcode::Transcoder;
use crate::verify::Verifier;

/// Lifecycle state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Probed,
    Classified,
    NoOp,
    Remuxing,
    Transcoding,
    Verifying,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Probed)
                | (Probed, Classified)
                | (Classified, NoOp | Remuxing | Transcoding)
                | (NoOp, Done)
                | (Remuxing, Verifying | Transcoding)
                | (Transcoding, Verifying)
                | (Verifying, Done)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Probed => "probed",
            Self::Classified => "classified",
            Self::NoOp => "no_op",
            Self::Remuxing => "remuxing",
            Self::Transcoding => "transcoding",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The states one job passed through, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTrace {
    path: PathBuf,
    states: Vec<JobState>,
}

impl JobTrace {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            states: vec![JobState::Pending],
        }
    }

    pub fn states(&self) -> &[JobState] {
        &self.states
    }

    pub fn current(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Pending)
    }

    pub fn visits(&self, state: JobState) -> usize {
        self.states.iter().filter(|s| **s == state).count()
    }

    /// Move to `next`.
    ///
    /// Illegal transitions, and entering `Transcoding` a second time, are
    /// internal errors.
    pub fn advance(&mut self, next: JobState) -> vn_core::Result<()> {
        let current = self.current();
        if !current.can_transition_to(next)
            || (next == JobState::Transcoding && self.visits(JobState::Transcoding) > 0)
        {
            return Err(Error::Internal(format!(
                "illegal job transition {current} -> {next} for {}",
                self.path.display()
            )));
        }
        tracing::debug!(path = %self.path.display(), from = %current, to = %next, "job state");
        self.states.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if !self.current().is_terminal() {
            tracing::debug!(path = %self.path.display(), from = %self.current(), "job state -> failed");
            self.states.push(JobState::Failed);
        }
    }
}

/// Outcome of a successful normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeResult {
    /// The verified output, or the untouched source for [`Method::None`].
    pub output_path: PathBuf,
    pub method_used: Method,
    pub issues_resolved: Vec<IssueType>,
    pub verified: bool,
    /// The quick fix was abandoned for a full conversion.
    pub fell_back: bool,
}

/// Outcome plus the trace of states that produced it.
#[derive(Debug)]
pub struct Report {
    pub outcome: vn_core::Result<NormalizeResult>,
    pub trace: JobTrace,
}

impl Report {
    /// A job that failed before (or without) running its state machine.
    pub(crate) fn failed(path: &Path, error: Error) -> Self {
        let mut trace = JobTrace::new(path);
        trace.fail();
        Self {
            outcome: Err(error),
            trace,
        }
    }
}

/// Drives one file through probe, plan, transform and verify.
#[derive(Clone)]
pub struct Normalizer {
    prober: Prober,
    decision: DecisionEngine,
    remuxer: Remuxer,
    transcoder: Transcoder,
    verifier: Verifier,
    output_dir: Option<PathBuf>,
    output_suffix: String,
    target_extension: &'static str,
}

impl Normalizer {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &Config) -> Self {
        let detector = IssueDetector::new(config.policy.clone());
        Self {
            prober: Prober::new(engine.clone(), detector),
            decision: DecisionEngine::new(config.policy.clone(), config.conversion.clone()),
            remuxer: Remuxer::new(engine.clone(), config.policy.clone()),
            transcoder: Transcoder::new(engine.clone(), config.conversion.clone())
                .with_max_level(config.policy.max_video_level),
            verifier: Verifier::new(engine, config.policy.clone(), &config.pipeline),
            output_dir: config.pipeline.output_dir.clone(),
            output_suffix: config.pipeline.output_suffix.clone(),
            target_extension: config.policy.target_container.extension(),
        }
    }

    /// Read-only analysis of `path`.
    pub async fn analyze_video(&self, path: &Path) -> vn_core::Result<Analysis> {
        self.prober.analyze(path, &CancellationToken::new()).await
    }

    /// Normalize `path`, reusing `analysis` when it describes this path.
    pub async fn normalize_video(
        &self,
        path: &Path,
        analysis: Option<Analysis>,
    ) -> vn_core::Result<NormalizeResult> {
        self.normalize_with(path, analysis, &CancellationToken::new(), None)
            .await
            .outcome
    }

    /// Where the output for `source` goes:
    /// `<output_dir|source dir>/<stem>.<suffix>.<ext>`.
    pub fn destination_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let name = format!("{stem}.{}.{}", self.output_suffix, self.target_extension);
        let dir = match (&self.output_dir, source.parent()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(parent)) => parent.to_path_buf(),
            (None, None) => PathBuf::from("."),
        };
        dir.join(name)
    }

    /// Normalize with an explicit cancellation token and optional
    /// destination, returning the state trace alongside the outcome.
    pub async fn normalize_with(
        &self,
        path: &Path,
        analysis: Option<Analysis>,
        cancel: &CancellationToken,
        destination: Option<&Path>,
    ) -> Report {
        let mut trace = JobTrace::new(path);
        let outcome = self.run(path, analysis, cancel, destination, &mut trace).await;

        match &outcome {
            Ok(result) => tracing::info!(
                path = %path.display(),
                method = %result.method_used,
                output = %result.output_path.display(),
                fell_back = result.fell_back,
                "normalized"
            ),
            Err(e) => {
                trace.fail();
                tracing::error!(path = %path.display(), stage = e.stage(), "normalization failed: {e}");
            }
        }
        Report { outcome, trace }
    }

    async fn run(
        &self,
        path: &Path,
        analysis: Option<Analysis>,
        cancel: &CancellationToken,
        destination: Option<&Path>,
        trace: &mut JobTrace,
    ) -> vn_core::Result<NormalizeResult> {
        let analysis = match analysis {
            Some(a) if a.path() == path => a,
            _ => self.prober.analyze(path, cancel).await?,
        };
        trace.advance(JobState::Probed)?;

        let plan = self.decision.plan(&analysis);
        trace.advance(JobState::Classified)?;

        let issues_resolved = analysis.issues().kinds();
        if plan.method == Method::None {
            trace.advance(JobState::NoOp)?;
            trace.advance(JobState::Done)?;
            return Ok(NormalizeResult {
                output_path: path.to_path_buf(),
                method_used: Method::None,
                issues_resolved,
                verified: true,
                fell_back: false,
            });
        }

        let destination = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.destination_for(path));
        // Dropping the workspace on any early return discards partial output.
        let workspace = Workspace::for_destination(path, &destination)?;
        let on_progress = progress_logger(path);

        let (output, plan) = match plan.method {
            Method::QuickFix => {
                trace.advance(JobState::Remuxing)?;
                match self.remuxer.remux(&analysis, &plan, &workspace, cancel).await {
                    Ok(out) => (out, plan),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "quick fix impossible; falling back to full conversion"
                        );
                        let escalated = self.decision.escalate(&plan, &analysis);
                        trace.advance(JobState::Transcoding)?;
                        workspace.reset_output()?;
                        let out = self
                            .transcoder
                            .transcode(&analysis, &escalated, &workspace, &on_progress, cancel)
                            .await?;
                        (out, escalated)
                    }
                    Err(e) => return Err(e),
                }
            }
            Method::FullConversion | Method::None => {
                trace.advance(JobState::Transcoding)?;
                let out = self
                    .transcoder
                    .transcode(&analysis, &plan, &workspace, &on_progress, cancel)
                    .await?;
                (out, plan)
            }
        };

        trace.advance(JobState::Verifying)?;
        let verified = match self.verifier.verify(&output, &analysis, &plan, cancel).await {
            Ok(verified) => verified,
            Err(e) => {
                workspace.discard();
                return Err(e);
            }
        };

        let output_path = workspace.finalize()?;
        trace.advance(JobState::Done)?;

        Ok(NormalizeResult {
            output_path,
            method_used: plan.method,
            issues_resolved,
            verified,
            fell_back: plan.escalated,
        })
    }
}

/// Progress callback that logs encode progress for `path`.
fn progress_logger(path: &Path) -> impl Fn(EncodeProgress) + Send + Sync {
    let path = path.to_path_buf();
    move |p: EncodeProgress| {
        tracing::info!(
            path = %path.display(),
            pct = p.pct.map(|v| format!("{:.0}%", v * 100.0)).unwrap_or_else(|| "?".into()),
            fps = ?p.fps,
            speed = ?p.speed,
            "encoding"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{aac_audio, h264_video, hevc_video, media_file, opus_audio, write_media, FakeEngine};
    use vn_core::Container;

    fn normalizer(engine: Arc<FakeEngine>) -> Normalizer {
        Normalizer::new(engine, &Config::default())
    }

    #[test]
    fn legal_transitions() {
        use JobState::*;
        assert!(Pending.can_transition_to(Probed));
        assert!(Remuxing.can_transition_to(Transcoding));
        assert!(!Transcoding.can_transition_to(Remuxing));
        assert!(!Done.can_transition_to(Failed));
        assert!(Verifying.can_transition_to(Failed));
        assert!(!Classified.can_transition_to(Verifying));
    }

    #[test]
    fn transcoding_is_entered_once() {
        let mut trace = JobTrace::new(Path::new("/m/a.mkv"));
        for s in [JobState::Probed, JobState::Classified, JobState::Transcoding] {
            trace.advance(s).unwrap();
        }
        assert!(trace.advance(JobState::Transcoding).is_err());
        assert_eq!(trace.visits(JobState::Transcoding), 1);
    }

    #[test]
    fn destination_naming() {
        let n = normalizer(Arc::new(FakeEngine::new()));
        assert_eq!(
            n.destination_for(Path::new("/media/clip.mkv")),
            PathBuf::from("/media/clip.normalized.mp4")
        );

        let mut config = Config::default();
        config.pipeline.output_dir = Some(PathBuf::from("/out"));
        let n = Normalizer::new(Arc::new(FakeEngine::new()), &config);
        assert_eq!(
            n.destination_for(Path::new("/media/clip.mp4")),
            PathBuf::from("/out/clip.normalized.mp4")
        );
    }

    #[tokio::test]
    async fn compliant_file_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("ok.mp4");
        write_media(&src, &media_file(&src, Container::Mp4, vec![h264_video(0, 1280, 720), aac_audio(1)]));

        let engine = Arc::new(FakeEngine::new());
        let report = normalizer(engine.clone())
            .normalize_with(&src, None, &CancellationToken::new(), None)
            .await;
        let result = report.outcome.unwrap();
        assert_eq!(result.output_path, src);
        assert_eq!(result.method_used, Method::None);
        assert!(result.verified);
        assert_eq!(
            report.trace.states(),
            &[JobState::Pending, JobState::Probed, JobState::Classified, JobState::NoOp, JobState::Done]
        );
        assert_eq!(engine.remux_calls() + engine.transcode_calls(), 0);
        // Nothing but the source in the directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn fallback_trace() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("opus.mkv");
        write_media(&src, &media_file(&src, Container::Mkv, vec![h264_video(0, 1280, 720), opus_audio(1)]));

        let engine = Arc::new(FakeEngine::new());
        let report = normalizer(engine.clone())
            .normalize_with(&src, None, &CancellationToken::new(), None)
            .await;
        let result = report.outcome.unwrap();
        assert!(result.fell_back);
        assert_eq!(result.method_used, Method::FullConversion);
        assert_eq!(
            report.trace.states(),
            &[
                JobState::Pending,
                JobState::Probed,
                JobState::Classified,
                JobState::Remuxing,
                JobState::Transcoding,
                JobState::Verifying,
                JobState::Done
            ]
        );
    }

    #[tokio::test]
    async fn failure_ends_in_failed_state() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hevc.mp4");
        write_media(&src, &media_file(&src, Container::Mp4, vec![hevc_video(0), aac_audio(1)]));

        let engine = Arc::new(FakeEngine::new());
        engine.fail_next_transcodes(2);
        let report = normalizer(engine)
            .normalize_with(&src, None, &CancellationToken::new(), None)
            .await;
        assert!(matches!(report.outcome, Err(Error::Transcode { .. })));
        assert_eq!(report.trace.current(), JobState::Failed);
        assert!(!dir.path().join("hevc.normalized.mp4").exists());
    }

    #[tokio::test]
    async fn supplied_analysis_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hevc.mp4");
        write_media(&src, &media_file(&src, Container::Mp4, vec![hevc_video(0), aac_audio(1)]));

        let engine = Arc::new(FakeEngine::new());
        let n = normalizer(engine.clone());
        let analysis = n.analyze_video(&src).await.unwrap();
        let probes_before = engine.probe_calls();

        n.normalize_video(&src, Some(analysis)).await.unwrap();
        // Only the verifier probed (full conversion: output only).
        assert_eq!(engine.probe_calls(), probes_before + 1);
    }
}
