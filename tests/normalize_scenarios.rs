//! End-to-end normalization scenarios through the public `Normalizer` API,
//! driven by the scripted engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vn_core::config::Config;
use vn_core::{Container, Error, IssueType, Method};
use vn_pipeline::testing::{
    aac_audio, av1_video, h264_video, he_aac_audio, hevc_video, media_file, opus_audio,
    write_media, FakeEngine,
};
use vn_pipeline::{JobState, Normalizer};

fn source(dir: &TempDir, name: &str, container: Container, streams: Vec<vn_av::StreamInfo>) -> PathBuf {
    let path = dir.path().join(name);
    write_media(&path, &media_file(&path, container, streams));
    path
}

fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn scenario_a_misordered_he_aac_is_quick_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "a.mp4", Container::Mp4, vec![he_aac_audio(0), h264_video(1, 1920, 1080)]);
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let analysis = normalizer.analyze_video(&src).await.unwrap();
    assert_eq!(analysis.issues().kinds(), vec![IssueType::StreamOrder, IssueType::AudioCodec]);
    assert_eq!(analysis.method(), Method::QuickFix);

    let result = normalizer.normalize_video(&src, Some(analysis)).await.unwrap();
    assert_eq!(result.method_used, Method::QuickFix);
    assert_eq!(result.output_path, dir.path().join("a.normalized.mp4"));
    assert!(result.verified);
    assert!(!result.fell_back);
    assert_eq!(result.issues_resolved, vec![IssueType::StreamOrder, IssueType::AudioCodec]);
    assert_eq!(engine.remux_calls(), 1);
    assert_eq!(engine.transcode_calls(), 0);
}

#[tokio::test]
async fn scenario_b_av1_opus_is_fully_converted() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "b.webm", Container::Webm, vec![av1_video(0), opus_audio(1)]);
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let analysis = normalizer.analyze_video(&src).await.unwrap();
    assert!(analysis.issues().contains(IssueType::VideoCodec));
    assert!(analysis.issues().contains(IssueType::AudioCodec));
    assert!(analysis.needs_full_conversion());

    let result = normalizer.normalize_video(&src, None).await.unwrap();
    assert_eq!(result.method_used, Method::FullConversion);
    assert_eq!(engine.remux_calls(), 0);

    let req = engine.last_transcode().unwrap();
    assert!(matches!(req.audio, vn_av::AudioEncode::Encode { .. }));
}

#[tokio::test]
async fn scenario_c_hevc_copies_audio() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "c.mp4", Container::Mp4, vec![hevc_video(0), aac_audio(1)]);
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let analysis = normalizer.analyze_video(&src).await.unwrap();
    assert_eq!(analysis.issues().kinds(), vec![IssueType::VideoCodec]);

    let result = normalizer.normalize_video(&src, Some(analysis)).await.unwrap();
    assert_eq!(result.method_used, Method::FullConversion);
    assert_eq!(engine.last_transcode().unwrap().audio, vn_av::AudioEncode::Copy);
}

#[tokio::test]
async fn scenario_d_compliant_file_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "d.mp4", Container::Mp4, vec![h264_video(0, 1280, 720), aac_audio(1)]);
    let before = std::fs::read(&src).unwrap();
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let analysis = normalizer.analyze_video(&src).await.unwrap();
    assert!(analysis.issues().is_empty());
    assert!(!analysis.needs_normalization());

    let result = normalizer.normalize_video(&src, Some(analysis)).await.unwrap();
    assert_eq!(result.method_used, Method::None);
    assert_eq!(result.output_path, src);
    assert_eq!(std::fs::read(&src).unwrap(), before);
    assert_eq!(dir_listing(dir.path()), vec!["d.mp4"]);
}

#[tokio::test]
async fn remux_failure_falls_back_once() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "f.mp4", Container::Mp4, vec![he_aac_audio(0), h264_video(1, 1280, 720)]);
    let engine = Arc::new(FakeEngine::new());
    engine.fail_next_remuxes(1);
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let report = normalizer
        .normalize_with(&src, None, &Default::default(), None)
        .await;
    let result = report.outcome.unwrap();
    assert!(result.fell_back);
    assert_eq!(result.method_used, Method::FullConversion);
    assert_eq!(report.trace.visits(JobState::Transcoding), 1);
    assert_eq!(report.trace.visits(JobState::Remuxing), 1);
    assert_eq!(engine.transcode_calls(), 1);
}

#[tokio::test]
async fn fallback_transcode_failing_twice_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "g.mp4", Container::Mp4, vec![he_aac_audio(0), h264_video(1, 1280, 720)]);
    let before = std::fs::read(&src).unwrap();
    let engine = Arc::new(FakeEngine::new());
    engine.fail_next_remuxes(1);
    engine.fail_next_transcodes(2);
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let report = normalizer
        .normalize_with(&src, None, &Default::default(), None)
        .await;
    assert!(matches!(report.outcome, Err(Error::Transcode { .. })));
    assert_eq!(report.trace.visits(JobState::Transcoding), 1);
    assert_eq!(report.trace.current(), JobState::Failed);
    assert_eq!(engine.transcode_calls(), 2);
    assert_eq!(std::fs::read(&src).unwrap(), before);
    assert_eq!(dir_listing(dir.path()), vec!["g.mp4"]);
}

#[tokio::test]
async fn high_10_profile_is_re_encoded_after_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let mut video = h264_video(0, 1920, 1080);
    video.profile = Some("High 10".into());
    let src = source(&dir, "p.mp4", Container::Mp4, vec![video, aac_audio(1)]);
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let analysis = normalizer.analyze_video(&src).await.unwrap();
    assert_eq!(analysis.issues().kinds(), vec![IssueType::ProfileMismatch]);
    assert_eq!(analysis.method(), Method::QuickFix);

    let report = normalizer
        .normalize_with(&src, Some(analysis), &Default::default(), None)
        .await;
    let result = report.outcome.unwrap();
    assert!(result.fell_back);
    assert!(result.verified);
    assert_eq!(result.method_used, Method::FullConversion);
    assert_eq!(report.trace.visits(JobState::Remuxing), 1);
    assert_eq!(report.trace.visits(JobState::Transcoding), 1);
    assert_eq!(report.trace.current(), JobState::Done);
    // Refused before ffmpeg ever ran.
    assert_eq!(engine.remux_calls(), 0);
    assert_eq!(engine.transcode_calls(), 1);

    let out = normalizer.analyze_video(&result.output_path).await.unwrap();
    assert_eq!(out.video_profile(), Some("High"));
    assert!(out.issues().is_empty());
}

#[tokio::test]
async fn over_level_8k_is_capped_and_downscaled() {
    let dir = tempfile::tempdir().unwrap();
    let mut video = h264_video(0, 7680, 4320);
    video.level = Some(61);
    let src = source(&dir, "8k.mp4", Container::Mp4, vec![video, aac_audio(1)]);
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &Config::default());

    let report = normalizer
        .normalize_with(&src, None, &Default::default(), None)
        .await;
    let result = report.outcome.unwrap();
    assert!(result.fell_back);
    assert_eq!(result.method_used, Method::FullConversion);
    assert_eq!(result.issues_resolved, vec![IssueType::ProfileMismatch]);
    assert_eq!(report.trace.visits(JobState::Transcoding), 1);

    let req = engine.last_transcode().unwrap();
    let args = req.ffmpeg_args();
    assert!(args.windows(2).any(|w| w[0] == "-level:v" && w[1] == "5.2"), "{args:?}");
    assert!(args.windows(2).any(|w| w[0] == "-vf" && w[1] == "scale=4096:2304"), "{args:?}");

    let out = normalizer.analyze_video(&result.output_path).await.unwrap();
    assert_eq!(out.video_level(), Some(52));
    assert_eq!(out.resolution().map(|r| (r.width, r.height)), Some((4096, 2304)));
    assert!(!out.needs_normalization());
}

#[tokio::test]
async fn level_cap_follows_policy() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "uhd.mp4", Container::Mp4, vec![h264_video(0, 3840, 2160), aac_audio(1)]);
    // The fixture is level 4.0; a stricter policy flags it.
    let mut config = Config::default();
    config.policy.max_video_level = Some(31);
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine.clone(), &config);

    let result = normalizer.normalize_video(&src, None).await.unwrap();
    assert!(result.fell_back);
    let out = normalizer.analyze_video(&result.output_path).await.unwrap();
    assert_eq!(out.video_level(), Some(31));
    let res = out.resolution().unwrap();
    assert!(res.width.div_ceil(16) * res.height.div_ceil(16) <= 3600, "{res}");
}

#[tokio::test]
async fn verify_failure_discards_output() {
    let dir = tempfile::tempdir().unwrap();
    let src = source(&dir, "v.mp4", Container::Mp4, vec![hevc_video(0), aac_audio(1)]);
    let before = std::fs::read(&src).unwrap();

    // Produce MKV while only MP4 is deliverable: the output can never verify.
    let mut config = Config::default();
    config.policy.target_container = Container::Mkv;
    let normalizer = Normalizer::new(Arc::new(FakeEngine::new()), &config);

    let err = normalizer.normalize_video(&src, None).await.unwrap_err();
    assert!(matches!(err, Error::Verify { .. }));
    assert_eq!(std::fs::read(&src).unwrap(), before);
    assert_eq!(dir_listing(dir.path()), vec!["v.mp4"]);
}

#[tokio::test]
async fn normalized_output_needs_nothing_more() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let normalizer = Normalizer::new(engine, &Config::default());

    let inputs = [
        source(&dir, "a.mp4", Container::Mp4, vec![he_aac_audio(0), h264_video(1, 1920, 1080)]),
        source(&dir, "b.webm", Container::Webm, vec![av1_video(0), opus_audio(1)]),
        source(&dir, "c.mkv", Container::Mkv, vec![h264_video(0, 1280, 720), opus_audio(1)]),
    ];
    for src in &inputs {
        let first = normalizer.normalize_video(src, None).await.unwrap();
        let again = normalizer.analyze_video(&first.output_path).await.unwrap();
        assert!(
            !again.needs_normalization(),
            "{} still has {:?}",
            first.output_path.display(),
            again.issues().kinds()
        );
    }
}

#[tokio::test]
async fn unreadable_input_is_probe_error() {
    let dir = tempfile::tempdir().unwrap();
    let junk = dir.path().join("junk.mkv");
    std::fs::write(&junk, b"\x00\x01garbage").unwrap();
    let normalizer = Normalizer::new(Arc::new(FakeEngine::new()), &Config::default());

    let err = normalizer.normalize_video(&junk, None).await.unwrap_err();
    assert!(matches!(err, Error::Probe { .. }));
    assert_eq!(dir_listing(dir.path()), vec!["junk.mkv"]);
}

#[tokio::test]
async fn output_dir_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let src = source(&dir, "c.mp4", Container::Mp4, vec![hevc_video(0), aac_audio(1)]);
    let mut config = Config::default();
    config.pipeline.output_dir = Some(out.path().to_path_buf());
    let normalizer = Normalizer::new(Arc::new(FakeEngine::new()), &config);

    let result = normalizer.normalize_video(&src, None).await.unwrap();
    assert_eq!(result.output_path, out.path().join("c.normalized.mp4"));
    assert!(result.output_path.exists());
}
