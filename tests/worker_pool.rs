//! Worker pool behavior under load, deadlines and shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vn_core::config::Config;
use vn_core::{Container, Error, Method};
use vn_pipeline::testing::{aac_audio, h264_video, hevc_video, media_file, write_media, FakeEngine};
use vn_pipeline::{NormalizeJob, Normalizer, WorkerPool};

fn hevc(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    write_media(&path, &media_file(&path, Container::Mp4, vec![hevc_video(0), aac_audio(1)]));
    path
}

#[tokio::test]
async fn mixed_batch_keeps_going_after_failures() {
    let dir = tempfile::tempdir().unwrap();
    let compliant = dir.path().join("ok.mp4");
    write_media(
        &compliant,
        &media_file(&compliant, Container::Mp4, vec![h264_video(0, 1920, 1080), aac_audio(1)]),
    );
    let empty = dir.path().join("empty.mp4");
    std::fs::write(&empty, b"").unwrap();

    let paths = vec![
        hevc(dir.path(), "one.mp4"),
        empty.clone(),
        compliant.clone(),
        hevc(dir.path(), "two.mp4"),
    ];

    let mut config = Config::default();
    config.pipeline.concurrency = 3;
    let normalizer = Normalizer::new(Arc::new(FakeEngine::new()), &config);
    let pool = WorkerPool::from_config(normalizer, &config.pipeline);
    let outcomes = pool.run_batch(paths.clone()).await;
    pool.shutdown().await;

    assert_eq!(outcomes.iter().map(|o| o.path.clone()).collect::<Vec<_>>(), paths);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(outcomes[1].result, Err(Error::Probe { .. })));
    assert_eq!(outcomes[2].result.as_ref().unwrap().method_used, Method::None);
    assert!(outcomes[3].result.is_ok());
}

#[tokio::test]
async fn single_worker_never_overlaps_encodes() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..4).map(|i| hevc(dir.path(), &format!("{i}.mp4"))).collect();

    let engine = Arc::new(FakeEngine::new().with_transcode_delay(Duration::from_millis(20)));
    let normalizer = Normalizer::new(engine.clone(), &Config::default());
    let pool = WorkerPool::new(normalizer, 1, 1);
    let outcomes = pool.run_batch(paths).await;
    pool.shutdown().await;

    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(engine.max_concurrent_transcodes(), 1);
}

#[tokio::test]
async fn configured_timeout_applies_to_every_job() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![hevc(dir.path(), "a.mp4"), hevc(dir.path(), "b.mp4")];

    let engine = Arc::new(FakeEngine::new().with_transcode_delay(Duration::from_secs(30)));
    let normalizer = Normalizer::new(engine, &Config::default());
    let pool = WorkerPool::new(normalizer, 2, 4).with_default_deadline(Some(Duration::from_millis(40)));
    let outcomes = pool.run_batch(paths).await;
    pool.shutdown().await;

    for outcome in &outcomes {
        assert!(
            matches!(outcome.result, Err(Error::DeadlineExceeded { .. })),
            "{:?}",
            outcome.result
        );
    }
}

#[tokio::test]
async fn shutdown_cancels_running_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = hevc(dir.path(), "slow.mp4");

    let engine = Arc::new(FakeEngine::new().with_transcode_delay(Duration::from_secs(30)));
    let normalizer = Normalizer::new(engine.clone(), &Config::default());
    let pool = WorkerPool::new(normalizer, 1, 1);
    let handle = pool.submit(NormalizeJob::new(&path)).await.unwrap();

    // Let the worker reach the encode.
    while engine.transcode_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pool.shutdown().await;

    let report = handle.wait().await;
    let err = report.outcome.unwrap_err();
    assert!(err.is_cancellation(), "{err}");
    assert_eq!(
        std::fs::read_dir(dir.path()).unwrap().count(),
        1,
        "only the source should remain"
    );
}
