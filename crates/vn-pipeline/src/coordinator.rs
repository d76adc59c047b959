//! Bounded worker pool running many normalizations concurrently.
//!
//! A fixed number of workers pull from one bounded queue. Submitting to a
//! full queue waits, so no more than `concurrency` external encodes run at
//! once and callers feel backpressure instead of piling up processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vn_core::config::PipelineConfig;
use vn_core::Error;

use crate::analysis::Analysis;
use crate::normalizer::{NormalizeResult, Normalizer, Report};

/// One file to normalize.
#[derive(Debug, Clone)]
pub struct NormalizeJob {
    pub path: PathBuf,
    /// A previous analysis of `path`; re-probed when absent.
    pub analysis: Option<Analysis>,
    /// Abort this job (and only this job) after this long.
    pub deadline: Option<Duration>,
}

impl NormalizeJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            analysis: None,
            deadline: None,
        }
    }

    pub fn with_analysis(mut self, analysis: Analysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

struct Envelope {
    job: NormalizeJob,
    reply: oneshot::Sender<Report>,
}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    path: PathBuf,
    rx: oneshot::Receiver<Report>,
}

impl JobHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the job's report.
    pub async fn wait(self) -> Report {
        match self.rx.await {
            Ok(report) => report,
            Err(_) => Report::failed(
                &self.path,
                Error::pipeline("coordinator", "worker pool shut down before the job finished"),
            ),
        }
    }
}

/// Result for one file of a batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub path: PathBuf,
    pub result: vn_core::Result<NormalizeResult>,
}

/// Fixed-size pool of normalization workers.
pub struct WorkerPool {
    tx: Option<mpsc::Sender<Envelope>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    default_deadline: Option<Duration>,
}

impl WorkerPool {
    /// Start `concurrency` workers behind a queue of `queue_capacity` jobs.
    pub fn new(normalizer: Normalizer, concurrency: usize, queue_capacity: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::channel::<Envelope>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let workers = (0..concurrency)
            .map(|id| {
                let normalizer = normalizer.clone();
                let rx = rx.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(id, normalizer, rx, cancel))
            })
            .collect();

        tracing::info!(concurrency, queue_capacity, "worker pool started");
        Self {
            tx: Some(tx),
            cancel,
            workers,
            default_deadline: None,
        }
    }

    /// Pool sized and timed from the pipeline section of the config.
    pub fn from_config(normalizer: Normalizer, pipeline: &PipelineConfig) -> Self {
        Self::new(normalizer, pipeline.workers(), pipeline.queue_capacity())
            .with_default_deadline(pipeline.job_timeout())
    }

    /// Deadline applied to jobs that don't carry their own.
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, mut job: NormalizeJob) -> vn_core::Result<JobHandle> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::pipeline("coordinator", "worker pool is shut down"))?;

        if job.deadline.is_none() {
            job.deadline = self.default_deadline;
        }
        let path = job.path.clone();
        let (reply, rx) = oneshot::channel();
        tx.send(Envelope { job, reply })
            .await
            .map_err(|_| Error::pipeline("coordinator", "job queue closed"))?;

        tracing::debug!(path = %path.display(), "job queued");
        Ok(JobHandle { path, rx })
    }

    /// Normalize every path, returning outcomes in submission order.
    ///
    /// A failing file is recorded and the rest of the batch continues.
    pub async fn run_batch(&self, paths: Vec<PathBuf>) -> Vec<BatchOutcome> {
        let mut pending = Vec::with_capacity(paths.len());
        for path in paths {
            match self.submit(NormalizeJob::new(path.clone())).await {
                Ok(handle) => pending.push(Ok(handle)),
                Err(e) => pending.push(Err((path, e))),
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            let outcome = match entry {
                Ok(handle) => {
                    let path = handle.path().to_path_buf();
                    BatchOutcome {
                        path,
                        result: handle.wait().await.outcome,
                    }
                }
                Err((path, e)) => BatchOutcome { path, result: Err(e) },
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Close the queue, cancel in-flight jobs and wait for the workers.
    ///
    /// Jobs still queued resolve with a pipeline error.
    pub async fn shutdown(mut self) {
        self.tx.take();
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!("worker task failed: {e}");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker_loop(
    id: usize,
    normalizer: Normalizer,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = async { rx.lock().await.recv().await } => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let Envelope { job, reply } = envelope;
        tracing::debug!(worker = id, path = %job.path.display(), "job started");
        let report = run_job(&normalizer, job, &cancel).await;
        // The submitter may have stopped waiting.
        let _ = reply.send(report);
    }
    tracing::debug!(worker = id, "worker exiting");
}

/// Run one job under its own cancellation scope and deadline.
///
/// When the deadline expires the normalization future is dropped, which
/// kills its external process and discards its workspace.
async fn run_job(normalizer: &Normalizer, job: NormalizeJob, pool_cancel: &CancellationToken) -> Report {
    let NormalizeJob {
        path,
        analysis,
        deadline,
    } = job;
    let cancel = pool_cancel.child_token();
    let work = normalizer.normalize_with(&path, analysis, &cancel, None);

    match deadline {
        None => work.await,
        Some(after) => match tokio::time::timeout(after, work).await {
            Ok(report) => report,
            Err(_) => {
                cancel.cancel();
                tracing::error!(path = %path.display(), after = ?after, "job deadline exceeded");
                Report::failed(&path, Error::DeadlineExceeded { path: path.clone(), after })
            }
        },
    }
}
