use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use veracity_core::{pipeline, CancelToken, FaceFeatureExtractor, Verdict, VideoOpener};
use veracity_media::HelperError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extractor error: {0}")]
    Extractor(#[from] HelperError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("analysis timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("engine workers exited")]
    ChannelClosed,
}

/// Work item sent from D-Bus handlers to the worker pool.
struct AnalyzeRequest {
    path: PathBuf,
    cancel: CancelToken,
    reply: oneshot::Sender<Verdict>,
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<AnalyzeRequest>,
    workers: usize,
}

impl EngineHandle {
    /// Analyze a video on a worker thread.
    ///
    /// The timeout covers queueing and analysis. When it fires the request is
    /// cancelled and the worker stops at the next frame boundary.
    pub async fn analyze(&self, path: PathBuf, timeout: Duration) -> Result<Verdict, EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let cancel = CancelToken::new();
        let request = AnalyzeRequest {
            path,
            cancel: cancel.clone(),
            reply: reply_tx,
        };

        match tokio::time::timeout_at(deadline, self.tx.send(request)).await {
            Ok(sent) => sent.map_err(|_| EngineError::ChannelClosed)?,
            Err(_) => return Err(EngineError::Timeout(timeout)),
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed),
            Err(_) => {
                cancel.cancel();
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Spawn `workers` analysis threads, each owning its own extractor.
///
/// All extractors are created before any thread starts; if one fails to
/// start the whole engine fails.
pub fn spawn_engine<F>(
    opener: Arc<dyn VideoOpener>,
    workers: usize,
    make_extractor: F,
) -> Result<EngineHandle, EngineError>
where
    F: Fn() -> Result<Box<dyn FaceFeatureExtractor>, HelperError>,
{
    let workers = workers.max(1);
    let mut extractors = Vec::with_capacity(workers);
    for id in 0..workers {
        extractors.push(make_extractor()?);
        tracing::debug!(worker = id, "extractor ready");
    }

    let (tx, rx) = mpsc::channel::<AnalyzeRequest>(workers * 2);
    let rx = Arc::new(Mutex::new(rx));

    for (id, extractor) in extractors.into_iter().enumerate() {
        let rx = Arc::clone(&rx);
        let opener = Arc::clone(&opener);
        std::thread::Builder::new()
            .name(format!("veracity-worker-{id}"))
            .spawn(move || run_worker(id, rx, opener, extractor))
            .map_err(EngineError::Spawn)?;
    }

    tracing::info!(workers, "engine started");
    Ok(EngineHandle { tx, workers })
}

fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<AnalyzeRequest>>>,
    opener: Arc<dyn VideoOpener>,
    mut extractor: Box<dyn FaceFeatureExtractor>,
) {
    tracing::info!(worker = id, "worker started");
    loop {
        // One idle worker waits on the queue, the rest wait on the lock.
        let next = {
            let mut queue = rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            queue.blocking_recv()
        };
        let Some(req) = next else {
            break;
        };

        if req.reply.is_closed() || req.cancel.is_cancelled() {
            tracing::debug!(worker = id, path = %req.path.display(), "caller gone, skipping");
            continue;
        }

        tracing::debug!(worker = id, path = %req.path.display(), "analysis started");
        let verdict = catch_unwind(AssertUnwindSafe(|| {
            pipeline::analyze(opener.as_ref(), extractor.as_mut(), &req.path, &req.cancel)
        }))
        .unwrap_or_else(|_| {
            tracing::error!(worker = id, path = %req.path.display(), "analysis panicked");
            Verdict::analysis_failed("internal error during analysis")
        });
        let _ = req.reply.send(verdict);
    }
    tracing::info!(worker = id, "worker exiting");
}
