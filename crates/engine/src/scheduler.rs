//! Bounded parallel upload with sequential fallback.
//!
//! Tasks are partitioned round-robin across tokio workers before dispatch.
//! Each worker opens its own channel per file over the shared session, so
//! channels never cross workers. The caller's fallback channel stays open
//! throughout and counts against the bound. When the session cannot
//! multiplex channels, or the server refuses to open more of them, the
//! affected tasks run in input order on the fallback channel instead.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RemoteError;
use crate::session::{Channel, RemoteSession, SessionCapabilities};
use crate::types::{
    DEFAULT_MAX_WORKERS, DeployEvent, Failure, FailureKind, TaskOutcome, TransferTask, UploadMode,
};

/// Settled tasks and how they were executed.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub mode: UploadMode,
    /// Every input task in input order, each in a terminal state.
    pub tasks: Vec<TransferTask>,
    /// Set when a session-level error stopped the remaining transfers.
    pub session_lost: Option<String>,
}

impl UploadReport {
    pub fn succeeded(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Succeeded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Failed { .. }))
            .count()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.tasks
            .iter()
            .map(|t| match t.outcome {
                TaskOutcome::Succeeded { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.tasks
            .iter()
            .filter_map(|t| match &t.outcome {
                TaskOutcome::Failed { cause } => Some(Failure {
                    kind: FailureKind::Transfer,
                    source: Some(t.local.clone()),
                    destination: t.remote.clone(),
                    cause: cause.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Distributes transfer tasks over a bounded pool of workers.
#[derive(Debug, Clone, Copy)]
pub struct UploadScheduler {
    max_workers: usize,
}

impl Default for UploadScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl UploadScheduler {
    /// Creates a scheduler; a bound of 0 is treated as 1.
    ///
    /// The bound covers every channel open at once, including the fallback
    /// channel passed to [`run`](Self::run).
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Picks the execution mode for `task_count` tasks.
    ///
    /// One slot of the bound belongs to the fallback channel; parallel mode
    /// needs room for at least two workers beside it.
    pub fn choose_mode(
        &self,
        capabilities: SessionCapabilities,
        allow_parallel: bool,
        task_count: usize,
    ) -> UploadMode {
        let worker_slots = self.max_workers - 1;
        if !capabilities.concurrent_channels || !allow_parallel || worker_slots < 2 {
            return UploadMode::Sequential;
        }
        UploadMode::Parallel {
            workers: worker_slots.min(task_count).max(1),
        }
    }

    /// Runs every task to a terminal state.
    ///
    /// Individual failures are recorded on their task and never stop other
    /// tasks; a session-level error marks all not-yet-started tasks as
    /// cancelled.
    pub async fn run(
        &self,
        session: &Arc<dyn RemoteSession>,
        fallback: &mut dyn Channel,
        tasks: Vec<TransferTask>,
        allow_parallel: bool,
        cancel: &CancellationToken,
        events_tx: &UnboundedSender<DeployEvent>,
    ) -> UploadReport {
        let capabilities = session.capabilities();
        let mode = self.choose_mode(capabilities, allow_parallel, tasks.len());

        if !capabilities.concurrent_channels {
            announce_fallback("session does not support concurrent channels".into(), events_tx);
        }

        match mode {
            UploadMode::Parallel { workers } => {
                info!(files = tasks.len(), workers, "starting parallel upload");
                run_parallel(session, fallback, tasks, workers, cancel, events_tx).await
            }
            UploadMode::Sequential => {
                info!(files = tasks.len(), "starting sequential upload");
                let mut tasks = tasks;
                let session_lost = run_in_order(fallback, tasks.iter_mut(), cancel, events_tx).await;
                UploadReport {
                    mode,
                    tasks,
                    session_lost,
                }
            }
        }
    }
}

fn announce_fallback(reason: String, events_tx: &UnboundedSender<DeployEvent>) {
    warn!(%reason, "falling back to sequential upload");
    let _ = events_tx.send(DeployEvent::FallbackToSequential { reason });
}

async fn run_parallel(
    session: &Arc<dyn RemoteSession>,
    fallback: &mut dyn Channel,
    tasks: Vec<TransferTask>,
    workers: usize,
    cancel: &CancellationToken,
    events_tx: &UnboundedSender<DeployEvent>,
) -> UploadReport {
    let abort = cancel.child_token();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let mut partitions: Vec<Vec<(usize, TransferTask)>> = vec![Vec::new(); workers];
    for (index, task) in tasks.iter().cloned().enumerate() {
        partitions[index % workers].push((index, task));
    }

    let mut handles = Vec::with_capacity(workers);
    for (worker_id, partition) in partitions.into_iter().enumerate() {
        handles.push(tokio::spawn(run_worker(
            worker_id,
            Arc::clone(session),
            partition,
            abort.clone(),
            events_tx.clone(),
            done_tx.clone(),
        )));
    }
    drop(done_tx);

    let mut session_lost = None;
    for handle in handles {
        match handle.await {
            Ok(lost) => session_lost = session_lost.or(lost),
            Err(e) => error!(error = %e, "upload worker aborted"),
        }
    }

    // Workers report each task as it settles, so an aborted worker only
    // loses the tasks it had not finished.
    let mut reported: Vec<Option<TransferTask>> = vec![None; tasks.len()];
    while let Some((index, task)) = done_rx.recv().await {
        reported[index] = Some(task);
    }
    let mut tasks: Vec<TransferTask> = tasks
        .into_iter()
        .zip(reported)
        .map(|(original, reported)| {
            reported.unwrap_or_else(|| {
                let mut task = original;
                record_failure(&mut task, "upload worker aborted".into(), events_tx);
                task
            })
        })
        .collect();

    // Tasks still pending were refused a channel and never attempted.
    let deferred = tasks.iter().filter(|t| !t.is_settled()).count();
    if deferred > 0 {
        if session_lost.is_some() || cancel.is_cancelled() {
            for task in tasks.iter_mut().filter(|t| !t.is_settled()) {
                task.fail("cancelled");
            }
        } else {
            announce_fallback(
                format!("server refused additional channels; {deferred} files left"),
                events_tx,
            );
            let pending: Vec<&mut TransferTask> =
                tasks.iter_mut().filter(|t| !t.is_settled()).collect();
            session_lost = run_in_order(
                fallback,
                pending,
                cancel,
                events_tx,
            )
            .await;
        }
    }

    UploadReport {
        mode: UploadMode::Parallel { workers },
        tasks,
        session_lost,
    }
}

/// Uploads one partition, sending every task back through `done_tx` as soon
/// as it settles. Tasks left `Pending` were refused a channel.
async fn run_worker(
    worker_id: usize,
    session: Arc<dyn RemoteSession>,
    tasks: Vec<(usize, TransferTask)>,
    abort: CancellationToken,
    events_tx: UnboundedSender<DeployEvent>,
    done_tx: UnboundedSender<(usize, TransferTask)>,
) -> Option<String> {
    let mut session_lost = None;
    let mut refused = false;

    for (index, mut task) in tasks {
        if abort.is_cancelled() {
            task.fail("cancelled");
        } else if !refused {
            match session.open_channel().await {
                Ok(mut channel) => {
                    debug!(worker = worker_id, remote = %task.remote, "uploading");
                    let result = channel.put(&task.local, &task.remote).await;
                    channel.close().await;
                    let lost = settle(&mut task, result, "", &abort, &events_tx);
                    session_lost = session_lost.or(lost);
                }
                Err(e) if e.is_channel_refused() => {
                    debug!(worker = worker_id, error = %e, "channel refused, deferring partition");
                    refused = true;
                }
                Err(e) => {
                    let lost = settle(&mut task, Err(e), "channel open failed: ", &abort, &events_tx);
                    session_lost = session_lost.or(lost);
                }
            }
        }
        let _ = done_tx.send((index, task));
    }

    session_lost
}

/// Uploads `tasks` one after another on `channel`, in iteration order.
async fn run_in_order<'t>(
    channel: &mut dyn Channel,
    tasks: impl IntoIterator<Item = &'t mut TransferTask>,
    cancel: &CancellationToken,
    events_tx: &UnboundedSender<DeployEvent>,
) -> Option<String> {
    let abort = cancel.child_token();
    let mut session_lost = None;

    for task in tasks {
        if abort.is_cancelled() {
            task.fail("cancelled");
            continue;
        }

        debug!(remote = %task.remote, "uploading");
        let result = channel.put(&task.local, &task.remote).await;
        let lost = settle(task, result, "", &abort, events_tx);
        session_lost = session_lost.or(lost);
    }

    session_lost
}

/// Records a transfer result on `task`. Returns the cause when the session
/// was lost, after cancelling `abort` so no further task starts.
fn settle(
    task: &mut TransferTask,
    result: Result<u64, RemoteError>,
    context: &str,
    abort: &CancellationToken,
    events_tx: &UnboundedSender<DeployEvent>,
) -> Option<String> {
    match result {
        Ok(bytes) => {
            task.succeed(bytes);
            let _ = events_tx.send(DeployEvent::FileUploaded {
                local: task.local.clone(),
                remote: task.remote.clone(),
                bytes,
            });
            None
        }
        Err(e) => {
            let cause = format!("{context}{e}");
            record_failure(task, cause.clone(), events_tx);
            if e.is_session_fatal() {
                abort.cancel();
                Some(cause)
            } else {
                None
            }
        }
    }
}

fn record_failure(task: &mut TransferTask, cause: String, events_tx: &UnboundedSender<DeployEvent>) {
    warn!(
        local = %task.local.display(),
        remote = %task.remote,
        error = %cause,
        "upload failed"
    );
    let _ = events_tx.send(DeployEvent::FileFailed {
        local: task.local.clone(),
        remote: task.remote.clone(),
        error: cause.clone(),
    });
    task.fail(cause);
}
