//! Deploy driver: one end-to-end run.
//!
//! Scans the local tree, connects, provisions directories, uploads files
//! and always closes the session, emitting a [`DeployEvent`] per step.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::DeployError;
use crate::provision::{ProvisionReport, provision};
use crate::scanner::scan_tree;
use crate::scheduler::{UploadReport, UploadScheduler};
use crate::session::{Channel, Connector, RemoteSession};
use crate::types::{DeployConfig, DeployEvent, DeploymentPlan, DeploymentResult, RunState};

/// Orchestrates a deployment of one local tree to one remote target.
pub struct DeployDriver {
    config: DeployConfig,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::UnboundedSender<DeployEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<DeployEvent>>,
    cancel: CancellationToken,
}

impl DeployDriver {
    pub fn new(config: DeployConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeployEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this deployment.
    ///
    /// Cancelling stops new transfers from starting; running ones finish.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scans the local tree without touching the network.
    pub fn plan(&self) -> Result<DeploymentPlan, DeployError> {
        scan_tree(
            &self.config.local_root,
            &self.config.remote_root,
            &self.config.exclude,
        )
    }

    /// Runs the full pipeline.
    ///
    /// Returns `Err` when the source is missing, the session never
    /// connected, the session was lost, or the run was cancelled. Individual
    /// directory and file failures are reported in the result.
    pub async fn run(&self) -> Result<DeploymentResult, DeployError> {
        let started = Instant::now();

        let plan = self.plan()?;
        info!(
            directories = plan.directory_count(),
            files = plan.file_count(),
            total_bytes = plan.total_bytes,
            "scan complete"
        );
        self.emit(DeployEvent::Scanned {
            directories: plan.directory_count(),
            files: plan.file_count(),
            total_bytes: plan.total_bytes,
        });

        self.transition(RunState::Connecting);
        let (session, mut primary) = match self.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(host = %self.config.target.host, error = %e, "connection failed");
                self.transition(RunState::Failed);
                return Err(e);
            }
        };

        let guard = SessionGuard::new(Arc::clone(&session));
        let staged = AssertUnwindSafe(self.run_stages(&session, primary.as_mut(), plan))
            .catch_unwind()
            .await;

        self.transition(RunState::Closing);
        primary.close().await;
        guard.close().await;
        info!(host = %self.config.target.host, "session closed");

        let outcome = match staged {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!("deploy stage panicked after the session was opened");
                self.transition(RunState::Failed);
                panic::resume_unwind(payload);
            }
        };

        let (provisioned, uploaded) = match outcome {
            Ok(reports) => reports,
            Err(e) => {
                self.transition(RunState::Failed);
                return Err(e);
            }
        };

        if let Some(cause) = uploaded.session_lost.clone() {
            self.transition(RunState::Failed);
            return Err(DeployError::SessionLost(cause));
        }
        if self.cancel.is_cancelled() {
            self.transition(RunState::Failed);
            return Err(DeployError::Cancelled);
        }

        let result = self.build_result(provisioned, uploaded, started);
        self.transition(result.state);
        info!(
            state = %result.state,
            files_succeeded = result.files_succeeded,
            files_failed = result.files_failed,
            directories_failed = result.directories_failed(),
            "deploy finished"
        );
        Ok(result)
    }

    /// Establishes the session and its primary channel.
    ///
    /// The session is closed again if the primary channel cannot be opened.
    async fn connect(&self) -> Result<(Arc<dyn RemoteSession>, Box<dyn Channel>), DeployError> {
        let target = &self.config.target;
        info!(host = %target.host, port = target.port, user = %target.username, "connecting");

        let session = self
            .connector
            .connect(target)
            .await
            .map_err(DeployError::Connection)?;

        match session.open_channel().await {
            Ok(primary) => {
                info!(host = %target.host, "connected");
                Ok((session, primary))
            }
            Err(e) => {
                session.close().await;
                Err(DeployError::Connection(e))
            }
        }
    }

    async fn run_stages(
        &self,
        session: &Arc<dyn RemoteSession>,
        primary: &mut dyn Channel,
        plan: DeploymentPlan,
    ) -> Result<(ProvisionReport, UploadReport), DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        self.transition(RunState::Provisioning);
        let provisioned = provision(primary, &plan.directories, &self.events_tx).await?;
        if !provisioned.failures.is_empty() {
            warn!(
                failed = provisioned.failures.len(),
                "some remote directories could not be created"
            );
        }

        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        self.transition(RunState::Uploading);
        let scheduler = UploadScheduler::new(self.config.max_workers);
        let uploaded = scheduler
            .run(
                session,
                primary,
                plan.tasks,
                self.config.parallel,
                &self.cancel,
                &self.events_tx,
            )
            .await;

        Ok((provisioned, uploaded))
    }

    fn build_result(
        &self,
        provisioned: ProvisionReport,
        uploaded: UploadReport,
        started: Instant,
    ) -> DeploymentResult {
        let files_succeeded = uploaded.succeeded();
        let files_failed = uploaded.failed();

        // Every file failing is a failed run, not a partial one.
        let state = if files_failed > 0 && files_succeeded == 0 {
            RunState::Failed
        } else {
            RunState::Completed
        };

        let mut failures = provisioned.failures;
        failures.extend(uploaded.failures());

        DeploymentResult {
            state,
            mode: uploaded.mode,
            directories_created: provisioned.created,
            directories_existing: provisioned.existing,
            files_succeeded,
            files_failed,
            bytes_uploaded: uploaded.bytes_uploaded(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            failures,
        }
    }

    fn transition(&self, state: RunState) {
        info!(%state, "deploy state");
        self.emit(DeployEvent::StateChanged(state));
    }

    fn emit(&self, event: DeployEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Owns the session for the duration of a run.
///
/// [`close`](Self::close) releases it in line. If the run future is dropped
/// before that, `Drop` closes the session on a background task.
struct SessionGuard {
    session: Option<Arc<dyn RemoteSession>>,
}

impl SessionGuard {
    fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("deploy dropped mid-run, closing session in the background");
                handle.spawn(async move {
                    session.close().await;
                });
            }
            Err(_) => warn!("deploy dropped outside a runtime, session left to the transport"),
        }
    }
}
