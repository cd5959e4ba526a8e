//! Sequential remote directory provisioning.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::session::{Channel, DirectoryStatus};
use crate::types::{DeployEvent, Failure, FailureKind};

/// Outcome of ensuring a directory sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub created: usize,
    pub existing: usize,
    pub failures: Vec<Failure>,
}

/// Ensures every directory in `directories` exists, strictly in order.
///
/// "Already exists" counts as success. Other errors are recorded and the
/// remaining directories are still attempted; a missing directory shows up
/// later as upload failures for its files. Only a lost session aborts.
pub async fn provision(
    channel: &mut dyn Channel,
    directories: &[String],
    events_tx: &UnboundedSender<DeployEvent>,
) -> Result<ProvisionReport, DeployError> {
    let mut report = ProvisionReport::default();

    for path in directories {
        match channel.create_directory(path).await {
            Ok(DirectoryStatus::Created) => {
                debug!(path = %path, "created remote directory");
                report.created += 1;
                let _ = events_tx.send(DeployEvent::DirectoryCreated { path: path.clone() });
            }
            Ok(DirectoryStatus::AlreadyExists) => {
                report.existing += 1;
                let _ = events_tx.send(DeployEvent::DirectoryExists { path: path.clone() });
            }
            Err(e) if e.is_session_fatal() => {
                return Err(DeployError::SessionLost(e.to_string()));
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to create remote directory");
                let _ = events_tx.send(DeployEvent::DirectoryFailed {
                    path: path.clone(),
                    error: e.to_string(),
                });
                report.failures.push(Failure {
                    kind: FailureKind::DirectoryProvision,
                    source: None,
                    destination: path.clone(),
                    cause: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}
