//! Directory tree deploy engine: scan, provision, parallel upload.
//!
//! This crate implements the **deployment logic** for pushing a local
//! directory tree to a remote file store. It has no UI or SSH
//! dependencies: transports implement [`Connector`], [`RemoteSession`]
//! and [`Channel`] (see `treepush-sftp`, or [`local::LocalConnector`] for a
//! mounted filesystem).
//!
//! # Pipeline
//!
//! 1. **Scan**: walk the local tree into an ordered [`DeploymentPlan`]
//! 2. **Connect**: open one session and its primary channel
//! 3. **Provision**: create remote directories in order
//! 4. **Upload**: transfer files over a bounded worker pool, or
//!    sequentially when the session cannot multiplex channels
//! 5. **Close**: always release the session

pub mod driver;
pub mod error;
pub mod local;
pub mod provision;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use driver::DeployDriver;
pub use error::{DeployError, RemoteError};
pub use local::LocalConnector;
pub use provision::{ProvisionReport, provision};
pub use scanner::scan_tree;
pub use scheduler::{UploadReport, UploadScheduler};
pub use session::{
    BoxFuture, Channel, Connector, DirectoryStatus, RemoteSession, SessionCapabilities,
};
pub use types::{
    Credentials, DEFAULT_EXCLUDES, DEFAULT_MAX_WORKERS, DEFAULT_PORT, DeployConfig, DeployEvent,
    DeploymentPlan, DeploymentResult, ExcludeSet, Failure, FailureKind, RemoteTarget, RunState,
    TaskOutcome, TransferTask, UploadMode,
};
