//! SSH/SFTP transport for the treepush deploy engine.
//!
//! One TCP connection carries one authenticated SSH session; every
//! [`Channel`](treepush_engine::Channel) is a separate SFTP subsystem channel
//! over it. libssh2 is blocking, so each call runs under
//! `tokio::task::spawn_blocking`.

mod connector;
mod error;
mod session;

pub use connector::{SftpConnector, SftpOptions};
pub use error::map_ssh_error;
pub use session::SftpSession;

/// Permissions applied to directories created on the remote host.
pub const DIRECTORY_MODE: i32 = 0o755;
