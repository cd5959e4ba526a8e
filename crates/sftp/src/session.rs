//! SFTP session and channel.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use ssh2::{Session, Sftp};
use tracing::{debug, warn};
use treepush_engine::{
    BoxFuture, Channel, DirectoryStatus, RemoteError, RemoteSession, SessionCapabilities,
};

use crate::DIRECTORY_MODE;
use crate::connector::SftpOptions;
use crate::error::{map_ssh_error, map_stream_error};

/// An authenticated SSH session shared by all upload workers.
pub struct SftpSession {
    session: Mutex<Session>,
    host: String,
    options: SftpOptions,
}

impl SftpSession {
    pub(crate) fn new(session: Session, host: String, options: SftpOptions) -> Self {
        Self {
            session: Mutex::new(session),
            host,
            options,
        }
    }

    fn handle(&self) -> Result<Session, RemoteError> {
        self.session
            .lock()
            .map(|s| s.clone())
            .map_err(|_| RemoteError::Protocol("session lock poisoned".into()))
    }
}

impl RemoteSession for SftpSession {
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn Channel>, RemoteError>> {
        Box::pin(async move {
            let session = self.handle()?;
            let sftp = tokio::task::spawn_blocking(move || session.sftp())
                .await
                .map_err(|e| RemoteError::Protocol(format!("task join error: {e}")))?
                .map_err(|e| map_ssh_error(e, "sftp subsystem"))?;
            debug!(host = %self.host, "sftp channel opened");
            Ok(Box::new(SftpChannel { sftp: Some(sftp) }) as Box<dyn Channel>)
        })
    }

    fn capabilities(&self) -> SessionCapabilities {
        SessionCapabilities {
            concurrent_channels: self.options.concurrent_channels,
        }
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let session = match self.handle() {
                Ok(s) => s,
                Err(e) => {
                    warn!(host = %self.host, error = %e, "cannot close session");
                    return;
                }
            };
            let result = tokio::task::spawn_blocking(move || {
                session.disconnect(None, "deployment finished", None)
            })
            .await;
            match result {
                Ok(Ok(())) => debug!(host = %self.host, "SSH session disconnected"),
                Ok(Err(e)) => debug!(host = %self.host, error = %e, "disconnect failed"),
                Err(e) => warn!(host = %self.host, error = %e, "disconnect task failed"),
            }
        })
    }
}

/// One SFTP subsystem channel. Not shared between workers.
struct SftpChannel {
    sftp: Option<Sftp>,
}

impl SftpChannel {
    /// Runs a blocking SFTP operation off the async runtime.
    async fn with_sftp<T, F>(&mut self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, RemoteError> + Send + 'static,
    {
        let sftp = self
            .sftp
            .take()
            .ok_or_else(|| RemoteError::Protocol("sftp channel is closed".into()))?;

        let (sftp, result) = tokio::task::spawn_blocking(move || {
            let result = op(&sftp);
            (sftp, result)
        })
        .await
        .map_err(|e| RemoteError::Protocol(format!("task join error: {e}")))?;

        self.sftp = Some(sftp);
        result
    }
}

impl Channel for SftpChannel {
    fn create_directory<'a>(
        &'a mut self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<DirectoryStatus, RemoteError>> {
        let path = path.to_string();
        Box::pin(self.with_sftp(move |sftp| {
            let remote = Path::new(&path);
            match sftp.mkdir(remote, DIRECTORY_MODE) {
                Ok(()) => Ok(DirectoryStatus::Created),
                // Servers report an existing directory with assorted codes,
                // so confirm with a stat before classifying the error.
                Err(e) => match sftp.stat(remote) {
                    Ok(stat) if stat.is_dir() => Ok(DirectoryStatus::AlreadyExists),
                    _ => Err(map_ssh_error(e, &path)),
                },
            }
        }))
    }

    fn put<'a>(
        &'a mut self,
        local: &'a Path,
        remote: &'a str,
    ) -> BoxFuture<'a, Result<u64, RemoteError>> {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        Box::pin(self.with_sftp(move |sftp| {
            let mut source = std::fs::File::open(&local)?;
            let mut dest = sftp
                .create(Path::new(&remote))
                .map_err(|e| map_ssh_error(e, &remote))?;
            let bytes = std::io::copy(&mut source, &mut dest).map_err(map_stream_error)?;
            dest.flush().map_err(map_stream_error)?;
            Ok(bytes)
        }))
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Some(sftp) = self.sftp {
                // Dropping the handle shuts the channel down; do it off the runtime.
                let _ = tokio::task::spawn_blocking(move || drop(sftp)).await;
            }
        })
    }
}
