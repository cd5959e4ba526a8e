//! Session establishment: TCP connect, SSH handshake, authentication.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;
use tracing::{debug, info};
use treepush_engine::{BoxFuture, Connector, Credentials, RemoteError, RemoteSession, RemoteTarget};

use crate::error::map_ssh_error;
use crate::session::SftpSession;

/// Connection tuning for SFTP sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SftpOptions {
    pub connect_timeout: Duration,
    /// Timeout for each blocking libssh2 call; zero disables it.
    pub io_timeout: Duration,
    /// Advertised to the scheduler; disable for servers that cap sessions
    /// at a single SFTP channel.
    pub concurrent_channels: bool,
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            concurrent_channels: true,
        }
    }
}

/// Opens SSH sessions for the deploy driver.
#[derive(Debug, Clone, Default)]
pub struct SftpConnector {
    options: SftpOptions,
}

impl SftpConnector {
    pub fn new(options: SftpOptions) -> Self {
        Self { options }
    }
}

impl Connector for SftpConnector {
    fn connect<'a>(
        &'a self,
        target: &'a RemoteTarget,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>, RemoteError>> {
        Box::pin(async move {
            let options = self.options;
            let owned = target.clone();
            let session = tokio::task::spawn_blocking(move || establish(&owned, options))
                .await
                .map_err(|e| RemoteError::Protocol(format!("task join error: {e}")))??;

            info!(host = %target.host, port = target.port, "SSH session established");
            Ok(Arc::new(SftpSession::new(session, target.host.clone(), options))
                as Arc<dyn RemoteSession>)
        })
    }
}

fn establish(target: &RemoteTarget, options: SftpOptions) -> Result<Session, RemoteError> {
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RemoteError::NotFound(format!("no address for {}", target.host)))?;

    debug!(%addr, "opening TCP connection");
    let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)?;

    let mut session = Session::new().map_err(|e| map_ssh_error(e, &target.host))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(options.io_timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| map_ssh_error(e, &target.host))?;

    authenticate(&session, target)?;

    if !session.authenticated() {
        return Err(RemoteError::Auth(format!(
            "server did not accept credentials for {}",
            target.username
        )));
    }

    Ok(session)
}

fn authenticate(session: &Session, target: &RemoteTarget) -> Result<(), RemoteError> {
    let user = target.username.as_str();
    let result = match &target.credentials {
        Credentials::Password(password) => session.userauth_password(user, password),
        Credentials::KeyFile { path, passphrase } => {
            session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
        }
        Credentials::Agent => session.userauth_agent(user),
    };
    result.map_err(|e| RemoteError::Auth(format!("{user}@{}: {}", target.host, e.message())))
}
