//! Mapping from libssh2 errors onto the engine's error taxonomy.

use std::io::ErrorKind;

use ssh2::ErrorCode;
use treepush_engine::RemoteError;

// libssh2 session error codes (LIBSSH2_ERROR_*).
const SOCKET_SEND: i32 = -7;
const TIMEOUT: i32 = -9;
const SOCKET_DISCONNECT: i32 = -13;
const AUTHENTICATION_FAILED: i32 = -18;
const PUBLICKEY_UNVERIFIED: i32 = -19;
const CHANNEL_FAILURE: i32 = -21;
const CHANNEL_REQUEST_DENIED: i32 = -22;
const SOCKET_TIMEOUT: i32 = -30;
const SOCKET_RECV: i32 = -43;

// SFTP status codes (LIBSSH2_FX_*).
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_WRITE_PROTECT: i32 = 12;
const FX_NO_SPACE_ON_FILESYSTEM: i32 = 14;
const FX_QUOTA_EXCEEDED: i32 = 15;

/// Classifies an ssh2 error raised while operating on `path`.
pub fn map_ssh_error(e: ssh2::Error, path: &str) -> RemoteError {
    match e.code() {
        ErrorCode::Session(SOCKET_SEND | SOCKET_RECV | SOCKET_DISCONNECT) => {
            RemoteError::SessionLost(e.message().to_string())
        }
        // A slow transfer fails on its own; the session may still be usable.
        ErrorCode::Session(TIMEOUT | SOCKET_TIMEOUT) => {
            RemoteError::Protocol(format!("{path}: timed out: {}", e.message()))
        }
        // Typically the server's per-connection session limit (MaxSessions).
        ErrorCode::Session(CHANNEL_FAILURE | CHANNEL_REQUEST_DENIED) => {
            RemoteError::Unsupported(e.message().to_string())
        }
        ErrorCode::Session(AUTHENTICATION_FAILED | PUBLICKEY_UNVERIFIED) => {
            RemoteError::Auth(e.message().to_string())
        }
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH) => RemoteError::NotFound(path.to_string()),
        ErrorCode::SFTP(FX_PERMISSION_DENIED | FX_WRITE_PROTECT) => {
            RemoteError::PermissionDenied(path.to_string())
        }
        ErrorCode::SFTP(FX_NO_SPACE_ON_FILESYSTEM | FX_QUOTA_EXCEEDED) => {
            RemoteError::Protocol(format!("{path}: no space left on remote filesystem"))
        }
        _ => RemoteError::Protocol(format!("{path}: {}", e.message())),
    }
}

/// Classifies an I/O error from streaming file content over a channel.
pub(crate) fn map_stream_error(e: std::io::Error) -> RemoteError {
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => RemoteError::SessionLost(e.to_string()),
        _ => RemoteError::Io(e),
    }
}
