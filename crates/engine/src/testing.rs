//! In-memory remote store used by unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::RemoteError;
use crate::session::{
    BoxFuture, Channel, Connector, DirectoryStatus, RemoteSession, SessionCapabilities,
};
use crate::types::{Credentials, RemoteTarget};

/// Shared state behind a mock session and all of its channels.
#[derive(Default)]
pub struct MockState {
    pub dirs: Mutex<BTreeSet<String>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    /// Remote paths in the order `put` completed.
    pub put_log: Mutex<Vec<String>>,
    pub fail_puts: HashSet<String>,
    pub fail_dirs: HashSet<String>,
    /// A `put` to this path reports the session as lost.
    pub lose_session_on: Option<String>,
    pub concurrent: bool,
    /// Channels allowed open at once; further opens are refused.
    pub max_open: Option<usize>,
    pub put_delay: Option<Duration>,
    pub panic_on_dir: Option<String>,
    pub panic_on_put: Option<String>,
    pub channels_opened: AtomicUsize,
    pub channels_closed: AtomicUsize,
    pub open_now: AtomicUsize,
    pub peak_open: AtomicUsize,
    pub session_closed: AtomicBool,
}

impl MockState {
    pub fn concurrent() -> Self {
        Self {
            concurrent: true,
            ..Self::default()
        }
    }

    pub fn seed_dir(&self, path: &str) {
        self.dirs.lock().unwrap().insert(path.to_string());
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put_order(&self) -> Vec<String> {
        self.put_log.lock().unwrap().clone()
    }
}

pub struct MockSession {
    pub state: Arc<MockState>,
}

impl RemoteSession for MockSession {
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn Channel>, RemoteError>> {
        Box::pin(async move {
            let state = Arc::clone(&self.state);
            let max_open = state.max_open;
            let admitted = state
                .open_now
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match max_open {
                    Some(max) if n >= max => None,
                    _ => Some(n + 1),
                });
            let now = match admitted {
                Ok(prev) => prev + 1,
                Err(_) => {
                    return Err(RemoteError::Unsupported(
                        "channel open failure: administratively prohibited".into(),
                    ));
                }
            };
            state.channels_opened.fetch_add(1, Ordering::SeqCst);
            state.peak_open.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(MockChannel { state }) as Box<dyn Channel>)
        })
    }

    fn capabilities(&self) -> SessionCapabilities {
        SessionCapabilities {
            concurrent_channels: self.state.concurrent,
        }
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.session_closed.store(true, Ordering::SeqCst);
        })
    }
}

pub struct MockChannel {
    state: Arc<MockState>,
}

impl Channel for MockChannel {
    fn create_directory<'a>(
        &'a mut self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<DirectoryStatus, RemoteError>> {
        Box::pin(async move {
            if self.state.panic_on_dir.as_deref() == Some(path) {
                panic!("mock channel broke on {path}");
            }
            if self.state.fail_dirs.contains(path) {
                return Err(RemoteError::PermissionDenied(path.to_string()));
            }
            let mut dirs = self.state.dirs.lock().unwrap();
            if dirs.insert(path.to_string()) {
                Ok(DirectoryStatus::Created)
            } else {
                Ok(DirectoryStatus::AlreadyExists)
            }
        })
    }

    fn put<'a>(
        &'a mut self,
        local: &'a Path,
        remote: &'a str,
    ) -> BoxFuture<'a, Result<u64, RemoteError>> {
        Box::pin(async move {
            if let Some(delay) = self.state.put_delay {
                tokio::time::sleep(delay).await;
            }
            if self.state.panic_on_put.as_deref() == Some(remote) {
                panic!("mock channel broke on {remote}");
            }
            if self.state.lose_session_on.as_deref() == Some(remote) {
                return Err(RemoteError::SessionLost("connection reset".into()));
            }
            if self.state.fail_puts.contains(remote) {
                return Err(RemoteError::PermissionDenied(remote.to_string()));
            }
            let parent = remote.rsplit_once('/').map(|(p, _)| p).unwrap_or(".");
            if parent != "." && !self.state.has_dir(parent) {
                return Err(RemoteError::NotFound(parent.to_string()));
            }
            let data = tokio::fs::read(local).await?;
            let len = data.len() as u64;
            self.state
                .files
                .lock()
                .unwrap()
                .insert(remote.to_string(), data);
            self.state.put_log.lock().unwrap().push(remote.to_string());
            Ok(len)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.state.channels_closed.fetch_add(1, Ordering::SeqCst);
            self.state.open_now.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

pub struct MockConnector {
    pub state: Arc<MockState>,
    pub refuse: bool,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            refuse: false,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn refusing(state: Arc<MockState>) -> Self {
        Self {
            refuse: true,
            ..Self::new(state)
        }
    }
}

impl Connector for MockConnector {
    fn connect<'a>(
        &'a self,
        _target: &'a RemoteTarget,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>, RemoteError>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(RemoteError::Auth("bad password".into()));
            }
            Ok(Arc::new(MockSession {
                state: Arc::clone(&self.state),
            }) as Arc<dyn RemoteSession>)
        })
    }
}

pub fn test_target() -> RemoteTarget {
    RemoteTarget {
        host: "example.invalid".into(),
        port: 22,
        username: "deploy".into(),
        credentials: Credentials::Password("pw".into()),
    }
}
