//! Data types for the deploy flow.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Default bound on concurrent upload workers.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default remote SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Directory names pruned from every scan by default.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", ".svn", ".hg"];

/// Secret material used to authenticate a session.
///
/// The engine never inspects credentials; they are handed to the
/// [`Connector`](crate::session::Connector) as-is.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// Where to connect and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
}

/// Set of directory names whose subtrees are never scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeSet {
    names: BTreeSet<String>,
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDES.iter().copied())
    }
}

impl ExcludeSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Config passed to the deploy driver at construction.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Local directory whose contents are pushed.
    pub local_root: PathBuf,
    /// Remote directory that receives the contents of `local_root`.
    pub remote_root: String,
    pub target: RemoteTarget,
    /// Upper bound on channels open at once, the primary channel included.
    pub max_workers: usize,
    pub exclude: ExcludeSet,
    /// When false, uploads always run sequentially on the primary channel.
    pub parallel: bool,
}

/// Outcome of a single file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskOutcome {
    #[default]
    Pending,
    Succeeded {
        bytes: u64,
    },
    Failed {
        cause: String,
    },
}

/// One local file to upload to one remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub local: PathBuf,
    pub remote: String,
    pub outcome: TaskOutcome,
}

impl TransferTask {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            outcome: TaskOutcome::Pending,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::Pending)
    }

    pub(crate) fn succeed(&mut self, bytes: u64) {
        self.outcome = TaskOutcome::Succeeded { bytes };
    }

    pub(crate) fn fail(&mut self, cause: impl Into<String>) {
        self.outcome = TaskOutcome::Failed {
            cause: cause.into(),
        };
    }
}

/// Ordered directory sequence plus file transfers derived from a local tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    /// Remote directories, root first, each parent before its children.
    pub directories: Vec<String>,
    pub tasks: Vec<TransferTask>,
    /// Sum of local file sizes at scan time.
    pub total_bytes: u64,
}

impl DeploymentPlan {
    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    pub fn file_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Driver state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Connecting,
    Provisioning,
    Uploading,
    Closing,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Provisioning => "provisioning",
            Self::Uploading => "uploading",
            Self::Closing => "closing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the upload stage distributed its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum UploadMode {
    Parallel { workers: usize },
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DirectoryProvision,
    Transfer,
}

/// A recorded, non-fatal failure with enough context to retry by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Local source path; `None` for directory failures.
    pub source: Option<PathBuf>,
    pub destination: String,
    pub cause: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.source) {
            (FailureKind::Transfer, Some(src)) => write!(
                f,
                "upload {} -> {}: {}",
                src.display(),
                self.destination,
                self.cause
            ),
            _ => write!(f, "mkdir {}: {}", self.destination, self.cause),
        }
    }
}

/// Aggregate outcome of one deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentResult {
    pub state: RunState,
    pub mode: UploadMode,
    pub directories_created: usize,
    pub directories_existing: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub bytes_uploaded: u64,
    pub elapsed_ms: u64,
    pub failures: Vec<Failure>,
}

impl DeploymentResult {
    /// True when nothing but "already exists" went wrong.
    pub fn is_clean(&self) -> bool {
        self.state == RunState::Completed && self.failures.is_empty()
    }

    pub fn directories_failed(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::DirectoryProvision)
            .count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Progress event emitted during deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    StateChanged(RunState),
    Scanned {
        directories: usize,
        files: usize,
        total_bytes: u64,
    },
    DirectoryCreated {
        path: String,
    },
    DirectoryExists {
        path: String,
    },
    DirectoryFailed {
        path: String,
        error: String,
    },
    FileUploaded {
        local: PathBuf,
        remote: String,
        bytes: u64,
    },
    FileFailed {
        local: PathBuf,
        remote: String,
        error: String,
    },
    /// Concurrent channels are unavailable; uploads run one at a time.
    FallbackToSequential {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_secrets() {
        let pw = Credentials::Password("hunter2".into());
        assert!(!format!("{pw:?}").contains("hunter2"));

        let key = Credentials::KeyFile {
            path: PathBuf::from("/home/me/.ssh/id_ed25519"),
            passphrase: Some("s3cret".into()),
        };
        let dbg = format!("{key:?}");
        assert!(dbg.contains("id_ed25519"));
        assert!(!dbg.contains("s3cret"));
    }

    #[test]
    fn default_excludes_cover_vcs_dirs() {
        let ex = ExcludeSet::default();
        assert!(ex.contains(".git"));
        assert!(ex.contains(".svn"));
        assert!(ex.contains(".hg"));
        assert!(!ex.contains("assets"));
    }

    #[test]
    fn result_is_clean_only_without_failures() {
        let mut result = DeploymentResult {
            state: RunState::Completed,
            mode: UploadMode::Parallel { workers: 4 },
            directories_created: 2,
            directories_existing: 1,
            files_succeeded: 3,
            files_failed: 0,
            bytes_uploaded: 42,
            elapsed_ms: 10,
            failures: Vec::new(),
        };
        assert!(result.is_clean());

        result.failures.push(Failure {
            kind: FailureKind::DirectoryProvision,
            source: None,
            destination: "site/img".into(),
            cause: "permission denied".into(),
        });
        assert!(!result.is_clean());
        assert_eq!(result.directories_failed(), 1);
    }

    #[test]
    fn result_json_shape() {
        let result = DeploymentResult {
            state: RunState::Completed,
            mode: UploadMode::Sequential,
            directories_created: 1,
            directories_existing: 0,
            files_succeeded: 1,
            files_failed: 0,
            bytes_uploaded: 5,
            elapsed_ms: 1,
            failures: Vec::new(),
        };
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["mode"]["mode"], "sequential");
        assert_eq!(json["files_succeeded"], 1);
    }

    #[test]
    fn failure_display_includes_both_paths() {
        let f = Failure {
            kind: FailureKind::Transfer,
            source: Some(PathBuf::from("dist/index.html")),
            destination: "site/index.html".into(),
            cause: "permission denied".into(),
        };
        let s = f.to_string();
        assert!(s.contains("dist/index.html"));
        assert!(s.contains("site/index.html"));
        assert!(s.contains("permission denied"));
    }
}
