//! Local tree scanning.
//!
//! Walks a directory depth-first and produces a [`DeploymentPlan`]: the
//! remote directories to ensure (parents first) and one transfer task per
//! file, with remote paths joined by `/` regardless of the local platform.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::DeployError;
use crate::types::{DeploymentPlan, ExcludeSet, TransferTask};

/// Scans `local_root` and maps it onto `remote_root`.
///
/// Fails with [`DeployError::SourceNotFound`] before reading anything if the
/// root is missing or not a directory.
pub fn scan_tree(
    local_root: &Path,
    remote_root: &str,
    exclude: &ExcludeSet,
) -> Result<DeploymentPlan, DeployError> {
    if !local_root.is_dir() {
        return Err(DeployError::SourceNotFound(local_root.to_path_buf()));
    }

    let remote_root = normalize_remote_root(remote_root);
    let mut plan = DeploymentPlan {
        directories: vec![remote_root.clone()],
        tasks: Vec::new(),
        total_bytes: 0,
    };

    walk_dir(local_root, &remote_root, exclude, &mut plan)?;

    debug!(
        root = %local_root.display(),
        directories = plan.directories.len(),
        files = plan.tasks.len(),
        total_bytes = plan.total_bytes,
        "scan complete"
    );

    Ok(plan)
}

/// Strips trailing separators; an empty root means the remote working directory.
fn normalize_remote_root(remote_root: &str) -> String {
    let unified = remote_root.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        if unified.starts_with('/') {
            "/".into()
        } else {
            ".".into()
        }
    } else {
        trimmed.to_string()
    }
}

fn join_remote(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn walk_dir(
    current: &Path,
    current_remote: &str,
    exclude: &ExcludeSet,
    plan: &mut DeploymentPlan,
) -> Result<(), DeployError> {
    let mut entries = fs::read_dir(current)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut subdirs = Vec::new();

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if exclude.contains(&name) {
                debug!(path = %path.display(), "skipping excluded directory");
                continue;
            }
            subdirs.push((path, name));
        } else if file_type.is_file() {
            plan.total_bytes += entry.metadata()?.len();
            plan.tasks
                .push(TransferTask::new(path, join_remote(current_remote, &name)));
        } else if file_type.is_symlink() {
            // Follow links to files, never links to directories.
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    plan.total_bytes += meta.len();
                    plan.tasks
                        .push(TransferTask::new(path, join_remote(current_remote, &name)));
                }
                Ok(meta) if meta.is_dir() => {
                    warn!(path = %path.display(), "not following directory symlink");
                }
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "skipping dangling or special symlink");
                }
            }
        } else {
            debug!(path = %path.display(), "skipping special file");
        }
    }

    for (path, name) in subdirs {
        let remote = join_remote(current_remote, &name);
        plan.directories.push(remote.clone());
        walk_dir(&path, &remote, exclude, plan)?;
    }

    Ok(())
}
