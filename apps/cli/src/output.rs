//! Human-readable progress lines and the final summary.

use std::process::ExitCode;

use tokio::sync::mpsc::UnboundedReceiver;
use treepush_engine::{DeployEvent, DeploymentPlan, DeploymentResult, RunState, UploadMode};

/// Prints one line per event until the driver drops its sender.
pub async fn print_events(mut events: UnboundedReceiver<DeployEvent>, quiet: bool) {
    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        if let Some(line) = render_event(&event) {
            match event {
                DeployEvent::DirectoryFailed { .. } | DeployEvent::FileFailed { .. } => {
                    eprintln!("{line}")
                }
                _ => println!("{line}"),
            }
        }
    }
}

fn render_event(event: &DeployEvent) -> Option<String> {
    let line = match event {
        DeployEvent::Scanned {
            directories,
            files,
            total_bytes,
        } => format!(
            "Found {directories} directories and {files} files ({}).",
            human_bytes(*total_bytes)
        ),
        DeployEvent::StateChanged(RunState::Connecting) => "Connecting to server...".into(),
        DeployEvent::StateChanged(RunState::Provisioning) => {
            "Connection successful! Creating directories...".into()
        }
        DeployEvent::StateChanged(RunState::Uploading) => "Uploading files...".into(),
        DeployEvent::StateChanged(RunState::Closing) => "Closing connection...".into(),
        DeployEvent::StateChanged(_) => return None,
        DeployEvent::DirectoryCreated { path } => format!("Created directory: {path}"),
        DeployEvent::DirectoryExists { .. } => return None,
        DeployEvent::DirectoryFailed { path, error } => {
            format!("FAILED to create directory {path}: {error}")
        }
        DeployEvent::FileUploaded { local, remote, .. } => {
            format!("Uploaded file: {} -> {remote}", local.display())
        }
        DeployEvent::FileFailed {
            local,
            remote,
            error,
        } => format!("FAILED to upload {} -> {remote}: {error}", local.display()),
        DeployEvent::FallbackToSequential { reason } => {
            format!("Parallel upload unavailable ({reason}); falling back to serial upload.")
        }
    };
    Some(line)
}

/// Lists what a deploy would do without connecting.
pub fn print_plan(plan: &DeploymentPlan) {
    println!(
        "Found {} directories and {} files ({}).",
        plan.directory_count(),
        plan.file_count(),
        human_bytes(plan.total_bytes)
    );
    for dir in &plan.directories {
        println!("mkdir {dir}");
    }
    for task in &plan.tasks {
        println!("put   {} -> {}", task.local.display(), task.remote);
    }
}

pub fn print_summary(result: &DeploymentResult) {
    let mode = match result.mode {
        UploadMode::Parallel { workers } => format!("parallel, {workers} workers"),
        UploadMode::Sequential => "sequential".into(),
    };
    println!();
    println!(
        "Deployment {}: {} files uploaded, {} failed ({}, {} in {:.1}s)",
        result.state,
        result.files_succeeded,
        result.files_failed,
        mode,
        human_bytes(result.bytes_uploaded),
        result.elapsed_ms as f64 / 1000.0
    );
    println!(
        "Directories: {} created, {} already present, {} failed",
        result.directories_created,
        result.directories_existing,
        result.directories_failed()
    );

    if !result.failures.is_empty() {
        eprintln!("Failures:");
        for failure in &result.failures {
            eprintln!("  {failure}");
        }
    }
}

/// 0 when clean, 1 when the run completed with failures, 2 when it failed.
pub fn exit_code(result: &DeploymentResult) -> ExitCode {
    ExitCode::from(exit_status(result))
}

fn exit_status(result: &DeploymentResult) -> u8 {
    if result.is_clean() {
        0
    } else if result.state == RunState::Completed {
        1
    } else {
        2
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{value:.1} {unit}")
}
