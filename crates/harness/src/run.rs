//! External process execution.
//!
//! Cluster provisioning still goes through CLI tools (minikube), so this
//! module wraps process spawning with live output streaming: stdout and
//! stderr of the child are copied to the harness's own streams while the
//! command runs, letting the operator watch long-running steps in real time.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{self, AsyncWriteExt};
use tokio::process::Command;
use tracing::info;

/// Render a program and its arguments as a single command line for logging
/// and error messages.
fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Run an external command, streaming its output to our stdout/stderr.
///
/// Both streams are drained concurrently and joined before this returns, so
/// no child output is lost even when the process exits between reads.
///
/// # Errors
///
/// Returns an error carrying the full command line if the process cannot be
/// spawned, its output pipes cannot be obtained, or it exits non-zero.
pub async fn command(program: &str, args: &[&str]) -> Result<()> {
    let full = command_line(program, args);
    info!(command = %full, "Running command");

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {full:?}"))?;

    let mut child_stdout = child
        .stdout
        .take()
        .with_context(|| format!("failed to get stdout pipe for {full:?}"))?;
    let mut child_stderr = child
        .stderr
        .take()
        .with_context(|| format!("failed to get stderr pipe for {full:?}"))?;

    let out_task = tokio::spawn(async move {
        let mut stdout = io::stdout();
        let _ = io::copy(&mut child_stdout, &mut stdout).await;
        let _ = stdout.flush().await;
    });
    let err_task = tokio::spawn(async move {
        let mut stderr = io::stderr();
        let _ = io::copy(&mut child_stderr, &mut stderr).await;
        let _ = stderr.flush().await;
    });

    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to wait for {full:?}"))?;

    // Drain both streams fully before reporting.
    let _ = futures::future::join(out_task, err_task).await;

    if !status.success() {
        anyhow::bail!("command {full:?} failed with {status}");
    }
    Ok(())
}

/// Run an external command and capture its stdout, trimmed.
///
/// Used for helpers whose output the harness parses (e.g. resolving a
/// service URL). stderr is captured and included in the error on failure.
///
/// # Errors
///
/// Returns an error carrying the full command line if the process cannot be
/// spawned or exits non-zero.
pub async fn command_output(program: &str, args: &[&str]) -> Result<String> {
    let full = command_line(program, args);
    info!(command = %full, "Running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to spawn {full:?}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "command {full:?} failed with {}: {}",
            output.status,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check whether a command exits successfully, swallowing all output.
///
/// # Errors
///
/// Returns an error only if the process cannot be spawned at all.
pub async fn command_succeeds(program: &str, args: &[&str]) -> Result<bool> {
    let full = command_line(program, args);

    let status = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("failed to spawn {full:?}"))?;

    Ok(status.success())
}
