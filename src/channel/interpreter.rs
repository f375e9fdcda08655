// src/channel/interpreter.rs
//! Spawning and killing interpreter processes that host the shim.

use crate::errors::{Result, RunnerError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Python side of the JSON-lines protocol.
pub const SHIM_SOURCE: &str = include_str!("shim.py");

pub struct SpawnedInterpreter {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Starts `python_bin` running the shim. The child dies with its handle.
pub fn spawn_interpreter(python_bin: &str) -> Result<SpawnedInterpreter> {
    let mut cmd = Command::new(python_bin);
    cmd.arg("-u")
        .arg("-c")
        .arg(SHIM_SOURCE)
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: python_bin.to_string(),
        source,
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| RunnerError::Protocol("interpreter missing stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Protocol("interpreter missing stdout".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(stderr, child.id()));
    }

    log::debug!("spawned interpreter {} (pid {:?})", python_bin, child.id());
    Ok(SpawnedInterpreter { child, stdin, stdout })
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::warn!("interpreter {:?} stderr: {}", pid, line);
    }
}

/// Sends a kill and waits briefly for the process to go away.
pub async fn kill_interpreter(child: &mut Child, reason: &'static str) {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => log::warn!("failed to inspect interpreter {:?} before kill ({}): {}", pid, reason, e),
    }

    if let Err(e) = child.start_kill() {
        log::warn!("failed to kill interpreter {:?} ({}): {}", pid, reason, e);
        return;
    }

    match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
        Ok(Ok(status)) => log::debug!("interpreter {:?} stopped ({}): {}", pid, reason, status),
        Ok(Err(e)) => log::warn!("failed waiting for interpreter {:?} ({}): {}", pid, reason, e),
        Err(_) => log::warn!("interpreter {:?} did not exit within 2s after kill ({})", pid, reason),
    }
}
