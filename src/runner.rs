//! Process runner abstraction
//!
//! The cache store hands a command and an open payload file to a
//! [`ProcessRunner`] and gets back the command's exit status. The system
//! implementation spawns the program through `tokio::process`; tests swap
//! in a fake to count executions.

use crate::cache::key::join_command;
use crate::error::{RuncachedError, RuncachedResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Where the wrapped command's stderr goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Interleaved into the cached payload with stdout
    #[default]
    Combined,
    /// Passed straight through to our own stderr, never cached
    Inherit,
}

/// Runs a command to completion with its output sent to given sinks
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command`, writing stdout (and stderr, if combined) into `payload`
    ///
    /// Returns the exit status; a command killed by signal N reports `-N`.
    async fn run(&self, command: &[String], payload: File, stderr: StderrMode)
        -> RuncachedResult<i32>;
}

/// Runs commands as real child processes
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        command: &[String],
        payload: File,
        stderr: StderrMode,
    ) -> RuncachedResult<i32> {
        let (program, args) = command.split_first().ok_or(RuncachedError::EmptyCommand)?;
        debug!("Executing: {:?}", command);

        let stderr = match stderr {
            StderrMode::Combined => Stdio::from(
                payload
                    .try_clone()
                    .map_err(|e| RuncachedError::io("duplicating payload handle", e))?,
            ),
            StderrMode::Inherit => Stdio::inherit(),
        };

        // Dropping the wait future (on interrupt) kills the child
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::from(payload))
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuncachedError::command_failed(join_command(command), e))?;

        let status = child
            .wait()
            .await
            .map_err(|e| RuncachedError::command_failed(join_command(command), e))?;

        Ok(exit_status_code(status))
    }
}

/// Signed exit status: the exit code, or `-signo` when killed by a signal
pub fn exit_status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

/// Exit code for this process that mirrors a stored status
///
/// Signal deaths (`-N`) become `128 + N`, the shell convention.
pub fn process_exit_code(status: i32) -> u8 {
    if status < 0 {
        return u8::try_from(128 + i64::from(status).unsigned_abs()).unwrap_or(u8::MAX);
    }
    (status & 0xff) as u8
}
