//! Error types for runcached
//!
//! All modules use `RuncachedResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the execution lock cannot be acquired
pub const EXIT_LOCK_TIMEOUT: i32 = 2;

/// Exit code used when stdout was closed before the payload was delivered
pub const EXIT_BROKEN_OUTPUT: i32 = 1;

/// Exit code for a wrapped program that could not be found
pub const EXIT_NOT_FOUND: i32 = 127;

/// Result type alias for runcached operations
pub type RuncachedResult<T> = Result<T, RuncachedError>;

/// All errors that can occur in runcached
#[derive(Error, Debug)]
pub enum RuncachedError {
    // Lock errors
    #[error("Process for this command still running: timeout after {waited_secs}s (lock {key})")]
    LockTimeout { key: String, waited_secs: u64 },

    #[error("Lock record {path} is unreadable, removed it")]
    CorruptLock { path: PathBuf },

    #[error("Creating lock record {path} failed: expected pid {expected}, found {found}")]
    LockLost {
        path: PathBuf,
        expected: u32,
        found: String,
    },

    // Process errors
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No command given")]
    EmptyCommand,

    // Output errors
    #[error("Output consumer closed before all output was delivered")]
    BrokenOutput,

    #[error("Interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RuncachedError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error, distinguishing a missing program
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        let command = command.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::CommandNotFound(command);
        }
        Self::CommandFailed { command, source }
    }

    /// Process exit code to report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::LockTimeout { .. } | Self::CorruptLock { .. } | Self::LockLost { .. } => {
                EXIT_LOCK_TIMEOUT
            }
            Self::CommandNotFound(_) => EXIT_NOT_FOUND,
            Self::BrokenOutput => EXIT_BROKEN_OUTPUT,
            Self::Interrupted { signal } => 128 + signal,
            _ => 1,
        }
    }

    /// Whether the error is worth printing to stderr
    ///
    /// A broken consumer already lost its output, and an interrupt was
    /// requested by the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::BrokenOutput | Self::Interrupted { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Raise --max-wait, or remove the .pid file if no such process exists")
            }
            Self::CorruptLock { .. } => Some("Run the command again"),
            Self::CommandNotFound(_) => Some("Check the program name and PATH"),
            _ => None,
        }
    }
}
