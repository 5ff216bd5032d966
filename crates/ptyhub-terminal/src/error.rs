//! PTY errors with enough structure for the supervisor to classify them.

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnErrorKind {
    NotFound,
    PermissionDenied,
    Other,
}

impl SpawnErrorKind {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SpawnErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => SpawnErrorKind::PermissionDenied,
            _ => SpawnErrorKind::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY: {reason}")]
    Open { reason: String },
    #[error("Failed to spawn process: {reason}")]
    Spawn {
        reason: String,
        kind: SpawnErrorKind,
    },
    #[error("Failed to write to PTY: {reason}")]
    Write { reason: String },
    #[error("Failed to read from PTY: {reason}")]
    Read {
        reason: String,
        raw_os_error: Option<i32>,
    },
    #[error("Failed to resize PTY: {reason}")]
    Resize { reason: String },
    #[error("Failed to wait for process: {reason}")]
    Wait { reason: String },
}

impl PtyError {
    pub fn read(err: &io::Error) -> Self {
        PtyError::Read {
            reason: err.to_string(),
            raw_os_error: err.raw_os_error(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            PtyError::Open { .. } => "open",
            PtyError::Spawn { .. } => "spawn",
            PtyError::Write { .. } => "write",
            PtyError::Read { .. } => "read",
            PtyError::Resize { .. } => "resize",
            PtyError::Wait { .. } => "wait",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            PtyError::Open { reason }
            | PtyError::Spawn { reason, .. }
            | PtyError::Write { reason }
            | PtyError::Read { reason, .. }
            | PtyError::Resize { reason }
            | PtyError::Wait { reason } => reason,
        }
    }

    /// Raw OS error code, when the failure came straight from a syscall.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            PtyError::Read { raw_os_error, .. } => *raw_os_error,
            _ => None,
        }
    }

    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            PtyError::Open { .. } => {
                "PTY allocation failed. Check system resource limits (ulimit -n).".to_string()
            }
            PtyError::Spawn { kind, .. } => match kind {
                SpawnErrorKind::NotFound => {
                    "Shell not found. Check the configured shell path or $SHELL.".to_string()
                }
                SpawnErrorKind::PermissionDenied => {
                    "Permission denied. Check that the shell is executable.".to_string()
                }
                SpawnErrorKind::Other => {
                    "Process spawn failed. Check the shell, arguments and working directory."
                        .to_string()
                }
            },
            PtyError::Write { .. } | PtyError::Read { .. } | PtyError::Wait { .. } => {
                "The terminal process may have ended. Open a new terminal.".to_string()
            }
            PtyError::Resize { .. } => "Failed to resize terminal. Try again.".to_string(),
        }
    }
}
