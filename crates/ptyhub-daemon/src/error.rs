//! Domain errors for session and daemon operations.

use ptyhub_terminal::PtyError;
use ptyhub_terminal::SpawnErrorKind;
use thiserror::Error;

/// Coarse classification for callers that react to errors programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    InvalidInput,
    Busy,
    External,
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Busy => "busy",
            ErrorCategory::External => "external",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session limit reached: maximum {0} sessions allowed")]
    LimitReached(usize),
    #[error("Failed to start terminal: {0}")]
    Spawn(#[source] PtyError),
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),
    #[error("Terminal '{0}' failed to initialize")]
    ReadyTimeout(String),
    #[error("Daemon is shutting down")]
    ShuttingDown,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "session_not_found",
            SessionError::LimitReached(_) => "session_limit",
            SessionError::Spawn(PtyError::Spawn { kind, .. }) => match kind {
                SpawnErrorKind::NotFound => "command_not_found",
                SpawnErrorKind::PermissionDenied => "permission_denied",
                SpawnErrorKind::Other => "spawn_failed",
            },
            SessionError::Spawn(_) => "spawn_failed",
            SessionError::Pty(_) => "pty_error",
            SessionError::ReadyTimeout(_) => "ready_timeout",
            SessionError::ShuttingDown => "shutting_down",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::NotFound(_) => ErrorCategory::NotFound,
            SessionError::LimitReached(_) | SessionError::ShuttingDown => ErrorCategory::Busy,
            SessionError::Spawn(_) | SessionError::Pty(_) => ErrorCategory::External,
            SessionError::ReadyTimeout(_) => ErrorCategory::Timeout,
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            SessionError::NotFound(_) => "The terminal was already closed.".to_string(),
            SessionError::LimitReached(_) => {
                "Close unused terminals or raise PTYHUB_MAX_SESSIONS.".to_string()
            }
            SessionError::Spawn(err) | SessionError::Pty(err) => err.suggestion(),
            SessionError::ReadyTimeout(_) => {
                "The terminal view did not load. Reload the surface and try again.".to_string()
            }
            SessionError::ShuttingDown => "Restart the daemon.".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Invalid listen address: {0}")]
    InvalidListen(String),
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("Server error: {0}")]
    Serve(String),
    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),
}

impl DaemonError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DaemonError::InvalidListen(_) => ErrorCategory::InvalidInput,
            _ => ErrorCategory::External,
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            DaemonError::InvalidListen(_) => {
                "Use host:port. Non-loopback hosts require PTYHUB_ALLOW_REMOTE=1.".to_string()
            }
            DaemonError::Bind { .. } => {
                "Another process may own the port. Pick a different --listen address.".to_string()
            }
            DaemonError::Serve(_) => "Check the daemon log for details.".to_string(),
            DaemonError::SignalSetup(_) => {
                "Signal handler setup failed. Check system signal configuration.".to_string()
            }
        }
    }
}
