//! Error types for agent-session.

use thiserror::Error;

use crate::WorkspaceKey;

/// Main error type for session lifecycle operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The process could not be started at all (e.g. missing executable).
    #[error("Failed to spawn '{command}': {reason}")]
    Spawn {
        /// Command that failed to start
        command: String,
        /// Underlying failure detail
        reason: String,
    },

    /// The fallback respawn after an early exit could not be started.
    #[error("Failed to spawn fallback for '{command}': {reason}")]
    FallbackSpawn {
        /// Command that failed to start
        command: String,
        /// Underlying failure detail from the retry
        reason: String,
    },

    /// Neither the requested preset nor a default preset exists.
    #[error("No preset available (requested: {})", requested.as_deref().unwrap_or("<default>"))]
    NoPresetAvailable {
        /// Preset id the caller asked for, if any
        requested: Option<String>,
    },

    /// No session registered for the workspace key
    #[error("Session not found: {0}")]
    SessionNotFound(WorkspaceKey),

    /// Session process has already exited
    #[error("Session not running: {0}")]
    SessionNotRunning(WorkspaceKey),

    /// PTY-related errors
    #[error("PTY error: {0}")]
    Pty(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No async runtime available to supervise the session
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error() {
        let err = Error::Spawn {
            command: "claude".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to spawn 'claude': No such file or directory"
        );
    }

    #[test]
    fn test_fallback_spawn_error() {
        let err = Error::FallbackSpawn {
            command: "claude".to_string(),
            reason: "exec format error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to spawn fallback for 'claude': exec format error"
        );
    }

    #[test]
    fn test_no_preset_available_error() {
        let err = Error::NoPresetAvailable {
            requested: Some("fast".to_string()),
        };
        assert_eq!(err.to_string(), "No preset available (requested: fast)");

        let err = Error::NoPresetAvailable { requested: None };
        assert_eq!(err.to_string(), "No preset available (requested: <default>)");
    }

    #[test]
    fn test_session_not_found_error() {
        let err = Error::SessionNotFound(WorkspaceKey::new("/repo/.worktrees/feat"));
        assert_eq!(err.to_string(), "Session not found: /repo/.worktrees/feat");
    }

    #[test]
    fn test_session_not_running_error() {
        let err = Error::SessionNotRunning(WorkspaceKey::new("/repo"));
        assert_eq!(err.to_string(), "Session not running: /repo");
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config("fallback.window_ms must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: fallback.window_ms must be > 0"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
