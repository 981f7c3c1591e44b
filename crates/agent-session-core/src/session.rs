//! Session identity and state types.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session object.
///
/// Stays the same across a fallback respawn; a session created again for the
/// same workspace after exit gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workspace path scoping exactly one session (one per git worktree).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceKey(PathBuf);

impl WorkspaceKey {
    /// Create a key from a workspace path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The workspace directory, used as the process working directory.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Lookup form used by per-workspace configuration maps.
    pub fn as_config_key(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl From<&str> for WorkspaceKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for WorkspaceKey {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for WorkspaceKey {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl std::fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Lifecycle state of a session's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Process started; fast-failure window still open
    Starting,
    /// Window elapsed, or running the fallback invocation
    Running,
    /// Primary exited early; fallback respawn in progress
    FallingBack,
    /// Process gone; session retired
    Exited,
}

impl SessionState {
    /// Whether the state can still change through the fallback protocol.
    pub fn is_settled(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Exited)
    }
}

/// Snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Workspace key
    pub key: WorkspaceKey,
    /// Session identifier
    pub id: SessionId,
    /// Command currently running
    pub command: String,
    /// Arguments currently running
    pub args: Vec<String>,
    /// False once a fallback respawn happened
    pub is_primary_command: bool,
    /// Current state
    pub state: SessionState,
    /// Creation time
    pub created_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_creation() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new();
        assert_eq!(format!("{id}").len(), 36);
    }

    #[test]
    fn test_workspace_key_path() {
        let key = WorkspaceKey::new("/repo/.worktrees/feature-a");
        assert_eq!(key.path(), Path::new("/repo/.worktrees/feature-a"));
        assert_eq!(key.as_config_key(), "/repo/.worktrees/feature-a");
        assert_eq!(key, WorkspaceKey::from("/repo/.worktrees/feature-a"));
    }

    #[test]
    fn test_session_state_settled() {
        assert!(!SessionState::Starting.is_settled());
        assert!(!SessionState::FallingBack.is_settled());
        assert!(SessionState::Running.is_settled());
        assert!(SessionState::Exited.is_settled());
    }

    #[test]
    fn test_session_state_serialization() {
        let yaml = serde_yaml::to_string(&SessionState::FallingBack).unwrap();
        assert_eq!(yaml.trim(), "falling_back");
    }
}
