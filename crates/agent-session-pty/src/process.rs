//! Process spawning boundary.
//!
//! The session layer never touches a PTY directly: it asks a [`ProcessSpawner`]
//! for a [`SpawnedProcess`], which pairs a control handle with the stream of
//! output and exit notifications for that one process.

use std::path::PathBuf;

use tokio::sync::mpsc;

use agent_session_core::{Dimensions, Result};

/// Everything needed to start one process attached to a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Executable to launch
    pub command: String,
    /// Ordered argument list
    pub args: Vec<String>,
    /// Working directory (the workspace path)
    pub cwd: PathBuf,
    /// Initial terminal size
    pub dimensions: Dimensions,
    /// Full environment snapshot, passed by value
    pub env: Vec<(String, String)>,
}

impl SpawnRequest {
    /// Same request with a different argument list.
    pub fn with_args(&self, args: Vec<String>) -> Self {
        Self {
            args,
            ..self.clone()
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code (non-zero when killed by a signal)
    pub code: u32,
    /// Signal name, if the process was terminated by one
    pub signal: Option<String>,
}

impl ExitStatus {
    /// Normal exit with `code`.
    pub fn with_code(code: u32) -> Self {
        Self { code, signal: None }
    }

    /// Whether the process exited with code zero.
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.signal {
            Some(signal) => write!(f, "code {} (signal {signal})", self.code),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// Notification from a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of raw terminal output
    Output(Vec<u8>),
    /// The process exited; always the last event on the channel
    Exited(ExitStatus),
}

/// Control side of a spawned process.
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    /// OS process id, when known.
    fn pid(&self) -> Option<u32>;

    /// Write input bytes to the terminal.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Resize the terminal.
    fn resize(&self, dimensions: Dimensions) -> Result<()>;

    /// Request termination.
    fn kill(&self) -> Result<()>;
}

/// A freshly started process: its handle plus its event stream.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Control handle
    pub handle: Box<dyn ProcessHandle>,
    /// Output chunks followed by exactly one exit notification
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Starts processes. Failure to start is reported synchronously.
pub trait ProcessSpawner: Send + Sync {
    /// Spawn a process for `request`.
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess>;
}
