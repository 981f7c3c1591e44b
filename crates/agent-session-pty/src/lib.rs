//! # agent-session-pty
//!
//! Process spawning for agent-session.
//!
//! This crate provides:
//! - The spawn boundary traits (`ProcessSpawner`, `ProcessHandle`)
//! - Output/exit event types delivered per process
//! - A portable-pty backed implementation (`NativePtySpawner`)
//!
//! ## Architecture
//!
//! Depends only on agent-session-core. The session layer talks to processes
//! exclusively through the traits defined here, so it can be driven by fakes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod process;
pub mod pty;

// Re-export commonly used types
pub use process::{
    ExitStatus, ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest, SpawnedProcess,
};
pub use pty::{NativePtySpawner, PtyHandle};
