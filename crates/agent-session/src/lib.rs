//! # agent-session
//!
//! Session lifecycle management for per-worktree agent processes.
//!
//! This crate provides:
//! - Command resolution from direct workspace config or presets
//! - Process supervision with a single fast-failure fallback respawn
//! - The session registry (at most one session per workspace) and its events
//! - Output sinks fed with raw terminal output
//!
//! ## Architecture
//!
//! Depends on agent-session-core for types and on agent-session-pty for the
//! spawn boundary. Everything here runs on a tokio runtime: one supervising
//! task per session.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod controller;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use output::{OutputBuffer, OutputSink, SinkFactory};
pub use registry::{RegistryConfig, SessionEvent, SessionRegistry};
pub use resolver::{CommandResolver, ResolvedCommand};
pub use session::{ExitReason, Session};
