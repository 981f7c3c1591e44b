//! # agent-session-core
//!
//! Core types for agent-session.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other agent-session crates. It provides:
//!
//! - Terminal dimensions
//! - Session identity and state (SessionId, WorkspaceKey, SessionState)
//! - Command and preset configuration, and the `ConfigProvider` boundary
//! - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod session;

// Re-export commonly used types
pub use config::{
    CommandConfig, ConfigProvider, FallbackSettings, ManagerConfig, Preset, TerminalSettings,
};
pub use error::{Error, Result};
pub use geometry::Dimensions;
pub use session::{SessionId, SessionInfo, SessionState, WorkspaceKey};
