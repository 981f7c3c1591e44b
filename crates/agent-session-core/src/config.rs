//! Configuration types for agent-session.
//!
//! The registry only ever reads configuration through [`ConfigProvider`]; the
//! YAML-backed [`ManagerConfig`] is the implementation the binary ships with.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Dimensions, Error, Result, WorkspaceKey};

/// Read-only view of command and preset configuration.
///
/// Implementations must be cheap and synchronous; they are queried on every
/// session creation.
pub trait ConfigProvider: Send + Sync {
    /// Direct command configuration for a workspace.
    fn command_config(&self, key: &WorkspaceKey) -> CommandConfig;

    /// Preset used when no preset, or an unknown one, is requested.
    fn default_preset(&self) -> Option<Preset>;

    /// Look up a preset by id.
    fn preset_by_id(&self, id: &str) -> Option<Preset>;
}

/// Direct per-workspace command configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Executable to launch
    pub command: String,
    /// Primary arguments; absent means no arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Arguments retried once if the primary invocation fails fast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_args: Option<Vec<String>>,
}

impl CommandConfig {
    /// Configuration running `command` with no arguments and no fallback.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: None,
            fallback_args: None,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new("claude")
    }
}

/// Named, reusable command configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Executable to launch
    pub command: String,
    /// Primary arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Arguments retried once if the primary invocation fails fast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_args: Option<Vec<String>>,
}

/// Manager configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Terminal settings
    pub terminal: TerminalSettings,
    /// Fast-failure detection settings
    pub fallback: FallbackSettings,
    /// Command used for workspaces without their own entry
    pub default_command: CommandConfig,
    /// Per-workspace command overrides, keyed by workspace path
    pub commands: HashMap<String, CommandConfig>,
    /// Id of the preset used when none is requested
    pub default_preset: Option<String>,
    /// Available presets
    pub presets: Vec<Preset>,
}

impl ManagerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ManagerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.terminal.default_rows == 0 || self.terminal.default_cols == 0 {
            return Err(Error::Config("terminal dimensions must be > 0".to_string()));
        }

        if self.fallback.window_ms == 0 {
            return Err(Error::Config("fallback.window_ms must be > 0".to_string()));
        }

        if self.default_command.command.trim().is_empty() {
            return Err(Error::Config(
                "default_command.command cannot be empty".to_string(),
            ));
        }

        for (workspace, command) in &self.commands {
            if command.command.trim().is_empty() {
                return Err(Error::Config(format!(
                    "command for workspace '{workspace}' cannot be empty"
                )));
            }
        }

        let mut ids = HashSet::new();
        for preset in &self.presets {
            if preset.id.trim().is_empty() {
                return Err(Error::Config("preset id cannot be empty".to_string()));
            }
            if preset.command.trim().is_empty() {
                return Err(Error::Config(format!(
                    "preset '{}' command cannot be empty",
                    preset.id
                )));
            }
            if !ids.insert(preset.id.as_str()) {
                return Err(Error::Config(format!("duplicate preset id '{}'", preset.id)));
            }
        }

        if let Some(default_id) = &self.default_preset {
            if !ids.contains(default_id.as_str()) {
                return Err(Error::Config(format!(
                    "default_preset '{default_id}' does not name a preset"
                )));
            }
        }

        Ok(())
    }

    /// Terminal size used when no ambient size is known.
    pub fn default_dimensions(&self) -> Dimensions {
        Dimensions::new(self.terminal.default_cols, self.terminal.default_rows)
    }
}

impl ConfigProvider for ManagerConfig {
    fn command_config(&self, key: &WorkspaceKey) -> CommandConfig {
        self.commands
            .get(&key.as_config_key())
            .cloned()
            .unwrap_or_else(|| self.default_command.clone())
    }

    fn default_preset(&self) -> Option<Preset> {
        match &self.default_preset {
            Some(id) => self.preset_by_id(id),
            None => self.presets.first().cloned(),
        }
    }

    fn preset_by_id(&self, id: &str) -> Option<Preset> {
        self.presets.iter().find(|p| p.id == id).cloned()
    }
}

/// Terminal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Default terminal rows
    pub default_rows: u16,
    /// Default terminal columns
    pub default_cols: u16,
    /// TERM environment variable value; `None` keeps the inherited one
    pub term: Option<String>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            default_rows: 24,
            default_cols: 80,
            term: Some("xterm-256color".to_string()),
        }
    }
}

/// Fast-failure detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Window after start in which an exit counts as a fast failure
    pub window_ms: u64,
    /// Exit code treated as "invocation rejected"
    pub failure_exit_code: u32,
}

impl FallbackSettings {
    /// The watch window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            window_ms: 500,
            failure_exit_code: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
terminal:
  default_rows: 40
  default_cols: 120
  term: xterm-256color

fallback:
  window_ms: 750
  failure_exit_code: 2

default_command:
  command: claude
  args: ["--continue"]
  fallback_args: []

commands:
  /repo/.worktrees/feature-a:
    command: codex

default_preset: claude-resume

presets:
  - id: claude
    name: Claude
    command: claude
  - id: claude-resume
    name: Claude (resume)
    command: claude
    args: ["--resume"]
    fallback_args: []
"#;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.terminal.default_rows, 24);
        assert_eq!(config.terminal.default_cols, 80);
        assert_eq!(config.fallback.window(), Duration::from_millis(500));
        assert_eq!(config.fallback.failure_exit_code, 1);
        assert_eq!(config.default_command.command, "claude");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let config = ManagerConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.default_dimensions(), Dimensions::new(120, 40));
        assert_eq!(config.fallback.window_ms, 750);
        assert_eq!(config.fallback.failure_exit_code, 2);
        assert_eq!(config.presets.len(), 2);
        assert_eq!(
            config.default_command.args,
            Some(vec!["--continue".to_string()])
        );
    }

    #[test]
    fn test_command_config_lookup() {
        let config = ManagerConfig::from_yaml(SAMPLE).unwrap();

        let overridden = config.command_config(&WorkspaceKey::new("/repo/.worktrees/feature-a"));
        assert_eq!(overridden.command, "codex");
        assert_eq!(overridden.args, None);

        let fallback = config.command_config(&WorkspaceKey::new("/repo/.worktrees/other"));
        assert_eq!(fallback.command, "claude");
    }

    #[test]
    fn test_default_preset_by_id() {
        let config = ManagerConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.default_preset().unwrap().id, "claude-resume");
    }

    #[test]
    fn test_default_preset_first_when_unset() {
        let mut config = ManagerConfig::from_yaml(SAMPLE).unwrap();
        config.default_preset = None;
        assert_eq!(config.default_preset().unwrap().id, "claude");
    }

    #[test]
    fn test_no_presets() {
        let config = ManagerConfig::default();
        assert!(config.default_preset().is_none());
        assert!(config.preset_by_id("claude").is_none());
    }

    #[test]
    fn test_invalid_window() {
        let mut config = ManagerConfig::default();
        config.fallback.window_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut config = ManagerConfig::default();
        config.terminal.default_cols = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_preset_id() {
        let yaml = r#"
presets:
  - id: a
    name: A
    command: claude
  - id: a
    name: Also A
    command: codex
"#;
        let result = ManagerConfig::from_yaml(yaml);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_default_preset() {
        let yaml = r#"
default_preset: missing
presets:
  - id: a
    name: A
    command: claude
"#;
        assert!(ManagerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_workspace_command() {
        let yaml = r#"
commands:
  /repo:
    command: ""
"#;
        assert!(ManagerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = ManagerConfig::from_yaml("presets: [unclosed");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-session.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ManagerConfig::from_file(&path).unwrap();
        assert_eq!(config.presets.len(), 2);

        let missing = ManagerConfig::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
