//! Command resolution from layered configuration.

use std::sync::Arc;

use tracing::{debug, warn};

use agent_session_core::{CommandConfig, ConfigProvider, Error, Preset, Result, WorkspaceKey};

/// The effective command for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Executable to launch
    pub command: String,
    /// Primary arguments
    pub args: Vec<String>,
    /// Arguments retried once on fast failure
    pub fallback_args: Option<Vec<String>>,
}

impl From<CommandConfig> for ResolvedCommand {
    fn from(config: CommandConfig) -> Self {
        Self {
            command: config.command,
            args: config.args.unwrap_or_default(),
            fallback_args: config.fallback_args,
        }
    }
}

impl From<Preset> for ResolvedCommand {
    fn from(preset: Preset) -> Self {
        Self {
            command: preset.command,
            args: preset.args.unwrap_or_default(),
            fallback_args: preset.fallback_args,
        }
    }
}

/// Joins workspace and preset configuration into a [`ResolvedCommand`].
///
/// Stateless apart from the provider it reads; never spawns anything.
#[derive(Clone)]
pub struct CommandResolver {
    config: Arc<dyn ConfigProvider>,
}

impl std::fmt::Debug for CommandResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandResolver").finish_non_exhaustive()
    }
}

impl CommandResolver {
    /// Create a resolver over a configuration provider.
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self { config }
    }

    /// Resolve via the preset path when `preset_id` is given, otherwise via
    /// the workspace's direct configuration.
    pub fn resolve(&self, key: &WorkspaceKey, preset_id: Option<&str>) -> Result<ResolvedCommand> {
        match preset_id {
            Some(id) => self.resolve_preset(Some(id)),
            None => Ok(self.resolve_direct(key)),
        }
    }

    /// Direct per-workspace configuration. Missing args become an empty list.
    pub fn resolve_direct(&self, key: &WorkspaceKey) -> ResolvedCommand {
        let resolved = ResolvedCommand::from(self.config.command_config(key));
        debug!(
            "Resolved direct command for {}: {} {:?}",
            key, resolved.command, resolved.args
        );
        resolved
    }

    /// Requested preset, else the default preset.
    pub fn resolve_preset(&self, preset_id: Option<&str>) -> Result<ResolvedCommand> {
        let requested = preset_id.and_then(|id| {
            let preset = self.config.preset_by_id(id);
            if preset.is_none() {
                warn!("Preset '{}' not found, using default preset", id);
            }
            preset
        });

        let preset = requested
            .or_else(|| self.config.default_preset())
            .ok_or_else(|| Error::NoPresetAvailable {
                requested: preset_id.map(str::to_string),
            })?;

        debug!("Resolved preset '{}' ({})", preset.id, preset.name);
        Ok(preset.into())
    }
}
