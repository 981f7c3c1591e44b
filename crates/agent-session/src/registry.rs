//! Session registry: at most one live session per workspace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info};

use agent_session_core::{
    ConfigProvider, Dimensions, Error, FallbackSettings, ManagerConfig, Result, SessionInfo,
    WorkspaceKey,
};
use agent_session_pty::{ProcessSpawner, SpawnRequest};

use crate::controller::{LifecycleHooks, ProcessController};
use crate::output::{OutputBuffer, OutputSink, SinkFactory};
use crate::resolver::{CommandResolver, ResolvedCommand};
use crate::session::{ExitReason, Session};

/// Configuration for the session registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Terminal size used when no ambient size is known
    pub default_dimensions: Dimensions,
    /// Size of the controlling terminal, if discoverable
    pub ambient_dimensions: Option<Dimensions>,
    /// Fast-failure detection settings
    pub fallback: FallbackSettings,
    /// TERM value injected into the environment snapshot
    pub term: Option<String>,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
}

impl RegistryConfig {
    /// Registry settings taken from a loaded manager configuration.
    pub fn from_manager_config(config: &ManagerConfig) -> Self {
        Self {
            default_dimensions: config.default_dimensions(),
            ambient_dimensions: None,
            fallback: config.fallback.clone(),
            term: config.terminal.term.clone(),
            ..Self::default()
        }
    }

    /// Ambient size when usable, else the default.
    pub fn dimensions(&self) -> Dimensions {
        self.ambient_dimensions
            .filter(|dims| !dims.is_empty())
            .unwrap_or(self.default_dimensions)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_dimensions: Dimensions::default(),
            ambient_dimensions: None,
            fallback: FallbackSettings::default(),
            term: None,
            event_capacity: 64,
        }
    }
}

/// Lifecycle notification published by the registry.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new session was registered
    Created(Arc<Session>),
    /// The primary failed fast and the fallback invocation is now running
    Respawned(Arc<Session>),
    /// The process ended and the session was removed
    Exited {
        /// The retired session
        session: Arc<Session>,
        /// How it ended
        reason: ExitReason,
    },
}

impl SessionEvent {
    /// The session the event is about.
    pub fn session(&self) -> &Arc<Session> {
        match self {
            SessionEvent::Created(session)
            | SessionEvent::Respawned(session)
            | SessionEvent::Exited { session, .. } => session,
        }
    }
}

struct Shared {
    sessions: Mutex<HashMap<WorkspaceKey, Arc<Session>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn sessions(&self) -> MutexGuard<'_, HashMap<WorkspaceKey, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Publish a respawn. Waits for a `Created` still in flight.
    fn respawned(&self, session: &Arc<Session>) {
        let _sessions = self.sessions();
        self.publish(SessionEvent::Respawned(Arc::clone(session)));
    }

    /// Remove an exited session, unless it was already destroyed or replaced,
    /// then mark it exited.
    ///
    /// Everything happens under the map lock: `create_session` never hands out
    /// an exited session, and `Exited` never overtakes `Created`.
    fn retire(&self, session: Arc<Session>, reason: ExitReason) {
        let mut sessions = self.sessions();
        let registered = matches!(
            sessions.get(session.key()),
            Some(current) if Arc::ptr_eq(current, &session)
        );
        if registered {
            sessions.remove(session.key());
        }
        session.finish(reason.clone());

        if registered {
            info!("Session retired: key={}, reason={:?}", session.key(), reason);
            self.publish(SessionEvent::Exited { session, reason });
        } else {
            debug!("Stale exit ignored: key={}", session.key());
        }
    }
}

/// Maps workspace keys to their sessions.
///
/// One owned instance is shared explicitly by whatever needs session lookup;
/// there is no global state.
pub struct SessionRegistry {
    shared: Arc<Shared>,
    resolver: CommandResolver,
    spawner: Arc<dyn ProcessSpawner>,
    sink_factory: SinkFactory,
    config: RegistryConfig,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create a registry reading commands from `config_provider` and starting
    /// processes through `spawner`.
    pub fn new(
        config_provider: Arc<dyn ConfigProvider>,
        spawner: Arc<dyn ProcessSpawner>,
        config: RegistryConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                sessions: Mutex::new(HashMap::new()),
                events,
            }),
            resolver: CommandResolver::new(config_provider),
            spawner,
            sink_factory: Arc::new(|_: &WorkspaceKey, _: Dimensions| -> Box<dyn OutputSink> {
                Box::new(OutputBuffer::new())
            }),
            config,
        }
    }

    /// Use `factory` to build each new session's output sink.
    pub fn with_sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = factory;
        self
    }

    /// The registry's settings.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Session for `key` using the workspace's direct command configuration.
    ///
    /// Returns the registered session unchanged if there is one; otherwise
    /// spawns synchronously and returns without waiting for the fast-failure
    /// window.
    pub fn create_session(&self, key: impl Into<WorkspaceKey>) -> Result<Arc<Session>> {
        let key = key.into();
        self.get_or_create(key, |resolver, key| Ok(resolver.resolve_direct(key)))
    }

    /// Session for `key` using a preset (or the default preset).
    ///
    /// Same idempotency rule as [`create_session`](Self::create_session).
    pub fn create_session_with_preset(
        &self,
        key: impl Into<WorkspaceKey>,
        preset_id: Option<&str>,
    ) -> Result<Arc<Session>> {
        let key = key.into();
        self.get_or_create(key, |resolver, _| resolver.resolve_preset(preset_id))
    }

    fn get_or_create(
        &self,
        key: WorkspaceKey,
        resolve: impl FnOnce(&CommandResolver, &WorkspaceKey) -> Result<ResolvedCommand>,
    ) -> Result<Arc<Session>> {
        // Held across resolve and spawn so concurrent callers can't double-spawn.
        let mut sessions = self.shared.sessions();
        if let Some(existing) = sessions.get(&key) {
            debug!("Reusing existing session: key={}", key);
            return Ok(Arc::clone(existing));
        }

        let command = resolve(&self.resolver, &key)?;
        let dimensions = self.config.dimensions();
        let request = SpawnRequest {
            command: command.command.clone(),
            args: command.args.clone(),
            cwd: key.path().to_path_buf(),
            dimensions,
            env: self.environment(),
        };
        let sink = (self.sink_factory)(&key, dimensions);

        let session = ProcessController::start(
            key.clone(),
            command,
            request,
            Arc::clone(&self.spawner),
            sink,
            self.config.fallback.clone(),
            self.hooks(),
        )?;

        sessions.insert(key, Arc::clone(&session));
        // Still under the lock, ahead of any respawn or exit of this session.
        self.shared.publish(SessionEvent::Created(Arc::clone(&session)));
        drop(sessions);

        Ok(session)
    }

    fn hooks(&self) -> LifecycleHooks {
        let on_respawn: Weak<Shared> = Arc::downgrade(&self.shared);
        let on_exit: Weak<Shared> = Arc::downgrade(&self.shared);
        LifecycleHooks {
            on_respawn: Box::new(move |session| {
                if let Some(shared) = on_respawn.upgrade() {
                    shared.respawned(session);
                }
            }),
            on_exit: Box::new(move |session, reason| {
                match on_exit.upgrade() {
                    Some(shared) => shared.retire(session, reason),
                    None => session.finish(reason),
                }
            }),
        }
    }

    /// Environment snapshot taken at spawn time.
    fn environment(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .filter(|(key, _)| self.config.term.is_none() || key != "TERM")
            .collect();
        if let Some(term) = &self.config.term {
            env.push(("TERM".to_string(), term.clone()));
        }
        env
    }

    /// Get the session registered for `key`.
    pub fn get_session(&self, key: &WorkspaceKey) -> Option<Arc<Session>> {
        self.shared.sessions().get(key).cloned()
    }

    /// Kill the session's process, dispose its sink and remove it.
    ///
    /// No-op for unknown keys. Does not publish [`SessionEvent::Exited`].
    pub fn destroy_session(&self, key: &WorkspaceKey) {
        let removed = self.shared.sessions().remove(key);
        if let Some(session) = removed {
            info!("Destroying session: key={}, id={}", key, session.id());
            session.terminate();
        }
    }

    /// Destroy every registered session.
    pub fn destroy(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut sessions = self.shared.sessions();
            sessions.drain().map(|(_, session)| session).collect()
        };
        if !sessions.is_empty() {
            info!("Destroying all sessions: count={}", sessions.len());
        }
        for session in sessions {
            session.terminate();
        }
    }

    /// Write input to the session for `key`.
    pub fn write(&self, key: &WorkspaceKey, input: &[u8]) -> Result<usize> {
        self.require(key)?.write(input)
    }

    /// Resize the session for `key`.
    pub fn resize(&self, key: &WorkspaceKey, cols: u16, rows: u16) -> Result<()> {
        self.require(key)?.resize(cols, rows)
    }

    fn require(&self, key: &WorkspaceKey) -> Result<Arc<Session>> {
        self.get_session(key)
            .ok_or_else(|| Error::SessionNotFound(key.clone()))
    }

    /// List all registered sessions.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .shared
            .sessions()
            .values()
            .map(|session| session.info())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Get the number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions().len()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSpawner;

    fn registry(spawner: &FakeSpawner) -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(ManagerConfig::default()),
            Arc::new(spawner.clone()),
            RegistryConfig::default(),
        )
    }

    #[test]
    fn test_registry_config_dimensions() {
        let mut config = RegistryConfig::default();
        assert_eq!(config.dimensions(), Dimensions::new(80, 24));

        config.ambient_dimensions = Some(Dimensions::new(132, 43));
        assert_eq!(config.dimensions(), Dimensions::new(132, 43));

        config.ambient_dimensions = Some(Dimensions::new(0, 0));
        assert_eq!(config.dimensions(), Dimensions::new(80, 24));
    }

    #[test]
    fn test_registry_config_from_manager_config() {
        let mut manager = ManagerConfig::default();
        manager.terminal.default_cols = 100;
        manager.terminal.default_rows = 30;
        manager.fallback.window_ms = 900;

        let config = RegistryConfig::from_manager_config(&manager);
        assert_eq!(config.default_dimensions, Dimensions::new(100, 30));
        assert_eq!(config.fallback.window_ms, 900);
        assert_eq!(config.term.as_deref(), Some("xterm-256color"));
    }

    #[test]
    fn test_create_outside_runtime_fails_without_spawning() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner);

        let result = registry.create_session("/repo");
        assert!(matches!(result, Err(Error::Runtime(_))));
        assert_eq!(spawner.spawn_count(), 0);
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_environment_snapshot_sets_term() {
        let spawner = FakeSpawner::new();
        let registry = SessionRegistry::new(
            Arc::new(ManagerConfig::default()),
            Arc::new(spawner.clone()),
            RegistryConfig {
                term: Some("xterm-256color".to_string()),
                ..Default::default()
            },
        );

        registry.create_session("/repo").unwrap();
        let env = &spawner.requests()[0].env;
        let terms: Vec<&String> = env
            .iter()
            .filter(|(key, _)| key == "TERM")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(terms, vec!["xterm-256color"]);
    }

    #[tokio::test]
    async fn test_spawn_uses_workspace_as_cwd() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner);

        registry.create_session("/repo/.worktrees/feature-a").unwrap();
        let request = &spawner.requests()[0];
        assert_eq!(request.cwd, std::path::PathBuf::from("/repo/.worktrees/feature-a"));
        assert_eq!(request.dimensions, Dimensions::new(80, 24));
    }

    #[tokio::test]
    async fn test_list_sessions_sorted() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner);

        registry.create_session("/repo/b").unwrap();
        registry.create_session("/repo/a").unwrap();

        let infos = registry.list_sessions();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key, WorkspaceKey::new("/repo/a"));
        assert_eq!(infos[1].key, WorkspaceKey::new("/repo/b"));
        assert!(infos.iter().all(|info| info.is_primary_command));
    }

    #[tokio::test]
    async fn test_unknown_key_pass_throughs() {
        let spawner = FakeSpawner::new();
        let registry = registry(&spawner);
        let key = WorkspaceKey::new("/nowhere");

        assert!(matches!(
            registry.write(&key, b"hi"),
            Err(Error::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.resize(&key, 100, 30),
            Err(Error::SessionNotFound(_))
        ));
        registry.destroy_session(&key);
    }

    #[tokio::test]
    async fn test_drop_destroys_sessions() {
        let spawner = FakeSpawner::new();
        let session = {
            let registry = registry(&spawner);
            registry.create_session("/repo").unwrap()
        };
        assert!(spawner.process(0).unwrap().was_killed());
        assert_eq!(session.exit_reason(), Some(ExitReason::Destroyed));
    }
}
