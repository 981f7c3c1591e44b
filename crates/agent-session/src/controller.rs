//! Process supervision and the fast-failure fallback protocol.
//!
//! Each session gets one controller task. It owns the event stream of the
//! current process and serializes output, exit notification and the watch
//! window timer through a single `select!` loop:
//!
//! ```text
//! Starting ──window elapsed──▶ Running ──exit──▶ Exited
//!    │
//!    └─exit(failure code) within window, fallback configured
//!         ──▶ FallingBack ──respawn──▶ Running ──exit──▶ Exited
//! ```
//!
//! The fallback tier is used at most once per session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use agent_session_core::{Error, FallbackSettings, Result, SessionState, WorkspaceKey};
use agent_session_pty::{ExitStatus, ProcessEvent, ProcessSpawner, SpawnRequest};

use crate::output::OutputSink;
use crate::resolver::ResolvedCommand;
use crate::session::{ExitReason, Session};

/// Callbacks from a controller to whoever owns the session.
pub(crate) struct LifecycleHooks {
    /// After a successful fallback respawn.
    pub on_respawn: Box<dyn Fn(&Arc<Session>) + Send + Sync>,
    /// Once, when the process is gone for good. Not called after destroy.
    /// Responsible for retiring the session with [`Session::finish`].
    pub on_exit: Box<dyn FnOnce(Arc<Session>, ExitReason) + Send>,
}

/// Supervises the process of one session.
pub(crate) struct ProcessController {
    session: Arc<Session>,
    spawner: Arc<dyn ProcessSpawner>,
    request: SpawnRequest,
    fallback_args: Option<Vec<String>>,
    settings: FallbackSettings,
    hooks: LifecycleHooks,
}

impl ProcessController {
    /// Spawn the primary invocation and start supervising it.
    ///
    /// A spawn failure is returned as-is; fallback only applies to a process
    /// that started and then exited early.
    pub(crate) fn start(
        key: WorkspaceKey,
        command: ResolvedCommand,
        request: SpawnRequest,
        spawner: Arc<dyn ProcessSpawner>,
        sink: Box<dyn OutputSink>,
        settings: FallbackSettings,
        hooks: LifecycleHooks,
    ) -> Result<Arc<Session>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("session supervision needs a tokio runtime: {e}")))?;

        let spawned = spawner.spawn(&request)?;
        let started = Instant::now();

        let session = Arc::new(Session::new(
            key,
            request.command.clone(),
            request.args.clone(),
            request.dimensions,
            spawned.handle,
            sink,
        ));

        info!(
            "Session started: key={}, id={}, command='{}' args={:?}, fallback={:?}",
            session.key(),
            session.id(),
            request.command,
            request.args,
            command.fallback_args
        );

        let controller = Self {
            session: Arc::clone(&session),
            spawner,
            request,
            fallback_args: command.fallback_args,
            settings,
            hooks,
        };
        runtime.spawn(controller.supervise(spawned.events, started));

        Ok(session)
    }

    async fn supervise(mut self, mut events: mpsc::UnboundedReceiver<ProcessEvent>, started: Instant) {
        let supervisor = self.session.supervisor_token();
        let window_token = self.session.window_token();
        let deadline = started + self.settings.window();
        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);
        let mut window_open = true;

        let reason = loop {
            tokio::select! {
                biased;

                _ = supervisor.cancelled() => {
                    debug!("Supervision cancelled: key={}", self.session.key());
                    return;
                }

                event = events.recv() => match event {
                    Some(ProcessEvent::Output(bytes)) => self.session.publish_output(&bytes),
                    Some(ProcessEvent::Exited(status)) => {
                        if !(window_open && Instant::now() < deadline && self.is_fast_failure(&status)) {
                            break ExitReason::Exited(status);
                        }
                        match self.fall_back(&status) {
                            Ok(Some(next)) => {
                                events = next;
                                window_open = false;
                                (self.hooks.on_respawn)(&self.session);
                            }
                            Ok(None) if supervisor.is_cancelled() => return,
                            Ok(None) => break ExitReason::Exited(status),
                            Err(e) => {
                                error!("Fallback spawn failed for {}: {}", self.session.key(), e);
                                break ExitReason::FallbackSpawnFailed {
                                    command: self.request.command.clone(),
                                    reason: fallback_detail(e),
                                };
                            }
                        }
                    }
                    None => {
                        warn!("Process events closed without exit: key={}", self.session.key());
                        break ExitReason::Disconnected;
                    }
                },

                _ = &mut window, if window_open => {
                    window_open = false;
                    debug!("Fast-failure window elapsed: key={}", self.session.key());
                    self.session.set_state(SessionState::Running);
                }

                _ = window_token.cancelled(), if window_open => {
                    window_open = false;
                    debug!("Fast-failure window disarmed: key={}", self.session.key());
                }
            }
        };

        if supervisor.is_cancelled() {
            return;
        }
        info!("Session exited: key={}, reason={:?}", self.session.key(), reason);
        (self.hooks.on_exit)(self.session, reason);
    }

    fn is_fast_failure(&self, status: &ExitStatus) -> bool {
        self.fallback_args.is_some()
            && status.code == self.settings.failure_exit_code
            && status.signal.is_none()
    }

    /// Respawn with the fallback arguments, consuming the single fallback tier.
    fn fall_back(
        &mut self,
        status: &ExitStatus,
    ) -> Result<Option<mpsc::UnboundedReceiver<ProcessEvent>>> {
        let Some(args) = self.fallback_args.take() else {
            return Ok(None);
        };
        info!(
            "Primary command exited early ({}), retrying with fallback args: key={}, args={:?}",
            status,
            self.session.key(),
            args
        );

        let mut request = self.request.with_args(args.clone());
        request.dimensions = self.session.dimensions();
        let spawner = Arc::clone(&self.spawner);
        let events = self
            .session
            .replace_process(args, || spawner.spawn(&request))?;
        if events.is_some() {
            self.request = request;
        }
        Ok(events)
    }
}

fn fallback_detail(err: Error) -> String {
    match err {
        Error::Spawn { reason, .. } => reason,
        other => other.to_string(),
    }
}
