//! Workspace sessions.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agent_session_core::{
    Dimensions, Error, Result, SessionId, SessionInfo, SessionState, WorkspaceKey,
};
use agent_session_pty::{ExitStatus, ProcessEvent, ProcessHandle, SpawnedProcess};

use crate::output::OutputSink;

/// Capacity of each session's output broadcast channel.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Why a session was retired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited on its own (or after `kill`)
    Exited(ExitStatus),
    /// The primary failed fast and the fallback could not be spawned
    FallbackSpawnFailed {
        /// Command that was retried
        command: String,
        /// Error detail from the retry
        reason: String,
    },
    /// The event stream closed without an exit status
    Disconnected,
    /// Torn down through the registry
    Destroyed,
}

impl ExitReason {
    /// Exit code, when the process reported one.
    pub fn code(&self) -> Option<u32> {
        match self {
            ExitReason::Exited(status) => Some(status.code),
            _ => None,
        }
    }
}

struct ProcessSlot {
    handle: Box<dyn ProcessHandle>,
    command: String,
    args: Vec<String>,
    is_primary: bool,
    dimensions: Dimensions,
}

/// One supervised process bound to a workspace.
///
/// The process handle may be swapped once by a fallback respawn; the session
/// object, its id and its key stay the same.
pub struct Session {
    id: SessionId,
    key: WorkspaceKey,
    created_at: SystemTime,
    slot: Mutex<ProcessSlot>,
    sink: Mutex<Option<Box<dyn OutputSink>>>,
    state: watch::Sender<SessionState>,
    output: broadcast::Sender<Vec<u8>>,
    exit: Mutex<Option<ExitReason>>,
    /// Cancelled on destroy; stops supervision outright.
    supervisor: CancellationToken,
    /// Cancelled on kill or destroy; disarms the fast-failure window.
    window: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub(crate) fn new(
        key: WorkspaceKey,
        command: String,
        args: Vec<String>,
        dimensions: Dimensions,
        handle: Box<dyn ProcessHandle>,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Starting);
        let (output, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let supervisor = CancellationToken::new();
        let window = supervisor.child_token();

        Self {
            id: SessionId::new(),
            key,
            created_at: SystemTime::now(),
            slot: Mutex::new(ProcessSlot {
                handle,
                command,
                args,
                is_primary: true,
                dimensions,
            }),
            sink: Mutex::new(Some(sink)),
            state,
            output,
            exit: Mutex::new(None),
            supervisor,
            window,
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Get the workspace key.
    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    /// Get the session creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Command currently running.
    pub fn command(&self) -> String {
        lock(&self.slot).command.clone()
    }

    /// Arguments currently running.
    pub fn args(&self) -> Vec<String> {
        lock(&self.slot).args.clone()
    }

    /// False once a fallback respawn has replaced the primary invocation.
    pub fn is_primary_command(&self) -> bool {
        lock(&self.slot).is_primary
    }

    /// Current terminal size.
    pub fn dimensions(&self) -> Dimensions {
        lock(&self.slot).dimensions
    }

    /// OS process id of the live handle.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.slot).handle.pid()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Why the session was retired, once it has been.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        lock(&self.exit).clone()
    }

    /// Snapshot for listings.
    pub fn info(&self) -> SessionInfo {
        let slot = lock(&self.slot);
        SessionInfo {
            key: self.key.clone(),
            id: self.id,
            command: slot.command.clone(),
            args: slot.args.clone(),
            is_primary_command: slot.is_primary,
            state: self.state(),
            created_at: self.created_at,
        }
    }

    /// Subscribe to raw output chunks.
    ///
    /// Chunks from the fallback process arrive on the same channel.
    pub fn subscribe_output(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output.subscribe()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whatever the output sink has buffered, if it buffers.
    pub fn scrollback(&self) -> Option<Vec<u8>> {
        lock(&self.sink).as_ref().and_then(|sink| sink.snapshot())
    }

    /// Output buffered since the previous call, if the sink buffers.
    pub fn read_output_since_last(&self) -> Option<Vec<u8>> {
        lock(&self.sink)
            .as_mut()
            .and_then(|sink| sink.read_since_last())
    }

    /// Wait until the command can no longer change: the window elapsed, a
    /// fallback respawn completed, or the session exited.
    ///
    /// Resolves to [`Error::FallbackSpawn`] when the fallback could not start.
    pub async fn wait_settled(&self) -> Result<SessionState> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(SessionState::is_settled)
            .await
            .map_err(|e| Error::Runtime(format!("state channel closed: {e}")))?;

        if let Some(ExitReason::FallbackSpawnFailed { command, reason }) = self.exit_reason() {
            return Err(Error::FallbackSpawn { command, reason });
        }
        Ok(state)
    }

    /// Wait until the session has been retired.
    pub async fn wait_exited(&self) -> ExitReason {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Exited).await;
        self.exit_reason().unwrap_or(ExitReason::Disconnected)
    }

    /// Write input to the process.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if self.state() == SessionState::Exited {
            return Err(Error::SessionNotRunning(self.key.clone()));
        }
        debug!("Writing to session: key={}, {} bytes", self.key, data.len());
        lock(&self.slot).handle.write(data)
    }

    /// Resize the terminal and the output sink.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if self.state() == SessionState::Exited {
            return Err(Error::SessionNotRunning(self.key.clone()));
        }
        let dimensions = Dimensions::new(cols, rows);
        if dimensions.is_empty() {
            return Err(Error::Pty(format!("invalid dimensions {dimensions}")));
        }
        info!("Resizing session: key={}, {}", self.key, dimensions);

        let mut slot = lock(&self.slot);
        slot.handle.resize(dimensions)?;
        slot.dimensions = dimensions;
        drop(slot);

        if let Some(sink) = lock(&self.sink).as_mut() {
            sink.resize(dimensions);
        }
        Ok(())
    }

    /// Request process termination. The exit is reported like any other
    /// terminal exit; no fallback respawn follows. Idempotent.
    pub fn kill(&self) -> Result<()> {
        let slot = lock(&self.slot);
        self.window.cancel();
        if self.state() == SessionState::Exited {
            return Ok(());
        }
        info!("Killing session process: key={}", self.key);
        slot.handle.kill()
    }

    pub(crate) fn supervisor_token(&self) -> CancellationToken {
        self.supervisor.clone()
    }

    pub(crate) fn window_token(&self) -> CancellationToken {
        self.window.clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let old = self.state.send_replace(state);
        if old != state {
            info!(
                "Session state changed: key={}, {:?} → {:?}",
                self.key, old, state
            );
        }
    }

    pub(crate) fn publish_output(&self, bytes: &[u8]) {
        if let Some(sink) = lock(&self.sink).as_mut() {
            sink.write(bytes);
        }
        // No subscribers is fine.
        let _ = self.output.send(bytes.to_vec());
    }

    /// Swap in a fallback process.
    ///
    /// Runs under the process lock so it cannot interleave with `kill` or
    /// `terminate`; returns `Ok(None)` if either already happened.
    pub(crate) fn replace_process(
        &self,
        args: Vec<String>,
        spawn: impl FnOnce() -> Result<SpawnedProcess>,
    ) -> Result<Option<mpsc::UnboundedReceiver<ProcessEvent>>> {
        let mut slot = lock(&self.slot);
        if self.window.is_cancelled() {
            return Ok(None);
        }
        self.set_state(SessionState::FallingBack);

        let spawned = spawn()?;
        slot.handle = spawned.handle;
        slot.args = args;
        slot.is_primary = false;
        drop(slot);

        self.set_state(SessionState::Running);
        Ok(Some(spawned.events))
    }

    /// Retire after the process is gone.
    pub(crate) fn finish(&self, reason: ExitReason) {
        let _slot = lock(&self.slot);
        self.window.cancel();
        lock(&self.exit).get_or_insert(reason);
        self.dispose_sink();
        self.set_state(SessionState::Exited);
    }

    /// Tear down unconditionally: stop supervision, kill, dispose.
    pub(crate) fn terminate(&self) {
        let slot = lock(&self.slot);
        self.supervisor.cancel();
        if self.state() != SessionState::Exited {
            info!("Terminating session: key={}, id={}", self.key, self.id);
            if let Err(e) = slot.handle.kill() {
                warn!("Failed to kill process for session {}: {}", self.key, e);
            }
        }
        drop(slot);

        lock(&self.exit).get_or_insert(ExitReason::Destroyed);
        self.dispose_sink();
        self.set_state(SessionState::Exited);
    }

    fn dispose_sink(&self) {
        if let Some(mut sink) = lock(&self.sink).take() {
            sink.dispose();
        }
    }
}
