//! In-memory spawner for driving sessions without real processes.
//!
//! [`FakeSpawner`] records every spawn request and hands out
//! [`FakeProcess`] controls that tests use to emit output and exit codes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use agent_session_core::{Dimensions, Error, Result};
use agent_session_pty::{
    ExitStatus, ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest, SpawnedProcess,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ProcessState {
    written: Vec<u8>,
    resizes: Vec<Dimensions>,
    kill_count: usize,
    exited: bool,
}

/// Test-side control of one fake process.
#[derive(Debug, Clone)]
pub struct FakeProcess {
    pid: u32,
    request: SpawnRequest,
    events: mpsc::UnboundedSender<ProcessEvent>,
    state: Arc<Mutex<ProcessState>>,
}

impl FakeProcess {
    /// Process id handed to the session.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The request this process was spawned with.
    pub fn request(&self) -> &SpawnRequest {
        &self.request
    }

    /// Emit a chunk of output.
    pub fn emit_output(&self, bytes: &[u8]) {
        let _ = self.events.send(ProcessEvent::Output(bytes.to_vec()));
    }

    /// Exit normally with `code`. Later exits are ignored.
    pub fn exit(&self, code: u32) {
        self.exit_with(ExitStatus::with_code(code));
    }

    /// Exit with an explicit status. Later exits are ignored.
    pub fn exit_with(&self, status: ExitStatus) {
        let mut state = lock(&self.state);
        if state.exited {
            return;
        }
        state.exited = true;
        let _ = self.events.send(ProcessEvent::Exited(status));
    }

    /// Bytes written through the handle.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Every resize applied through the handle.
    pub fn resizes(&self) -> Vec<Dimensions> {
        lock(&self.state).resizes.clone()
    }

    /// Whether `kill` was called on the handle.
    pub fn was_killed(&self) -> bool {
        lock(&self.state).kill_count > 0
    }

    /// How many times `kill` was called.
    pub fn kill_count(&self) -> usize {
        lock(&self.state).kill_count
    }
}

#[derive(Debug)]
struct FakeHandle {
    process: FakeProcess,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.process.pid)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = lock(&self.process.state);
        if state.exited {
            return Err(Error::Pty("process has exited".to_string()));
        }
        state.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn resize(&self, dimensions: Dimensions) -> Result<()> {
        lock(&self.process.state).resizes.push(dimensions);
        Ok(())
    }

    /// Killing a live process reports a signalled exit, like a real PTY child.
    fn kill(&self) -> Result<()> {
        lock(&self.process.state).kill_count += 1;
        self.process.exit_with(ExitStatus {
            code: 1,
            signal: Some("Killed".to_string()),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SpawnerState {
    requests: Vec<SpawnRequest>,
    processes: Vec<FakeProcess>,
    failing_attempts: HashSet<usize>,
}

/// Spawner that records requests and never starts a real process.
#[derive(Debug, Clone, Default)]
pub struct FakeSpawner {
    state: Arc<Mutex<SpawnerState>>,
}

impl FakeSpawner {
    /// Create a spawner where every spawn succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `attempt`-th spawn call (0-based) fail synchronously.
    pub fn fail_attempt(&self, attempt: usize) -> &Self {
        lock(&self.state).failing_attempts.insert(attempt);
        self
    }

    /// Number of spawn attempts, including failed ones.
    pub fn spawn_count(&self) -> usize {
        lock(&self.state).requests.len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<SpawnRequest> {
        lock(&self.state).requests.clone()
    }

    /// The `index`-th successfully spawned process.
    pub fn process(&self, index: usize) -> Option<FakeProcess> {
        lock(&self.state).processes.get(index).cloned()
    }

    /// The most recently spawned process.
    pub fn last_process(&self) -> Option<FakeProcess> {
        lock(&self.state).processes.last().cloned()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let mut state = lock(&self.state);
        let attempt = state.requests.len();
        state.requests.push(request.clone());

        if state.failing_attempts.contains(&attempt) {
            return Err(Error::Spawn {
                command: request.command.clone(),
                reason: format!("fake spawn failure on attempt {attempt}"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let process = FakeProcess {
            pid: 1000 + attempt as u32,
            request: request.clone(),
            events: tx,
            state: Arc::new(Mutex::new(ProcessState::default())),
        };
        state.processes.push(process.clone());

        Ok(SpawnedProcess {
            handle: Box::new(FakeHandle { process }),
            events: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(args: &[&str]) -> SpawnRequest {
        SpawnRequest {
            command: "claude".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: PathBuf::from("/repo"),
            dimensions: Dimensions::default(),
            env: vec![],
        }
    }

    #[tokio::test]
    async fn test_fake_spawner_records_and_emits() {
        let spawner = FakeSpawner::new();
        let mut spawned = spawner.spawn(&request(&["--resume"])).unwrap();
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(spawner.requests()[0].args, vec!["--resume"]);

        let process = spawner.process(0).unwrap();
        process.emit_output(b"hi");
        process.exit(0);
        process.exit(1);

        assert_eq!(
            spawned.events.recv().await,
            Some(ProcessEvent::Output(b"hi".to_vec()))
        );
        assert_eq!(
            spawned.events.recv().await,
            Some(ProcessEvent::Exited(ExitStatus::with_code(0)))
        );
        assert!(spawned.events.try_recv().is_err());
    }

    #[test]
    fn test_fake_spawner_failure() {
        let spawner = FakeSpawner::new();
        spawner.fail_attempt(0);
        assert!(matches!(
            spawner.spawn(&request(&[])),
            Err(Error::Spawn { .. })
        ));
        assert_eq!(spawner.spawn_count(), 1);
        assert!(spawner.process(0).is_none());
        assert!(spawner.spawn(&request(&[])).is_ok());
    }

    #[test]
    fn test_fake_handle_kill_and_write() {
        let spawner = FakeSpawner::new();
        let spawned = spawner.spawn(&request(&[])).unwrap();
        let process = spawner.last_process().unwrap();

        assert_eq!(spawned.handle.write(b"abc").unwrap(), 3);
        assert_eq!(process.written(), b"abc");

        spawned.handle.kill().unwrap();
        assert!(process.was_killed());
        assert!(spawned.handle.write(b"x").is_err());
    }
}
