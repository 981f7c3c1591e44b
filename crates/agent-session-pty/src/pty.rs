//! PTY (Pseudo-Terminal) handling with portable-pty.

use std::io::{Read, Write};
use std::sync::{mpsc as std_mpsc, Mutex};
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use agent_session_core::{Dimensions, Error, Result};

use crate::process::{
    ExitStatus, ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest, SpawnedProcess,
};

/// How long the exit waiter lets the reader drain trailing output.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Handle to a process running on a native PTY.
pub struct PtyHandle {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

fn pty_size(dimensions: Dimensions) -> PtySize {
    PtySize {
        rows: dimensions.rows,
        cols: dimensions.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyHandle {
    /// Spawn `request` on a new PTY.
    ///
    /// Output is forwarded by a reader thread and the exit status by a waiter
    /// thread; both feed the returned event channel. The exit notification is
    /// always last.
    ///
    /// # Example
    /// ```no_run
    /// use agent_session_pty::{PtyHandle, SpawnRequest};
    /// use agent_session_core::Dimensions;
    ///
    /// # fn example() -> agent_session_core::Result<()> {
    /// let spawned = PtyHandle::spawn(&SpawnRequest {
    ///     command: "/bin/sh".to_string(),
    ///     args: vec![],
    ///     cwd: std::env::current_dir()?,
    ///     dimensions: Dimensions::new(80, 24),
    ///     env: std::env::vars().collect(),
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(request: &SpawnRequest) -> Result<SpawnedProcess> {
        info!(
            "Spawning PTY: command='{}' args={:?}, dimensions={}, cwd={}",
            request.command,
            request.args,
            request.dimensions,
            request.cwd.display()
        );

        let pair = native_pty_system()
            .openpty(pty_size(request.dimensions))
            .map_err(|e| {
                error!("Failed to open PTY: {}", e);
                Error::Pty(format!("Failed to open PTY: {e}"))
            })?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        cmd.env_clear();
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", request.command, e);
            Error::Spawn {
                command: request.command.clone(),
                reason: e.to_string(),
            }
        })?;
        // The child holds its own copy; dropping ours lets the reader see EOF.
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| {
            error!("Failed to take PTY writer: {}", e);
            Error::Pty(format!("Failed to take writer: {e}"))
        })?;

        let reader = pair.master.try_clone_reader().map_err(|e| {
            error!("Failed to clone PTY reader: {}", e);
            Error::Pty(format!("Failed to clone reader: {e}"))
        })?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let (tx, rx) = mpsc::unbounded_channel();

        let drained = spawn_reader(reader, tx.clone());
        spawn_waiter(child, drained, tx);

        info!(
            "PTY spawned successfully: command='{}', pid={:?}",
            request.command, pid
        );

        Ok(SpawnedProcess {
            handle: Box::new(Self {
                master: Mutex::new(pair.master),
                writer: Mutex::new(writer),
                killer: Mutex::new(killer),
                pid,
            }),
            events: rx,
        })
    }
}

/// Forward output chunks until EOF. The returned receiver fires once the
/// reader has stopped.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) -> std_mpsc::Receiver<()> {
    let (done_tx, done_rx) = std_mpsc::channel();
    thread::spawn(move || {
        let mut buffer = vec![0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    debug!("Read {} bytes from PTY", n);
                    if tx.send(ProcessEvent::Output(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // EIO is how Linux reports a closed slave side.
                Err(e) => {
                    debug!("PTY reader stopped: {}", e);
                    break;
                }
            }
        }
        let _ = done_tx.send(());
    });
    done_rx
}

/// Wait for the child and report its exit status after trailing output.
fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    drained: std_mpsc::Receiver<()>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) {
    thread::spawn(move || {
        let status = match child.wait() {
            Ok(status) => ExitStatus {
                code: status.exit_code(),
                signal: status.signal().map(str::to_string),
            },
            Err(e) => {
                warn!("Failed to wait for PTY child: {}", e);
                ExitStatus::with_code(u32::MAX)
            }
        };
        // A grandchild may keep the slave open; don't wait on it forever.
        let _ = drained.recv_timeout(OUTPUT_DRAIN_TIMEOUT);
        info!("PTY child exited: {}", status);
        let _ = tx.send(ProcessEvent::Exited(status));
    });
}

impl ProcessHandle for PtyHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        debug!("Writing {} bytes to PTY", data.len());
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| Error::Pty(format!("Lock error: {e}")))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(data.len())
    }

    fn resize(&self, new_dimensions: Dimensions) -> Result<()> {
        info!("Resizing PTY to {}", new_dimensions);
        let master = self
            .master
            .lock()
            .map_err(|e| Error::Pty(format!("Lock error: {e}")))?;
        master
            .resize(pty_size(new_dimensions))
            .map_err(|e| Error::Pty(format!("Resize failed: {e}")))
    }

    fn kill(&self) -> Result<()> {
        info!("Killing PTY process: pid={:?}", self.pid);
        let mut killer = self
            .killer
            .lock()
            .map_err(|e| Error::Pty(format!("Lock error: {e}")))?;
        killer
            .kill()
            .map_err(|e| Error::Pty(format!("Kill failed: {e}")))
    }
}

/// Spawner backed by the platform's native PTY system.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePtySpawner;

impl ProcessSpawner for NativePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        PtyHandle::spawn(request)
    }
}
