//! # agent-session
//!
//! Runs one supervised agent session for a worktree in the foreground.
//!
//! ```text
//! agent-session [--config <file>] [--preset <id>] [<workspace>]
//! ```
//!
//! Output of the agent process goes to stdout, stdin is forwarded to it, and
//! logs go to stderr. The exit code is the agent's exit code.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;

use agent_session::{ExitReason, OutputSink, RegistryConfig, Session, SessionRegistry};
use agent_session_core::{Dimensions, ManagerConfig, WorkspaceKey};
use agent_session_pty::NativePtySpawner;

/// Exit code reported when interrupted, as a shell would for SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "agent-session",
    about = "Run a supervised agent session for a worktree",
    version,
    long_about = None
)]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Launch through this preset instead of the workspace's command.
    #[arg(long)]
    preset: Option<String>,

    /// Workspace directory (defaults to the current directory).
    workspace: Option<PathBuf>,
}

/// Copies session output straight to our stdout.
struct StdoutSink {
    stdout: std::io::Stdout,
}

impl OutputSink for StdoutSink {
    fn write(&mut self, bytes: &[u8]) {
        let mut out = self.stdout.lock();
        if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
            tracing::warn!("Failed to write session output: {}", e);
        }
    }
}

fn exit_code(reason: &ExitReason) -> i32 {
    match reason {
        ExitReason::Exited(status) => i32::try_from(status.code).unwrap_or(1),
        ExitReason::FallbackSpawnFailed { command, reason } => {
            tracing::error!("Fallback for '{}' could not start: {}", command, reason);
            1
        }
        ExitReason::Disconnected => 1,
        ExitReason::Destroyed => INTERRUPTED_EXIT_CODE,
    }
}

/// Forward our stdin to the session until EOF or the session stops.
async fn forward_stdin(session: Arc<Session>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 4096];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = session.write(&buf[..n]) {
                    tracing::debug!("Stopped forwarding input: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // stdout belongs to the agent
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => ManagerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    let workspace = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let workspace = std::fs::canonicalize(&workspace)
        .with_context(|| format!("workspace {} does not exist", workspace.display()))?;
    let key = WorkspaceKey::new(workspace);

    let mut registry_config = RegistryConfig::from_manager_config(&config);
    registry_config.ambient_dimensions = crossterm::terminal::size()
        .ok()
        .map(|(cols, rows)| Dimensions::new(cols, rows));

    tracing::info!(
        "agent-session v{} starting: workspace={}, size={}",
        env!("CARGO_PKG_VERSION"),
        key,
        registry_config.dimensions()
    );

    let registry = SessionRegistry::new(
        Arc::new(config),
        Arc::new(NativePtySpawner),
        registry_config,
    )
    .with_sink_factory(Arc::new(
        |_: &WorkspaceKey, _: Dimensions| -> Box<dyn OutputSink> {
            Box::new(StdoutSink {
                stdout: std::io::stdout(),
            })
        },
    ));

    let session = match args.preset.as_deref() {
        Some(preset) => registry.create_session_with_preset(key, Some(preset)),
        None => registry.create_session(key),
    }
    .context("failed to start agent session")?;

    tokio::spawn(forward_stdin(Arc::clone(&session)));

    let code = tokio::select! {
        reason = session.wait_exited() => {
            tracing::info!("Agent exited: {:?}", reason);
            exit_code(&reason)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, destroying sessions");
            registry.destroy();
            INTERRUPTED_EXIT_CODE
        }
    };

    registry.destroy();
    drop(registry);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_session_pty::ExitStatus;

    fn parse(args: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("agent-session").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_defaults() {
        let args = parse(&[]).unwrap();
        assert!(args.config.is_none());
        assert!(args.preset.is_none());
        assert!(args.workspace.is_none());
    }

    #[test]
    fn test_parse_all_options() {
        let args = parse(&["--config", "agents.yaml", "--preset", "codex", "/repo/wt"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("agents.yaml")));
        assert_eq!(args.preset.as_deref(), Some("codex"));
        assert_eq!(args.workspace, Some(PathBuf::from("/repo/wt")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--preset"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["/a", "/b"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(&ExitReason::Exited(ExitStatus::with_code(0))), 0);
        assert_eq!(exit_code(&ExitReason::Exited(ExitStatus::with_code(3))), 3);
        assert_eq!(
            exit_code(&ExitReason::FallbackSpawnFailed {
                command: "claude".to_string(),
                reason: "not found".to_string(),
            }),
            1
        );
        assert_eq!(exit_code(&ExitReason::Destroyed), INTERRUPTED_EXIT_CODE);
    }
}
