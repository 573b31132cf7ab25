use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};

/// Grace period between SIGTERM and SIGKILL at shutdown.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Command used to launch the decision-engine backend.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: vec!["-u".into(), "run_backend.py".into()],
        }
    }
}

impl SupervisorConfig {
    /// Read `BACKEND_CMD` (whitespace-split) from the environment.
    pub fn from_env() -> Self {
        let Ok(raw) = std::env::var("BACKEND_CMD") else {
            return Self::default();
        };
        let mut parts = raw.split_whitespace().map(String::from);
        match parts.next() {
            Some(program) => Self {
                program,
                args: parts.collect(),
            },
            None => Self::default(),
        }
    }
}

/// Supervises the single backend child process for the gateway's lifetime.
///
/// stdout and stderr are line-forwarded to the log stream. There is no
/// restart policy: a non-zero exit is logged and the backend stays down until
/// the gateway itself restarts.
pub struct BackendSupervisor {
    shutdown_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<std::process::ExitStatus>>,
    monitor: tokio::task::JoinHandle<()>,
}

impl BackendSupervisor {
    pub fn spawn(config: SupervisorConfig) -> std::io::Result<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(
            program = %config.program,
            pid = child.id(),
            "backend process started"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::info!(target: "backend", "{line}");
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    // Python tooling writes routine warnings to stderr.
                    if line.is_empty() || line.contains("WARNING") {
                        continue;
                    }
                    tracing::error!(target: "backend", "{line}");
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let monitor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        tracing::info!(target: "backend", "backend process exited");
                        let _ = exit_tx.send(Some(status));
                    }
                    Ok(status) => {
                        tracing::error!(
                            target: "backend",
                            code = status.code(),
                            "backend process exited abnormally"
                        );
                        let _ = exit_tx.send(Some(status));
                    }
                    Err(e) => {
                        tracing::error!(target: "backend", error = %e, "failed to wait on backend process");
                    }
                },
                _ = shutdown_rx => {
                    terminate(&mut child).await;
                }
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            exit_rx,
            monitor,
        })
    }

    /// Watch the child's exit status: `None` until the process exits on its
    /// own.
    pub fn exit_status(&self) -> watch::Receiver<Option<std::process::ExitStatus>> {
        self.exit_rx.clone()
    }

    /// Gracefully terminate the child and wait for supervision to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.monitor.await;
    }
}

/// SIGTERM first, SIGKILL after the grace period.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            tracing::info!(target: "backend", "backend process terminated");
            return;
        }
        tracing::warn!(target: "backend", "backend ignored SIGTERM, killing");
    }

    let _ = child.kill().await;
}
