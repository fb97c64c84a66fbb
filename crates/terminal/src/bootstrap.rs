//! Readiness of the sandboxed shell environment.
//!
//! A networked session needs the local shell server up before it can
//! allocate a process. The environment itself is provisioned elsewhere; this
//! module only asks whether it is there and nudges it to start.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to start shell server: {0}")]
    StartFailed(String),

    #[error("installation failed: {0}")]
    InstallFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One line of bootstrap output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Info(String),
    Error(String),
}

pub type LogSink = mpsc::UnboundedSender<LogLine>;

/// Environment provisioning hooks used before a networked session opens.
pub trait Bootstrap: Send + Sync {
    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Whether this device can host the environment at all.
    fn is_supported(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    fn is_axs_running(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Launch the shell server. Returns once the launch was issued, not once
    /// the server is accepting connections.
    fn start_axs(
        &self,
        installing: bool,
        log: LogSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BootstrapError>> + Send + '_>>;

    fn install(
        &self,
        log: LogSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BootstrapError>> + Send + '_>>;
}

/// Poll `is_axs_running` up to `attempts` times, `interval` apart.
pub async fn wait_until_running(bootstrap: &dyn Bootstrap, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts {
        if bootstrap.is_axs_running().await {
            tracing::debug!(attempt, "Shell server is running");
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// [`Bootstrap`] for a server started as a child process on this machine.
///
/// The environment counts as installed and supported; readiness is a TCP
/// probe of the server port.
#[derive(Debug)]
pub struct ProcessBootstrap {
    host: String,
    port: u16,
    server_command: Option<String>,
    install_command: Option<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessBootstrap {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        server_command: Option<String>,
        install_command: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            server_command,
            install_command,
            child: Mutex::new(None),
        }
    }

    fn spawn_shell(command: &str, log: &LogSink) -> Result<Child, BootstrapError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, "stdout", log.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, "stderr", log.clone());
        }
        Ok(child)
    }
}

fn forward_lines<R>(reader: R, stream: &'static str, log: LogSink)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if log.send(LogLine::Info(format!("{} {}", stream, line))).is_err() {
                break;
            }
        }
    });
}

impl Bootstrap for ProcessBootstrap {
    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }

    fn is_supported(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { true })
    }

    fn is_axs_running(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let probe = TcpStream::connect((self.host.as_str(), self.port));
            matches!(
                tokio::time::timeout(Duration::from_millis(500), probe).await,
                Ok(Ok(_))
            )
        })
    }

    fn start_axs(
        &self,
        installing: bool,
        log: LogSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BootstrapError>> + Send + '_>> {
        Box::pin(async move {
            let command = self.server_command.as_deref().ok_or_else(|| {
                BootstrapError::StartFailed("no server_command configured".to_string())
            })?;

            let mut slot = self.child.lock();
            if let Some(child) = slot.as_mut() {
                if matches!(child.try_wait(), Ok(None)) {
                    tracing::debug!("Shell server process already running");
                    return Ok(());
                }
            }

            tracing::info!(command, installing, "Starting shell server");
            *slot = Some(Self::spawn_shell(command, &log)?);
            Ok(())
        })
    }

    fn install(
        &self,
        log: LogSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BootstrapError>> + Send + '_>> {
        Box::pin(async move {
            let command = self.install_command.as_deref().ok_or_else(|| {
                BootstrapError::InstallFailed("no install_command configured".to_string())
            })?;

            tracing::info!(command, "Installing shell environment");
            let mut child = Self::spawn_shell(command, &log)?;
            let status = child.wait().await?;
            if !status.success() {
                return Err(BootstrapError::InstallFailed(format!(
                    "install command exited with {}",
                    status
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBootstrap;

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_running_polls_until_ready() {
        let bootstrap = FakeBootstrap::default();
        bootstrap.running_after_polls(3);

        assert!(wait_until_running(&bootstrap, 10, Duration::from_millis(1000)).await);
        assert_eq!(bootstrap.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_running_gives_up() {
        let bootstrap = FakeBootstrap::default();
        bootstrap.never_running();

        let started = tokio::time::Instant::now();
        assert!(!wait_until_running(&bootstrap, 10, Duration::from_millis(1000)).await);
        assert_eq!(bootstrap.polls(), 10);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_process_bootstrap_without_command() {
        let bootstrap = ProcessBootstrap::new("127.0.0.1", 9, None, None);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            bootstrap.start_axs(false, tx.clone()).await,
            Err(BootstrapError::StartFailed(_))
        ));
        assert!(matches!(
            bootstrap.install(tx).await,
            Err(BootstrapError::InstallFailed(_))
        ));
        assert!(bootstrap.is_installed().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_bootstrap_install_forwards_output() {
        let bootstrap =
            ProcessBootstrap::new("127.0.0.1", 9, None, Some("echo fetching rootfs".to_string()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bootstrap.install(tx).await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, LogLine::Info("stdout fetching rootfs".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_bootstrap_install_failure() {
        let bootstrap = ProcessBootstrap::new("127.0.0.1", 9, None, Some("exit 3".to_string()));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            bootstrap.install(tx).await,
            Err(BootstrapError::InstallFailed(_))
        ));
    }
}
