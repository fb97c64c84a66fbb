//! TouchTerm
//!
//! Runs shell sessions from the local shell server in the current terminal.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use terminal::config::{default_config_path, Config};
use terminal::control::{ControlPlane, HttpControlPlane};
use terminal::protocol::TerminalSize;
use terminal::session::{
    Container, SessionEvent, SessionRegistry, SessionRequest, SessionServices, WriteOrigin,
};
use terminal::touch::Rect;
use terminal::{CommandSecurityFilter, MemoryClipboard, ProcessBootstrap, StdioEngine};
use tokio::sync::{broadcast, mpsc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "touchterm.log";
const SIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);
const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// TouchTerm - terminal sessions over a local shell server.
#[derive(Parser, Debug)]
#[command(name = "touchterm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open a session in this terminal
    Open {
        /// Attach to an existing shell process instead of allocating one
        #[arg(long, value_name = "ID", conflicts_with = "local")]
        session: Option<String>,

        /// Render locally without a shell server
        #[arg(long)]
        local: bool,
    },

    /// Run data through the command security filter
    Check {
        /// Data as a plugin would write it
        data: String,
    },

    /// Terminate a shell process on the server
    Kill {
        /// Process id returned by the server
        session_id: String,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file instead
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    let _guard = init_tracing(&config, cli.verbose)?;
    tracing::info!("TouchTerm starting...");

    match cli.command {
        Commands::Open { session, local } => run_open(config, session, local).await,
        Commands::Check { data } => {
            let verdict = CommandSecurityFilter::new().validate(&data);
            match verdict.reason {
                Some(reason) if !verdict.allowed => {
                    eprintln!("blocked: {}", reason);
                    std::process::exit(1);
                }
                _ if verdict.sanitized_data != data => {
                    println!("allowed (truncated)");
                }
                _ => println!("allowed"),
            }
            Ok(())
        }
        Commands::Kill { session_id } => {
            let control = HttpControlPlane::new(config.server.endpoint());
            control
                .terminate(&session_id)
                .await
                .with_context(|| format!("Failed to terminate {}", session_id))?;
            println!("Terminated {}", session_id);
            Ok(())
        }
        Commands::Config { init } => {
            if init {
                let path = cli.config.unwrap_or_else(default_config_path);
                if path.exists() {
                    anyhow::bail!("Config file already exists: {}", path.display());
                }
                Config::default().save(&path)?;
                println!("Wrote {}", path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}

/// Log to a file under the data directory. The terminal itself belongs to
/// the session.
fn init_tracing(config: &Config, verbose: bool) -> Result<WorkerGuard> {
    let data_dir = &config.logging.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let level = if verbose {
        "debug"
    } else {
        config.logging.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(data_dir, LOG_FILE));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn host_size() -> Option<(u16, u16)> {
    crossterm::terminal::size().ok()
}

/// The host terminal window, one unit per cell.
struct TtyContainer;

impl Container for TtyContainer {
    fn bounds(&self) -> Rect {
        let (cols, rows) = host_size().unwrap_or(FALLBACK_SIZE);
        Rect::new(0.0, 0.0, cols as f64, rows as f64)
    }

    fn surface_bounds(&self) -> Rect {
        self.bounds()
    }

    fn screen_width(&self) -> f64 {
        self.bounds().width
    }

    fn remove(&self) {}
}

struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

/// Read stdin on a plain thread; a blocked read must not hold up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

async fn run_open(config: Config, pid: Option<String>, local: bool) -> Result<()> {
    let (cols, rows) = host_size().unwrap_or(FALLBACK_SIZE);

    let services = SessionServices {
        control: Arc::new(HttpControlPlane::new(config.server.endpoint())),
        bootstrap: Arc::new(ProcessBootstrap::new(
            config.server.host.clone(),
            config.server.port,
            config.server.server_command.clone(),
            config.server.install_command.clone(),
        )),
        clipboard: Arc::new(MemoryClipboard::new()),
    };
    let mut defaults = config.session_settings();
    defaults.size = TerminalSize::new(cols, rows);
    let registry = SessionRegistry::new(services, defaults);

    let engine = StdioEngine::new(io::stdout(), cols, rows).with_size_probe(host_size);
    let request = SessionRequest {
        networked: !local,
        pid,
        ..Default::default()
    };
    let session = registry
        .create_session(request, Box::new(engine), Arc::new(TtyContainer))
        .await
        .context("Failed to open terminal session")?;
    let mut events = session.subscribe();

    let raw_mode = if io::stdin().is_terminal() {
        Some(RawMode::enable()?)
    } else {
        None
    };
    let mut input = spawn_stdin_reader();
    let mut size_poll = tokio::time::interval(SIZE_POLL_INTERVAL);
    let mut last_size = (cols, rows);
    let mut stdin_open = true;
    let mut farewell = None;

    loop {
        tokio::select! {
            chunk = input.recv(), if stdin_open => match chunk {
                Some(chunk) => session.write(&chunk, WriteOrigin::Trusted),
                None if local => break,
                None => stdin_open = false,
            },
            _ = size_poll.tick() => {
                if let Some(size) = host_size().filter(|size| *size != last_size) {
                    last_size = size;
                    session.resize(size.0, size.1);
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::ProcessExit(exit)) => {
                    farewell = Some(exit.describe());
                    break;
                }
                Ok(SessionEvent::Disconnected) => break,
                Ok(SessionEvent::Error(message)) => {
                    farewell = Some(format!("Connection error: {}", message));
                    break;
                }
                Ok(SessionEvent::Warning(message)) => tracing::warn!("{}", message),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    registry.shutdown().await;
    drop(raw_mode);
    if let Some(message) = farewell {
        eprintln!("\r\n{}", message);
    }
    tracing::info!("TouchTerm exiting");
    Ok(())
}
