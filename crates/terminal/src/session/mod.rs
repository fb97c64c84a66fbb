//! Terminal sessions and their registry.
//!
//! A session owns one render engine, one data-plane connection and the
//! resize bookkeeping that keeps the server-side grid in step with the
//! local one. The registry creates sessions, tracks their containers and
//! tears them down.

pub mod debounce;
pub mod keys;
pub mod registry;
pub mod resize;
mod terminal;

use protocol::{ExitData, ProtocolError};
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::engine::EngineError;

pub use debounce::Debouncer;
pub use keys::{KeyAction, KeyBindings, KeyChord};
pub use registry::{Container, RegistryEvent, SessionRegistry, SessionRequest};
pub use resize::{ResizeDecision, ResizeTracker};
pub use terminal::{SessionServices, SessionSettings, TerminalSession};

/// Errors that can occur while creating or driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The shell environment has not been installed.
    #[error("terminal environment is not installed")]
    NotInstalled,

    /// The device cannot host the shell environment.
    #[error("Terminal is not supported on this device architecture")]
    Unsupported,

    /// A server operation was attempted on a local session.
    #[error("session {0} is local and has no server process")]
    LocalMode(String),

    /// Neither rendering surface could be attached.
    #[error("failed to attach rendering surface: {0}")]
    SurfaceNotAttached(#[from] EngineError),

    /// Control or data plane failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Environment provisioning failed.
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// A session with this id is already registered.
    #[error("session already exists: {0}")]
    DuplicateSession(String),

    /// The session was disposed.
    #[error("session disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Data-plane connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Who issued a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The terminal UI itself: keystrokes, paste, installer output.
    Trusted,
    /// Plugins and other external callers. Always filtered.
    External,
}

/// Notifications broadcast by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Connected,
    Disconnected,
    Error(String),
    ProcessExit(ExitData),
    TitleChanged(String),
    Bell,
    /// Non-fatal problem the user should see, such as a blocked write.
    Warning(String),
    FontSizeChanged(u16),
    HapticFeedback,
}
