//! # TouchTerm Terminal Library
//!
//! Touch-first terminal sessions backed by a local shell server.
//!
//! ## Overview
//!
//! - **Sessions**: one render engine and one websocket data plane per
//!   session, with debounced resize forwarding and viewport easing
//! - **Registry**: creates, tracks and tears down sessions and their
//!   containers
//! - **Security filter**: blocklist screening for writes coming from plugins
//! - **Touch selection**: tap-hold word selection, handle drags and pinch
//!   zoom on top of any engine
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionRegistry                       │
//! │   ┌──────────────────┐        ┌──────────────────┐      │
//! │   │ TerminalSession  │  ...   │ TerminalSession  │      │
//! │   │  RenderEngine    │        │  RenderEngine    │      │
//! │   │  TouchSelection  │        │  TouchSelection  │      │
//! │   └────────┬─────────┘        └────────┬─────────┘      │
//! └────────────┼───────────────────────────┼────────────────┘
//!              │ REST (allocate/resize/terminate)
//!              │ WebSocket (output, input, exit frames)
//!        ┌─────▼───────────────────────────▼─────┐
//!        │          local shell server           │
//!        └───────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: sessions, registry, resize bookkeeping, key bindings
//! - [`security`]: command filter for external writes
//! - [`touch`]: touch selection controller
//! - [`engine`]: the render engine seam
//! - [`control`] / [`transport`]: REST control plane and websocket data plane
//! - [`bootstrap`]: installing and starting the shell server
//! - [`config`]: configuration loading and defaults

pub mod bootstrap;
pub mod clipboard;
pub mod config;
pub mod control;
pub mod engine;
pub mod options;
pub mod security;
pub mod session;
pub mod stdio;
pub mod touch;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;

pub use engine::{Addon, EngineError, EngineEvent, RenderEngine, SurfaceKind};

pub use security::{CommandSecurityFilter, RejectReason, Validation};

pub use session::{
    Container, ConnectionState, KeyAction, KeyChord, RegistryEvent, SessionError, SessionEvent,
    SessionRegistry, SessionRequest, SessionServices, SessionSettings, TerminalSession,
    WriteOrigin,
};

pub use touch::{TouchConfig, TouchEffect, TouchInput, TouchSelectionController};

pub use bootstrap::{Bootstrap, ProcessBootstrap};
pub use clipboard::{Clipboard, MemoryClipboard};
pub use control::{ControlPlane, HttpControlPlane};
pub use stdio::StdioEngine;
