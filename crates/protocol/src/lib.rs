//! # TouchTerm Protocol Library
//!
//! Wire definitions shared by the terminal client and the local shell server.
//!
//! ## Overview
//!
//! The local server exposes two surfaces:
//!
//! - **Control plane**: plain HTTP `POST` endpoints that allocate, resize and
//!   terminate shell processes
//! - **Data plane**: one WebSocket per process carrying raw terminal bytes in
//!   both directions, with JSON control frames mixed into the text channel
//!
//! ```text
//! POST /terminals                 {cols,rows}  -> "<pid>"
//! POST /terminals/<pid>/resize    {cols,rows}
//! POST /terminals/<pid>/terminate
//! WS   /terminals/<pid>           raw bytes | {"type":"exit","data":{..}}
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{classify_text_frame, ServerEndpoint};
//!
//! let endpoint = ServerEndpoint::default();
//! assert_eq!(endpoint.socket_url("42"), "ws://localhost:8767/terminals/42");
//!
//! let exit = classify_text_frame(r#"{"type":"exit","data":{"exit_code":0}}"#).unwrap();
//! assert_eq!(exit.describe(), "Process exited successfully (code 0)");
//! assert!(classify_text_frame("plain shell output").is_none());
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Control-plane bodies and control frames
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    classify_text_frame, parse_pid, ControlFrame, ExitData, ExitSignal, ServerEndpoint,
    TerminalSize, DEFAULT_HOST, DEFAULT_PORT,
};
