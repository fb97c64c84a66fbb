//! Control-plane bodies and in-band control frames.
//!
//! Everything on the data plane is raw terminal output except text frames
//! whose `type` names a [`ControlFrame`]. Those are consumed by the client and
//! never rendered.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Host the local shell server listens on.
pub const DEFAULT_HOST: &str = "localhost";

/// Port the local shell server listens on.
pub const DEFAULT_PORT: u16 = 8767;

/// Body of the allocate and resize requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns.
    pub cols: u16,
    /// Number of rows.
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Signal that ended a process. Servers report either the number or the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExitSignal {
    Number(i32),
    Name(String),
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSignal::Number(n) => write!(f, "{}", n),
            ExitSignal::Name(name) => f.write_str(name),
        }
    }
}

/// Payload of an exit control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitData {
    /// Exit status if the process exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Terminating signal if the process was killed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ExitSignal>,
}

impl ExitData {
    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            signal: None,
        }
    }

    pub fn killed_by(signal: ExitSignal) -> Self {
        Self {
            exit_code: None,
            signal: Some(signal),
        }
    }

    /// Human readable summary. A signal takes precedence over the exit code.
    pub fn describe(&self) -> String {
        if let Some(signal) = &self.signal {
            return format!("Process terminated by signal {}", signal);
        }
        match self.exit_code {
            Some(0) => "Process exited successfully (code 0)".to_string(),
            Some(code) => format!("Process exited with code {}", code),
            None => "Process exited".to_string(),
        }
    }
}

/// JSON control frames the server interleaves with terminal output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ControlFrame {
    /// The shell process ended.
    Exit(ExitData),
}

impl ControlFrame {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Returns the exit payload if `text` is an exit control frame.
///
/// Any JSON object whose `type` is `"exit"` counts, whatever its `data`
/// holds. Fields that are missing or have the wrong shape are left unset.
/// Anything else, including JSON that merely looks similar, is terminal
/// output and yields `None`.
pub fn classify_text_frame(text: &str) -> Option<ExitData> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let Ok(Value::Object(mut frame)) = serde_json::from_str::<Value>(trimmed) else {
        return None;
    };
    if frame.get("type").and_then(Value::as_str) != Some("exit") {
        return None;
    }
    Some(exit_data_from(frame.remove("data")))
}

fn exit_data_from(data: Option<Value>) -> ExitData {
    let Some(Value::Object(data)) = data else {
        return ExitData::default();
    };
    let exit_code = data.get("exit_code").and_then(|code| match code.as_i64() {
        Some(code) => i32::try_from(code).ok(),
        None => code
            .as_f64()
            .filter(|code| code.fract() == 0.0 && code.abs() <= i32::MAX as f64)
            .map(|code| code as i32),
    });
    let signal = data
        .get("signal")
        .cloned()
        .and_then(|signal| serde_json::from_value(signal).ok());
    ExitData { exit_code, signal }
}

/// Parses the body returned by the allocate endpoint.
pub fn parse_pid(body: &str) -> Result<String> {
    let pid = body.trim();
    if pid.is_empty() || pid.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ProtocolError::InvalidSessionId(body.to_string()));
    }
    Ok(pid.to_string())
}

/// Address of the local shell server and the URLs derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn terminals_url(&self) -> String {
        format!("http://{}:{}/terminals", self.host, self.port)
    }

    pub fn resize_url(&self, pid: &str) -> String {
        format!("{}/{}/resize", self.terminals_url(), pid)
    }

    pub fn terminate_url(&self, pid: &str) -> String {
        format!("{}/{}/terminate", self.terminals_url(), pid)
    }

    pub fn socket_url(&self, pid: &str) -> String {
        format!("ws://{}:{}/terminals/{}", self.host, self.port, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_frame_with_code() {
        let data = classify_text_frame(r#"{"type":"exit","data":{"exit_code":2}}"#)
            .expect("exit frame");
        assert_eq!(data, ExitData::code(2));
        assert_eq!(data.describe(), "Process exited with code 2");
    }

    #[test]
    fn test_exit_frame_with_numeric_signal() {
        let data = classify_text_frame(r#"{"type":"exit","data":{"signal":9}}"#)
            .expect("exit frame");
        assert_eq!(data.signal, Some(ExitSignal::Number(9)));
        assert_eq!(data.describe(), "Process terminated by signal 9");
    }

    #[test]
    fn test_signal_wins_over_code() {
        let data = classify_text_frame(
            r#"{"type":"exit","data":{"exit_code":0,"signal":"SIGHUP"}}"#,
        )
        .expect("exit frame");
        assert_eq!(data.describe(), "Process terminated by signal SIGHUP");
    }

    #[test]
    fn test_success_description() {
        assert_eq!(
            ExitData::code(0).describe(),
            "Process exited successfully (code 0)"
        );
    }

    #[test]
    fn test_non_control_text_is_passthrough() {
        assert!(classify_text_frame("$ ls\r\n").is_none());
        assert!(classify_text_frame(r#"{"type":"resize","data":{}}"#).is_none());
        assert!(classify_text_frame(r#"{"exit_code":0}"#).is_none());
        assert!(classify_text_frame("{ broken").is_none());
    }

    #[test]
    fn test_exit_frame_without_usable_data() {
        for frame in [
            r#"{"type":"exit"}"#,
            r#"{"type":"exit","data":null}"#,
            r#"{"type":"exit","data":"gone"}"#,
            r#"{"type":"exit","data":{"exit_code":"1","signal":null}}"#,
        ] {
            assert_eq!(classify_text_frame(frame), Some(ExitData::default()), "{}", frame);
        }
        assert_eq!(
            classify_text_frame(r#"{"type":"exit"}"#).unwrap().describe(),
            "Process exited"
        );
    }

    #[test]
    fn test_exit_frame_with_loose_fields() {
        let data = classify_text_frame(r#"{"type":"exit","data":{"exit_code":-1.0}}"#)
            .expect("exit frame");
        assert_eq!(data, ExitData::code(-1));

        let data = classify_text_frame(
            r#"{"type":"exit","data":{"exit_code":1.5,"signal":"SIGTERM","pid":7}}"#,
        )
        .expect("exit frame");
        assert_eq!(data.exit_code, None);
        assert_eq!(data.signal, Some(ExitSignal::Name("SIGTERM".to_string())));
    }

    #[test]
    fn test_exit_frame_serializes_with_type_tag() {
        let json = ControlFrame::Exit(ExitData::code(1)).to_json().unwrap();
        assert_eq!(json, r#"{"type":"exit","data":{"exit_code":1}}"#);
    }

    #[test]
    fn test_parse_pid_trims_whitespace() {
        assert_eq!(parse_pid("  1234\n").unwrap(), "1234");
    }

    #[test]
    fn test_parse_pid_rejects_empty_and_paths() {
        assert!(matches!(
            parse_pid("   "),
            Err(ProtocolError::InvalidSessionId(_))
        ));
        assert!(parse_pid("12/../34").is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoint = ServerEndpoint::new("127.0.0.1", 9000);
        assert_eq!(endpoint.terminals_url(), "http://127.0.0.1:9000/terminals");
        assert_eq!(
            endpoint.resize_url("7"),
            "http://127.0.0.1:9000/terminals/7/resize"
        );
        assert_eq!(
            endpoint.terminate_url("7"),
            "http://127.0.0.1:9000/terminals/7/terminate"
        );
        assert_eq!(endpoint.socket_url("7"), "ws://127.0.0.1:9000/terminals/7");
    }

    #[test]
    fn test_terminal_size_body() {
        let json = serde_json::to_string(&TerminalSize::new(120, 40)).unwrap();
        assert_eq!(json, r#"{"cols":120,"rows":40}"#);
    }
}
