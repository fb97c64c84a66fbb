//! REST control plane of the local shell server.
//!
//! Allocation returns the pid that names the data-plane socket. Resize and
//! terminate are fire-and-forget from the session's point of view, but the
//! errors are still surfaced here so callers can log them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use protocol::{parse_pid, ProtocolError, Result, ServerEndpoint, TerminalSize};
use reqwest::Client;

/// Process management calls against the shell server.
///
/// Abstracted so sessions can be driven against a fake in tests.
pub trait ControlPlane: Send + Sync {
    /// Start a shell process sized `size` and return its pid.
    fn allocate(
        &self,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    fn resize<'a>(
        &'a self,
        pid: &'a str,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn terminate<'a>(
        &'a self,
        pid: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Data-plane URL for `pid`.
    fn socket_url(&self, pid: &str) -> String;
}

/// [`ControlPlane`] speaking HTTP to the server at `endpoint`.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    endpoint: ServerEndpoint,
}

impl HttpControlPlane {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    async fn post(&self, url: String, body: Option<TerminalSize>) -> Result<String> {
        let mut request = self.client.post(&url);
        if let Some(size) = body {
            request = request.json(&size);
        }

        let res = request
            .send()
            .await
            .map_err(|e| ProtocolError::Request(format!("{}: {}", url, e)))?;

        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProtocolError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

impl ControlPlane for HttpControlPlane {
    fn allocate(
        &self,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let body = self.post(self.endpoint.terminals_url(), Some(size)).await?;
            let pid = parse_pid(&body)?;
            tracing::debug!(pid = %pid, cols = size.cols, rows = size.rows, "Allocated terminal");
            Ok(pid)
        })
    }

    fn resize<'a>(
        &'a self,
        pid: &'a str,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.post(self.endpoint.resize_url(pid), Some(size)).await?;
            Ok(())
        })
    }

    fn terminate<'a>(
        &'a self,
        pid: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.post(self.endpoint.terminate_url(pid), None).await?;
            Ok(())
        })
    }

    fn socket_url(&self, pid: &str) -> String {
        self.endpoint.socket_url(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_uses_endpoint() {
        let control = HttpControlPlane::new(ServerEndpoint::new("127.0.0.1", 4000));
        assert_eq!(control.socket_url("99"), "ws://127.0.0.1:4000/terminals/99");
        assert_eq!(control.endpoint().port, 4000);
    }

    #[tokio::test]
    async fn test_allocate_against_closed_port_is_request_error() {
        // Port 9 (discard) is not expected to be listening on loopback.
        let control = HttpControlPlane::new(ServerEndpoint::new("127.0.0.1", 9));
        let err = control.allocate(TerminalSize::default()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Request(_)));
    }
}
