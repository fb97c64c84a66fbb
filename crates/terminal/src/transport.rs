//! WebSocket data plane for one shell process.
//!
//! Outbound traffic goes through an unbounded queue drained by a single
//! writer task, so a [`Outbound::Flush`] marker is acknowledged only after
//! every write queued before it has been handed to the socket. Inbound text
//! frames are checked for control frames before being passed through.

use futures_util::{SinkExt, StreamExt};
use protocol::{classify_text_frame, ExitData, ProtocolError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tokio_util::sync::CancellationToken;

/// Commands for the writer task.
#[derive(Debug)]
pub enum Outbound {
    Data(String),
    /// Acknowledged once everything queued earlier has been sent.
    Flush(oneshot::Sender<()>),
    Close,
}

/// Events produced by the reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Terminal output to render.
    Output(Vec<u8>),
    Exit(ExitData),
    Closed,
    Error(String),
}

/// Sending half of an open connection.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    pub fn send(&self, data: String) -> bool {
        self.tx.send(Outbound::Data(data)).is_ok()
    }

    /// Resolves once earlier writes have left the queue, or immediately if
    /// the writer is gone.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Outbound::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Map a received text frame to an inbound event. Exit frames are never
/// passed through as output.
pub fn route_text(text: String) -> Inbound {
    match classify_text_frame(&text) {
        Some(exit) => Inbound::Exit(exit),
        None => Inbound::Output(text.into_bytes()),
    }
}

/// Open the socket at `url` and spawn its reader and writer tasks.
///
/// Both tasks stop when `cancel` fires. The inbound channel ends after a
/// `Closed` or `Error` event.
pub async fn connect(
    url: &str,
    cancel: CancellationToken,
) -> Result<(TransportHandle, mpsc::UnboundedReceiver<Inbound>)> {
    tracing::info!("Connecting to terminal socket: {}", url);

    let (ws_stream, _) = connect_async(url).await.map_err(|e| match e {
        WsError::Io(io_err) => ProtocolError::ConnectionClosed(io_err.to_string()),
        _ => ProtocolError::ConnectionClosed(format!("WebSocket connection failed: {}", e)),
    })?;

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();

    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = ws_sink.close().await;
                    break;
                }
                command = outbound_rx.recv() => match command {
                    Some(Outbound::Data(data)) => {
                        if let Err(e) = ws_sink.send(WsMessage::Text(data)).await {
                            tracing::error!("failed to send terminal input: {}", e);
                            break;
                        }
                    }
                    Some(Outbound::Flush(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_sink.close().await;
                        break;
                    }
                },
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = ws_stream.next() => frame,
            };

            let event = match frame {
                Some(Ok(WsMessage::Text(text))) => route_text(text),
                Some(Ok(WsMessage::Binary(bytes))) => Inbound::Output(bytes),
                Some(Ok(WsMessage::Close(_))) | None => {
                    let _ = inbound_tx.send(Inbound::Closed);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let _ = inbound_tx.send(Inbound::Error(e.to_string()));
                    break;
                }
            };

            if inbound_tx.send(event).is_err() {
                break;
            }
        }
    });

    Ok((TransportHandle { tx: outbound_tx }, inbound_rx))
}
