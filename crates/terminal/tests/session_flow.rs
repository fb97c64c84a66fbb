//! End-to-end session flow against an in-process shell server.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{
    ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    Path, State,
};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use protocol::{ControlFrame, ExitData, ServerEndpoint, TerminalSize};
use terminal::session::{
    Container, ConnectionState, RegistryEvent, SessionRegistry, SessionRequest, SessionServices,
    SessionSettings, WriteOrigin,
};
use terminal::touch::Rect;
use terminal::{HttpControlPlane, MemoryClipboard, ProcessBootstrap, StdioEngine};
use tokio::sync::broadcast;

const ALLOCATED_PID: &str = "1234";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Allocate(TerminalSize),
    Resize(String, TerminalSize),
    Terminate(String),
}

#[derive(Clone, Default)]
struct ServerState {
    calls: Arc<Mutex<Vec<Call>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl ServerState {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

async fn allocate(State(state): State<ServerState>, Json(size): Json<TerminalSize>) -> String {
    state.calls.lock().push(Call::Allocate(size));
    ALLOCATED_PID.to_string()
}

async fn resize(
    State(state): State<ServerState>,
    Path(pid): Path<String>,
    Json(size): Json<TerminalSize>,
) -> &'static str {
    state.calls.lock().push(Call::Resize(pid, size));
    "ok"
}

async fn terminate(State(state): State<ServerState>, Path(pid): Path<String>) -> &'static str {
    state.calls.lock().push(Call::Terminate(pid));
    "ok"
}

async fn socket(
    State(state): State<ServerState>,
    Path(pid): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_shell(socket, state, pid))
}

/// Echoes input. `exit` ends the process with code 3, `bye` drops the
/// socket without an exit frame.
async fn serve_shell(mut socket: WebSocket, state: ServerState, pid: String) {
    if socket
        .send(WsMessage::Text(format!("welcome to {}\r\n", pid)))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        state.received.lock().push(text.clone());

        match text.as_str() {
            "exit\n" => {
                let frame = ControlFrame::Exit(ExitData::code(3)).to_json().unwrap();
                let _ = socket.send(WsMessage::Text(frame)).await;
                let _ = socket.send(WsMessage::Close(None)).await;
                break;
            }
            "bye\n" => {
                let _ = socket.send(WsMessage::Close(None)).await;
                break;
            }
            _ => {
                let _ = socket.send(WsMessage::Text(format!("echo: {}", text))).await;
            }
        }
    }
}

async fn spawn_server() -> (u16, ServerState) {
    let state = ServerState::default();
    let router = Router::new()
        .route("/terminals", post(allocate))
        .route("/terminals/:pid", get(socket))
        .route("/terminals/:pid/resize", post(resize))
        .route("/terminals/:pid/terminate", post(terminate))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (port, state)
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct TestContainer;

impl Container for TestContainer {
    fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, 800.0, 480.0)
    }

    fn surface_bounds(&self) -> Rect {
        self.bounds()
    }

    fn screen_width(&self) -> f64 {
        800.0
    }

    fn remove(&self) {}
}

fn registry(port: u16) -> Arc<SessionRegistry> {
    let services = SessionServices {
        control: Arc::new(HttpControlPlane::new(ServerEndpoint::new("127.0.0.1", port))),
        bootstrap: Arc::new(ProcessBootstrap::new("127.0.0.1", port, None, None)),
        clipboard: Arc::new(MemoryClipboard::new()),
    };
    SessionRegistry::new(services, SessionSettings::default())
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_event(events: &mut broadcast::Receiver<RegistryEvent>) -> RegistryEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("registry event")
        .expect("registry channel open")
}

#[tokio::test]
async fn test_allocate_connect_and_exit() {
    let (port, server) = spawn_server().await;
    let registry = registry(port);
    let mut events = registry.subscribe();
    let output = SharedBuffer::default();

    let session = registry
        .create_session(
            SessionRequest::default(),
            Box::new(StdioEngine::new(output.clone(), 80, 24)),
            Arc::new(TestContainer),
        )
        .await
        .unwrap();

    assert_eq!(session.id(), ALLOCATED_PID);
    assert_eq!(session.state(), ConnectionState::Open);
    assert_eq!(
        server.calls().first(),
        Some(&Call::Allocate(TerminalSize::new(80, 24)))
    );
    eventually("welcome banner", || output.text().contains("welcome to 1234")).await;

    // Keystrokes go to the shell, and its echo comes back as output.
    session.write("ls\n", WriteOrigin::Trusted);
    eventually("echo", || output.text().contains("echo: ls\n")).await;

    // Plugin writes are filtered before they reach the socket.
    assert!(registry.write(ALLOCATED_PID, "rm -rf /\n"));
    assert!(registry.write(ALLOCATED_PID, "pwd\n"));
    eventually("filtered write", || server.received().contains(&"pwd\n".to_string())).await;
    assert!(!server.received().contains(&"rm -rf /\n".to_string()));

    session.resize(100, 40);
    eventually("resize", || {
        server
            .calls()
            .contains(&Call::Resize(ALLOCATED_PID.to_string(), TerminalSize::new(100, 40)))
    })
    .await;

    session.write("exit\n", WriteOrigin::Trusted);
    assert_eq!(
        next_event(&mut events).await,
        RegistryEvent::ProcessExited {
            id: ALLOCATED_PID.to_string(),
            message: "Process exited with code 3".to_string(),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        RegistryEvent::Closed {
            id: ALLOCATED_PID.to_string()
        }
    );

    assert!(registry.is_empty());
    assert!(session.is_disposed());
    assert!(server
        .calls()
        .contains(&Call::Terminate(ALLOCATED_PID.to_string())));
    assert!(!output.text().contains("\"type\":\"exit\""));
}

#[tokio::test]
async fn test_attach_to_existing_process() {
    let (port, server) = spawn_server().await;
    let registry = registry(port);
    let output = SharedBuffer::default();

    let session = registry
        .create_session(
            SessionRequest {
                pid: Some("77".to_string()),
                ..Default::default()
            },
            Box::new(StdioEngine::new(output.clone(), 80, 24)),
            Arc::new(TestContainer),
        )
        .await
        .unwrap();

    assert_eq!(session.id(), "77");
    eventually("welcome banner", || output.text().contains("welcome to 77")).await;
    assert!(server.calls().is_empty());

    registry.close("77").await;
    assert_eq!(server.calls(), vec![Call::Terminate("77".to_string())]);
}

#[tokio::test]
async fn test_server_hangup_disconnects() {
    let (port, _server) = spawn_server().await;
    let registry = registry(port);

    let session = registry
        .create_session(
            SessionRequest::default(),
            Box::new(StdioEngine::new(SharedBuffer::default(), 80, 24)),
            Arc::new(TestContainer),
        )
        .await
        .unwrap();

    session.write("bye\n", WriteOrigin::Trusted);
    eventually("disconnect", || session.state() == ConnectionState::Closed).await;

    // A clean hangup leaves the tab open for the user to read.
    assert!(registry.get_session(ALLOCATED_PID).is_some());

    // Writes after the hangup render locally.
    session.write("still here\r\n", WriteOrigin::Trusted);
    registry.shutdown().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_local_session_needs_no_server() {
    let registry = registry(9);
    let output = SharedBuffer::default();

    let session = registry
        .create_session(
            SessionRequest::local(),
            Box::new(StdioEngine::new(output.clone(), 80, 24)),
            Arc::new(TestContainer),
        )
        .await
        .unwrap();

    assert_eq!(session.id(), "terminal_1");
    assert_eq!(output.text(), "Local terminal mode - ready for output\r\n");

    registry.write("terminal_1", "echo hi\r\n");
    assert!(output.text().ends_with("echo hi\r\n"));
}
