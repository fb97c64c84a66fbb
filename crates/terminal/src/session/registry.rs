//! Registry of open terminal sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::bootstrap::LogLine;
use crate::engine::RenderEngine;
use crate::touch::{Rect, SurfaceGeometry, TouchEffect, TouchInput};

use super::debounce::Debouncer;
use super::terminal::{SessionServices, SessionSettings, TerminalSession};
use super::{Result, SessionError, SessionEvent, WriteOrigin};

const CONTAINER_DEBOUNCE: Duration = Duration::from_millis(200);
const BOTTOM_ANCHOR_DELAY: Duration = Duration::from_millis(100);
const KEYBOARD_SETTLE: Duration = Duration::from_millis(150);
const BOTTOM_SLACK_ROWS: usize = 5;
const EVENT_CAPACITY: usize = 256;

const LOCAL_BANNER: &str = "Local terminal mode - ready for output\r\n";
const INSTALL_NAME: &str = "Terminal Installation";

/// The element a session renders into.
pub trait Container: Send + Sync {
    /// Container bounds in screen coordinates.
    fn bounds(&self) -> Rect;

    /// Bounds of the terminal surface inside the container.
    fn surface_bounds(&self) -> Rect;

    fn screen_width(&self) -> f64;

    /// Detach the container from the host UI.
    fn remove(&self);

    fn geometry(&self) -> SurfaceGeometry {
        SurfaceGeometry {
            terminal: self.surface_bounds(),
            container: self.bounds(),
            screen_width: self.screen_width(),
        }
    }
}

/// Lifecycle notifications for the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    TitleChanged { id: String, title: String },
    ProcessExited { id: String, message: String },
    Error { id: String, message: String },
    Closed { id: String },
}

/// Parameters for [`SessionRegistry::create_session`].
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Tab name. Defaults to "Terminal N".
    pub name: Option<String>,
    pub networked: bool,
    /// Attach to an existing server process instead of allocating one.
    pub pid: Option<String>,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self {
            name: None,
            networked: true,
            pid: None,
        }
    }
}

impl SessionRequest {
    pub fn local() -> Self {
        Self {
            networked: false,
            ..Default::default()
        }
    }
}

struct Registered {
    name: String,
    number: u64,
    session: TerminalSession,
    container: Arc<dyn Container>,
    refit: Debouncer,
}

/// Open sessions keyed by id.
pub struct SessionRegistry {
    services: SessionServices,
    defaults: SessionSettings,
    sessions: DashMap<String, Registered>,
    counter: AtomicU64,
    active: Mutex<Option<String>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl SessionRegistry {
    pub fn new(services: SessionServices, defaults: SessionSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            services,
            defaults,
            sessions: DashMap::new(),
            counter: AtomicU64::new(0),
            active: Mutex::new(None),
            events,
        })
    }

    /// Create, mount and connect a session inside `container`.
    ///
    /// On any failure the half-built session is disposed and the container
    /// removed.
    pub async fn create_session(
        self: &Arc<Self>,
        request: SessionRequest,
        engine: Box<dyn RenderEngine>,
        container: Arc<dyn Container>,
    ) -> Result<TerminalSession> {
        if request.networked {
            self.check_environment().await?;
        }

        let number = self.next_number();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("Terminal {}", number));
        let settings = SessionSettings {
            networked: request.networked,
            ..self.defaults.clone()
        };
        let session = TerminalSession::create(
            format!("terminal_{}", number),
            engine,
            settings,
            self.services.clone(),
        );

        if let Err(e) = self.start(&session, &request, container.as_ref()).await {
            tracing::error!(session_id = %session.id(), error = %e, "Failed to create terminal");
            session.dispose().await;
            container.remove();
            return Err(e);
        }

        self.register(number, name, session, container).await
    }

    /// Run the environment installer, showing its output in a local
    /// session.
    pub async fn install_environment(
        self: &Arc<Self>,
        engine: Box<dyn RenderEngine>,
        container: Arc<dyn Container>,
    ) -> Result<TerminalSession> {
        let bootstrap = Arc::clone(&self.services.bootstrap);
        if !bootstrap.is_supported().await {
            return Err(SessionError::Unsupported);
        }

        let number = self.next_number();
        let settings = SessionSettings {
            networked: false,
            ..self.defaults.clone()
        };
        let session = TerminalSession::create(
            format!("install_terminal_{}", number),
            engine,
            settings,
            self.services.clone(),
        );
        if let Err(e) = session.mount() {
            session.dispose().await;
            container.remove();
            return Err(e);
        }
        session.attach_touch(container.geometry());
        let session = self
            .register(number, INSTALL_NAME.to_string(), session, container)
            .await?;

        session.write(
            "Installing terminal environment...\r\nThis may take a few minutes.\r\n\r\n",
            WriteOrigin::Trusted,
        );

        let (log, mut output) = mpsc::unbounded_channel();
        let echo = session.clone();
        let render = async move {
            while let Some(line) = output.recv().await {
                echo.write(&install_line(&line), WriteOrigin::Trusted);
            }
        };
        let (outcome, ()) = tokio::join!(bootstrap.install(log), render);

        let id = session.id();
        match outcome {
            Ok(()) => {
                tracing::info!(session_id = %id, "Terminal environment installed");
                session.write(
                    "\r\nInstallation completed successfully.\r\n",
                    WriteOrigin::Trusted,
                );
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "Terminal installation failed");
                session.write(
                    &install_line(&LogLine::Error(e.to_string())),
                    WriteOrigin::Trusted,
                );
                self.emit(RegistryEvent::Error {
                    id,
                    message: e.to_string(),
                });
            }
        }
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Option<TerminalSession> {
        self.sessions.get(id).map(|entry| entry.session.clone())
    }

    /// Every session in creation order.
    pub fn get_all(&self) -> Vec<TerminalSession> {
        let mut all: Vec<(u64, TerminalSession)> = self
            .sessions
            .iter()
            .map(|entry| (entry.number, entry.session.clone()))
            .collect();
        all.sort_by_key(|(number, _)| *number);
        all.into_iter().map(|(_, session)| session).collect()
    }

    pub fn name(&self, id: &str) -> Option<String> {
        self.sessions.get(id).map(|entry| entry.name.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Write on behalf of an external caller. Unknown ids are ignored.
    pub fn write(&self, id: &str, data: &str) -> bool {
        match self.get_session(id) {
            Some(session) => {
                session.write(data, WriteOrigin::External);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, id: &str) -> bool {
        match self.get_session(id) {
            Some(session) => {
                session.clear();
                true
            }
            None => false,
        }
    }

    /// Dispose a session and drop its entry. Returns false if it was
    /// already gone.
    pub async fn close(&self, id: &str) -> bool {
        let Some((_, entry)) = self.sessions.remove(id) else {
            return false;
        };

        entry.refit.cancel();
        entry.session.dispose().await;
        entry.container.remove();
        {
            let mut active = self.active.lock();
            if active.as_deref() == Some(id) {
                *active = None;
            }
        }

        tracing::info!(session_id = %id, name = %entry.name, "Closed terminal session");
        self.emit(RegistryEvent::Closed { id: id.to_string() });
        true
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    /// The container of `id` changed size. Re-fits after the resize
    /// observer settles.
    pub fn container_resized(&self, id: &str) {
        let Some(entry) = self.sessions.get(id) else {
            return;
        };
        let session = entry.session.clone();
        let container = Arc::clone(&entry.container);

        entry.refit.schedule(async move {
            session.set_touch_geometry(container.geometry());
            let pinned = session.with_engine(|engine| pinned_to_bottom(engine));
            session.fit();
            if pinned {
                tokio::time::sleep(BOTTOM_ANCHOR_DELAY).await;
                session.with_engine(|engine| engine.scroll_to_bottom());
            }
        });
    }

    /// The soft keyboard opened or closed.
    pub async fn handle_keyboard_resize(&self) {
        let pinned: Vec<(TerminalSession, bool)> = self
            .get_all()
            .into_iter()
            .map(|session| {
                let pinned = session.with_engine(|engine| pinned_to_bottom(engine));
                (session, pinned)
            })
            .collect();

        tokio::time::sleep(KEYBOARD_SETTLE).await;

        for (session, pinned) in pinned {
            session.fit();
            if pinned {
                session.with_engine(|engine| engine.scroll_to_bottom());
            }
        }
    }

    /// Drop unprotected touch selections, re-fit and refocus the active
    /// tab.
    pub fn stabilize_terminals(&self, now: Instant) {
        for session in self.get_all() {
            session.clear_touch_selection(now);
            session.fit();
        }
        if let Some(session) = self.active().and_then(|id| self.get_session(&id)) {
            session.focus();
        }
    }

    pub fn set_active(&self, id: &str) -> bool {
        if !self.sessions.contains_key(id) {
            return false;
        }
        *self.active.lock() = Some(id.to_string());
        true
    }

    pub fn active(&self) -> Option<String> {
        self.active.lock().clone()
    }

    pub fn handle_touch(&self, id: &str, input: TouchInput, now: Instant) -> Vec<TouchEffect> {
        match self.get_session(id) {
            Some(session) => session.handle_touch(input, now),
            None => Vec::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    fn next_number(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn check_environment(&self) -> Result<()> {
        let bootstrap = &self.services.bootstrap;
        if bootstrap.is_installed().await {
            return Ok(());
        }
        if !bootstrap.is_supported().await {
            return Err(SessionError::Unsupported);
        }
        Err(SessionError::NotInstalled)
    }

    async fn start(
        &self,
        session: &TerminalSession,
        request: &SessionRequest,
        container: &dyn Container,
    ) -> Result<()> {
        session.mount()?;
        session.attach_touch(container.geometry());

        if request.networked {
            session.connect(request.pid.clone()).await
        } else {
            session.write(LOCAL_BANNER, WriteOrigin::Trusted);
            Ok(())
        }
    }

    async fn register(
        self: &Arc<Self>,
        number: u64,
        name: String,
        session: TerminalSession,
        container: Arc<dyn Container>,
    ) -> Result<TerminalSession> {
        let id = session.id();
        let inserted = match self.sessions.entry(id.clone()) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(slot) => {
                slot.insert(Registered {
                    name: name.clone(),
                    number,
                    session: session.clone(),
                    container: Arc::clone(&container),
                    refit: Debouncer::new(CONTAINER_DEBOUNCE),
                });
                true
            }
        };

        if !inserted {
            session.dispose().await;
            container.remove();
            return Err(SessionError::DuplicateSession(id));
        }

        self.spawn_watcher(id.clone(), &session);
        *self.active.lock() = Some(id.clone());
        tracing::info!(session_id = %id, name = %name, "Created terminal session");
        Ok(session)
    }

    fn rename(&self, id: &str, title: &str) {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return;
        };
        let display = format!("Terminal {} - {}", entry.number, title);
        entry.name = display.clone();
        drop(entry);

        self.emit(RegistryEvent::TitleChanged {
            id: id.to_string(),
            title: display,
        });
    }

    fn spawn_watcher(self: &Arc<Self>, id: String, session: &TerminalSession) {
        let mut events = session.subscribe();
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session_id = %id, skipped, "Session watcher lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(registry) = registry.upgrade() else {
                    break;
                };

                match event {
                    SessionEvent::TitleChanged(title) => registry.rename(&id, &title),
                    SessionEvent::ProcessExit(exit) => {
                        registry.emit(RegistryEvent::ProcessExited {
                            id: id.clone(),
                            message: exit.describe(),
                        });
                        registry.close(&id).await;
                        break;
                    }
                    SessionEvent::Error(message) => {
                        registry.emit(RegistryEvent::Error {
                            id: id.clone(),
                            message,
                        });
                        registry.close(&id).await;
                        break;
                    }
                    _ => {}
                }
            }
        });
    }
}

/// Whether the viewport should stay glued to the bottom across a refit.
fn pinned_to_bottom(engine: &dyn RenderEngine) -> bool {
    let rows = engine.rows() as usize;
    let length = engine.buffer_length();
    length > rows * 2 && engine.viewport_y() + rows + BOTTOM_SLACK_ROWS >= length
}

fn install_line(line: &LogLine) -> String {
    match line {
        LogLine::Info(text) => format!("{}\r\n", strip_stream_prefix(text)),
        LogLine::Error(text) => {
            format!("\x1b[31mError: {}\x1b[0m\r\n", strip_stream_prefix(text))
        }
    }
}

fn strip_stream_prefix(line: &str) -> &str {
    line.strip_prefix("stdout ")
        .or_else(|| line.strip_prefix("stderr "))
        .unwrap_or(line)
}
