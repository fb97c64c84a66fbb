//! A single terminal session.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use protocol::{parse_pid, TerminalSize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{wait_until_running, Bootstrap, LogLine};
use crate::clipboard::Clipboard;
use crate::control::ControlPlane;
use crate::engine::{negotiate_surface, Addon, EngineEvent, RenderEngine, SearchOptions, SurfaceKind};
use crate::options::{
    clamp_font_size, OptionsPatch, TerminalOptions, ThemePatch, MAX_FONT_SIZE, MIN_FONT_SIZE,
};
use crate::security::CommandSecurityFilter;
use crate::touch::{
    SelectionMode, SurfaceGeometry, TouchConfig, TouchEffect, TouchInput, TouchSelectionController,
};
use crate::transport::{self, Inbound, TransportHandle};

use super::debounce::Debouncer;
use super::keys::{KeyAction, KeyBindings, KeyChord};
use super::resize::{ease_viewport, ResizeDecision, ResizeTracker, RESIZE_DEBOUNCE};
use super::{ConnectionState, Result, SessionError, SessionEvent, WriteOrigin};

const EVENT_CAPACITY: usize = 256;

/// External collaborators shared by every session.
#[derive(Clone)]
pub struct SessionServices {
    pub control: Arc<dyn ControlPlane>,
    pub bootstrap: Arc<dyn Bootstrap>,
    pub clipboard: Arc<dyn Clipboard>,
}

/// Creation-time settings of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub options: TerminalOptions,
    pub size: TerminalSize,
    /// Backed by a shell process on the server. Local sessions only render.
    pub networked: bool,
    pub touch: TouchConfig,
    /// Readiness polls after starting the shell server.
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub key_bindings: KeyBindings,
    /// Match flags for [`TerminalSession::search`]. `backward` is ignored.
    pub search: SearchOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            options: TerminalOptions::default(),
            size: TerminalSize::default(),
            networked: true,
            touch: TouchConfig::default(),
            poll_attempts: 10,
            poll_interval: Duration::from_secs(1),
            key_bindings: KeyBindings::default(),
            search: SearchOptions::default(),
        }
    }
}

struct Inner {
    local_id: String,
    settings: SessionSettings,
    services: SessionServices,
    filter: CommandSecurityFilter,
    options: Mutex<TerminalOptions>,
    state: Mutex<ConnectionState>,
    pid: Mutex<Option<String>>,
    engine: Mutex<Box<dyn RenderEngine>>,
    transport: Mutex<Option<TransportHandle>>,
    resize: Mutex<ResizeTracker>,
    resize_debounce: Debouncer,
    touch: Mutex<Option<TouchSelectionController>>,
    touch_timer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(timer) = self.touch_timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Handle to a terminal session. Clones share the same session.
///
/// Owns one render engine and at most one data-plane connection. Writes are
/// sent to the shell while connected and rendered locally otherwise.
#[derive(Clone)]
pub struct TerminalSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("networked", &self.is_networked())
            .finish()
    }
}

impl TerminalSession {
    /// Build a session around `engine`. Baseline addons are loaded here;
    /// an addon that fails to load is logged and skipped.
    pub fn create(
        id: impl Into<String>,
        mut engine: Box<dyn RenderEngine>,
        settings: SessionSettings,
        services: SessionServices,
    ) -> Self {
        let local_id = id.into();
        let options = settings.options.clone();

        engine.apply_options(&options);
        engine.resize(settings.size.cols, settings.size.rows);

        let mut addons = Addon::BASELINE.to_vec();
        if options.image_support {
            addons.push(Addon::Image);
        }
        for addon in addons {
            if let Err(e) = engine.load_addon(addon) {
                tracing::warn!(session_id = %local_id, error = %e, "Addon unavailable");
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        tracing::debug!(
            session_id = %local_id,
            networked = settings.networked,
            cols = settings.size.cols,
            rows = settings.size.rows,
            "Created terminal session"
        );

        Self {
            inner: Arc::new(Inner {
                resize: Mutex::new(ResizeTracker::new(settings.size)),
                local_id,
                services,
                filter: CommandSecurityFilter::new(),
                options: Mutex::new(options),
                state: Mutex::new(ConnectionState::Idle),
                pid: Mutex::new(None),
                engine: Mutex::new(engine),
                transport: Mutex::new(None),
                resize_debounce: Debouncer::new(RESIZE_DEBOUNCE),
                touch: Mutex::new(None),
                touch_timer: Mutex::new(None),
                events,
                cancel: CancellationToken::new(),
                disposed: AtomicBool::new(false),
                settings,
            }),
        }
    }

    /// Attach a drawing surface and start listening to the engine.
    pub fn mount(&self) -> Result<SurfaceKind> {
        self.ensure_live()?;
        let ligatures = self.inner.options.lock().font_ligatures;
        let (sink, events) = mpsc::unbounded_channel();

        let surface = {
            let mut engine = self.inner.engine.lock();
            let surface = negotiate_surface(&mut **engine)?;
            if ligatures {
                if let Err(e) = engine.load_addon(Addon::Ligatures) {
                    tracing::warn!(session_id = %self.id(), error = %e, "Addon unavailable");
                }
            }
            engine.subscribe(sink);
            engine.focus();
            surface
        };

        spawn_engine_pump(Arc::downgrade(&self.inner), events, self.inner.cancel.clone());
        self.fit();
        tracing::info!(session_id = %self.id(), surface = ?surface, "Mounted terminal");
        Ok(surface)
    }

    /// Server pid once allocated, otherwise the local id.
    pub fn id(&self) -> String {
        self.pid().unwrap_or_else(|| self.inner.local_id.clone())
    }

    pub fn pid(&self) -> Option<String> {
        self.inner.pid.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_networked(&self) -> bool {
        self.inner.settings.networked
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> TerminalOptions {
        self.inner.options.lock().clone()
    }

    pub fn font_size(&self) -> u16 {
        self.inner.options.lock().font_size
    }

    /// Current grid size.
    pub fn size(&self) -> TerminalSize {
        let engine = self.inner.engine.lock();
        TerminalSize::new(engine.cols(), engine.rows())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Run `f` against the engine. `f` must not call back into the session.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut dyn RenderEngine) -> R) -> R {
        let mut engine = self.inner.engine.lock();
        f(&mut **engine)
    }

    /// Make sure the shell server is up and allocate a process.
    ///
    /// An environment that is not installed is fatal. A server that never
    /// reports running only produces a warning; allocation is attempted
    /// anyway.
    pub async fn open_session(&self) -> Result<String> {
        self.ensure_live()?;
        if !self.is_networked() {
            return Err(SessionError::LocalMode(self.id()));
        }

        let bootstrap = Arc::clone(&self.inner.services.bootstrap);
        if !bootstrap.is_installed().await {
            return Err(SessionError::NotInstalled);
        }

        if !bootstrap.is_axs_running().await {
            let (log, output) = mpsc::unbounded_channel();
            log_bootstrap_output(self.id(), output);

            if let Err(e) = bootstrap.start_axs(false, log).await {
                tracing::warn!(session_id = %self.id(), error = %e, "Failed to start shell server");
            }

            let attempts = self.inner.settings.poll_attempts;
            let ready =
                wait_until_running(bootstrap.as_ref(), attempts, self.inner.settings.poll_interval)
                    .await;
            if !ready {
                tracing::warn!(
                    session_id = %self.id(),
                    attempts,
                    "Shell server not reported running, continuing"
                );
                self.emit(SessionEvent::Warning(
                    "Shell server did not report running; continuing anyway".to_string(),
                ));
            }
        }

        let size = self.size();
        let pid = self.inner.services.control.allocate(size).await?;
        *self.inner.pid.lock() = Some(pid.clone());
        *self.inner.resize.lock() = ResizeTracker::new(size);

        tracing::info!(
            session_id = %pid,
            cols = size.cols,
            rows = size.rows,
            "Allocated shell process"
        );
        Ok(pid)
    }

    /// Open the data plane for `pid`, allocating a process first if none
    /// is given. Never reconnects on its own.
    pub async fn connect(&self, pid: Option<String>) -> Result<()> {
        self.ensure_live()?;
        if !self.is_networked() {
            return Err(SessionError::LocalMode(self.id()));
        }

        let pid = match pid {
            Some(pid) => {
                let pid = parse_pid(&pid)?;
                *self.inner.pid.lock() = Some(pid.clone());
                pid
            }
            None => self.open_session().await?,
        };

        self.set_state(ConnectionState::Connecting);
        let url = self.inner.services.control.socket_url(&pid);

        match transport::connect(&url, self.inner.cancel.child_token()).await {
            Ok((handle, inbound)) => {
                *self.inner.transport.lock() = Some(handle);
                self.set_state(ConnectionState::Open);
                self.emit(SessionEvent::Connected);
                spawn_inbound_pump(Arc::downgrade(&self.inner), inbound);

                self.inner.engine.lock().focus();
                self.fit();
                tracing::info!(session_id = %pid, "Terminal connected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(session_id = %pid, error = %e, "Terminal connection failed");
                self.set_state(ConnectionState::Errored);
                self.emit(SessionEvent::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Write `data`. External writes go through the security filter and
    /// are dropped with a warning when rejected.
    pub fn write(&self, data: &str, origin: WriteOrigin) {
        if self.is_disposed() {
            return;
        }

        let data = match origin {
            WriteOrigin::Trusted => Cow::Borrowed(data),
            WriteOrigin::External => {
                let verdict = self.inner.filter.validate(data);
                if !verdict.allowed {
                    let reason = verdict
                        .reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "rejected".to_string());
                    tracing::warn!(session_id = %self.id(), reason = %reason, "Blocked terminal write");
                    self.emit(SessionEvent::Warning(format!("Write blocked: {}", reason)));
                    return;
                }
                Cow::Owned(verdict.sanitized_data)
            }
        };

        self.deliver(&data);
    }

    /// Apply a new grid size locally and schedule the server update.
    pub fn resize(&self, cols: u16, rows: u16) {
        if self.is_disposed() || cols == 0 || rows == 0 {
            return;
        }

        let viewport_before = {
            let mut engine = self.inner.engine.lock();
            let before = engine.viewport_y();
            engine.resize(cols, rows);
            before
        };
        self.inner.resize.lock().record(viewport_before);

        let weak = Arc::downgrade(&self.inner);
        let size = TerminalSize::new(cols, rows);
        self.inner.resize_debounce.schedule(async move {
            if let Some(inner) = weak.upgrade() {
                TerminalSession { inner }.settle_resize(size).await;
            }
        });
    }

    /// Resize to whatever fills the container.
    pub fn fit(&self) {
        if self.is_disposed() {
            return;
        }
        let (proposed, current) = {
            let engine = self.inner.engine.lock();
            (engine.proposed_dimensions(), (engine.cols(), engine.rows()))
        };
        if let Some((cols, rows)) = proposed {
            if (cols, rows) != current {
                self.resize(cols, rows);
            }
        }
    }

    /// Find `term`, skipping `skip` matches. Returns false for an empty term
    /// or when nothing matched.
    pub fn search(&self, term: &str, skip: usize, backward: bool) -> bool {
        if term.is_empty() || self.is_disposed() {
            return false;
        }
        let options = SearchOptions {
            backward,
            ..self.inner.settings.search.clone()
        };

        let mut engine = self.inner.engine.lock();
        let mut found = false;
        for _ in 0..=skip {
            found = engine.find(term, &options);
            if !found {
                break;
            }
        }
        found
    }

    pub fn update_theme(&self, patch: &ThemePatch) {
        let options = {
            let mut options = self.inner.options.lock();
            options.theme.merge(patch);
            options.clone()
        };
        self.inner.engine.lock().apply_options(&options);
    }

    pub fn update_options(&self, patch: &OptionsPatch) {
        let (options, font_changed) = {
            let mut options = self.inner.options.lock();
            let before = options.font_size;
            if !options.apply(patch) {
                return;
            }
            let font_changed = options.font_size != before;
            (options.clone(), font_changed)
        };

        self.inner.engine.lock().apply_options(&options);
        if font_changed {
            self.after_font_change(options.font_size);
        }
    }

    pub fn update_font_size(&self, size: u16) {
        let size = clamp_font_size(size as i32);
        let options = {
            let mut options = self.inner.options.lock();
            if options.font_size == size {
                return;
            }
            options.font_size = size;
            options.clone()
        };

        self.inner.engine.lock().apply_options(&options);
        self.after_font_change(size);
    }

    pub fn increase_font_size(&self) {
        self.update_font_size(self.font_size().saturating_add(1).min(MAX_FONT_SIZE));
    }

    pub fn decrease_font_size(&self) {
        self.update_font_size(self.font_size().saturating_sub(1).max(MIN_FONT_SIZE));
    }

    /// Run the shortcut bound to `chord`, if any, and report what it was.
    pub fn handle_key(&self, chord: &KeyChord) -> KeyAction {
        let action = self.inner.settings.key_bindings.classify(chord);
        match action {
            KeyAction::Copy => {
                self.copy_selection();
            }
            KeyAction::Paste => self.paste(),
            KeyAction::IncreaseFontSize => self.increase_font_size(),
            KeyAction::DecreaseFontSize => self.decrease_font_size(),
            KeyAction::ForwardToApp | KeyAction::PassThrough => {}
        }
        action
    }

    /// Copy the engine's selection. Returns false when nothing is selected.
    pub fn copy_selection(&self) -> bool {
        let text = self
            .inner
            .engine
            .lock()
            .selection()
            .filter(|text| !text.is_empty());
        match text {
            Some(text) => {
                self.inner.services.clipboard.copy(&text);
                true
            }
            None => false,
        }
    }

    /// Send the clipboard contents as typed input.
    pub fn paste(&self) {
        if let Some(text) = self.inner.services.clipboard.paste() {
            self.write(&text, WriteOrigin::Trusted);
        }
    }

    pub fn set_image_support(&self, enabled: bool) {
        self.inner.options.lock().image_support = enabled;
        self.toggle_addon(Addon::Image, enabled);
    }

    pub fn set_font_ligatures(&self, enabled: bool) {
        self.inner.options.lock().font_ligatures = enabled;
        self.toggle_addon(Addon::Ligatures, enabled);
    }

    pub fn clear(&self) {
        self.inner.engine.lock().clear();
    }

    pub fn focus(&self) {
        self.inner.engine.lock().focus();
    }

    pub fn blur(&self) {
        self.inner.engine.lock().blur();
    }

    /// Start touch handling for the surface at `geometry`.
    pub fn attach_touch(&self, geometry: SurfaceGeometry) {
        let mut controller =
            TouchSelectionController::new(self.inner.settings.touch.clone(), self.font_size());
        controller.set_geometry(geometry);
        {
            let engine = self.inner.engine.lock();
            controller.refresh_metrics(&**engine);
        }
        *self.inner.touch.lock() = Some(controller);
    }

    pub fn set_touch_geometry(&self, geometry: SurfaceGeometry) {
        if let Some(controller) = self.inner.touch.lock().as_mut() {
            controller.set_geometry(geometry);
        }
    }

    pub fn touch_mode(&self) -> Option<SelectionMode> {
        self.inner.touch.lock().as_ref().map(|c| c.mode())
    }

    /// Feed one touch input and apply the resulting effects.
    pub fn handle_touch(&self, input: TouchInput, now: Instant) -> Vec<TouchEffect> {
        if self.is_disposed() {
            return Vec::new();
        }

        let effects = {
            let mut touch = self.inner.touch.lock();
            let Some(controller) = touch.as_mut() else {
                return Vec::new();
            };
            let mut engine = self.inner.engine.lock();
            controller.handle(input, now, &mut **engine)
        };

        for effect in &effects {
            self.apply_touch_effect(effect);
        }
        self.schedule_touch_tick();
        effects
    }

    /// Clear a touch selection unless it is protected.
    pub fn clear_touch_selection(&self, now: Instant) -> bool {
        let mut touch = self.inner.touch.lock();
        let Some(controller) = touch.as_mut() else {
            return false;
        };
        let mut engine = self.inner.engine.lock();
        controller.clear(now, &mut **engine)
    }

    /// Close the data plane and ask the server to end the process. Server
    /// failures are logged and ignored.
    pub async fn terminate(&self) {
        let transport = self.inner.transport.lock().take();
        if let Some(transport) = transport {
            transport.close();
        }
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.set_state(ConnectionState::Closed);
        }

        if !self.is_networked() {
            return;
        }
        let pid = self.pid();
        if let Some(pid) = pid {
            if let Err(e) = self.inner.services.control.terminate(&pid).await {
                tracing::warn!(session_id = %pid, error = %e, "Failed to terminate shell process");
            }
        }
    }

    /// Terminate and release the engine. Later calls do nothing.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.resize_debounce.cancel();
        let timer = self.inner.touch_timer.lock().take();
        if let Some(timer) = timer {
            timer.abort();
        }

        self.terminate().await;
        self.inner.cancel.cancel();

        let touch = self.inner.touch.lock().take();
        let mut engine = self.inner.engine.lock();
        if let Some(mut controller) = touch {
            controller.force_clear(&mut **engine);
        }
        engine.dispose_addon(Addon::Image);
        engine.dispose_addon(Addon::Ligatures);
        engine.dispose();

        tracing::info!(session_id = %self.id(), "Disposed terminal session");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.lock() = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn open_transport(&self) -> Option<TransportHandle> {
        if self.state() != ConnectionState::Open {
            return None;
        }
        self.inner.transport.lock().clone()
    }

    fn deliver(&self, data: &str) {
        if self.is_networked() {
            if let Some(transport) = self.open_transport() {
                if transport.send(data.to_string()) {
                    return;
                }
            }
        }
        self.inner.engine.lock().write(data.as_bytes());
    }

    async fn settle_resize(&self, size: TerminalSize) {
        let decision = self.inner.resize.lock().settle(size);
        let ResizeDecision::Forward { size, anchor } = decision else {
            tracing::debug!(session_id = %self.id(), "Skipping minor resize");
            return;
        };

        let pid = self.pid().filter(|_| self.is_networked());
        if let Some(pid) = pid {
            let transport = self.inner.transport.lock().clone();
            if let Some(transport) = transport {
                transport.flush().await;
            }
            if let Err(e) = self.inner.services.control.resize(&pid, size).await {
                tracing::warn!(session_id = %pid, error = %e, "Failed to resize shell process");
            }
        }

        self.inner.resize.lock().complete(size);
        self.notify_touch_resize();
        ease_viewport(&self.inner.engine, anchor).await;
    }

    fn notify_touch_resize(&self) {
        let now = tokio::time::Instant::now().into_std();
        let mut touch = self.inner.touch.lock();
        if let Some(controller) = touch.as_mut() {
            let mut engine = self.inner.engine.lock();
            controller.on_terminal_resize(now, &mut **engine);
        }
    }

    fn after_font_change(&self, size: u16) {
        self.inner.engine.lock().refresh();
        self.fit();
        {
            let mut touch = self.inner.touch.lock();
            if let Some(controller) = touch.as_mut() {
                controller.set_font_size(size);
                let engine = self.inner.engine.lock();
                controller.refresh_metrics(&**engine);
            }
        }
        self.emit(SessionEvent::FontSizeChanged(size));
    }

    fn toggle_addon(&self, addon: Addon, enabled: bool) {
        let mut engine = self.inner.engine.lock();
        if !enabled {
            engine.dispose_addon(addon);
            return;
        }
        if let Err(e) = engine.load_addon(addon) {
            tracing::warn!(session_id = %self.id(), error = %e, "Addon unavailable");
        }
    }

    fn apply_touch_effect(&self, effect: &TouchEffect) {
        match effect {
            TouchEffect::FontSizeChanged(size) => self.update_font_size(*size),
            TouchEffect::HapticFeedback => self.emit(SessionEvent::HapticFeedback),
            TouchEffect::Copy(text) => self.inner.services.clipboard.copy(text),
            TouchEffect::PasteRequested => self.paste(),
            TouchEffect::Focus => self.focus(),
        }
    }

    fn schedule_touch_tick(&self) {
        let deadline = self
            .inner
            .touch
            .lock()
            .as_ref()
            .and_then(TouchSelectionController::next_deadline);

        let mut slot = self.inner.touch_timer.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let Some(deadline) = deadline else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            if let Some(inner) = weak.upgrade() {
                let now = tokio::time::Instant::now().into_std();
                TerminalSession { inner }.handle_touch(TouchInput::Tick, now);
            }
        }));
    }

    fn on_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Input(data) => {
                if let Some(transport) = self.open_transport() {
                    transport.send(data);
                }
                let viewport = self.inner.engine.lock().viewport_y();
                self.inner.resize.lock().note_scroll(viewport);
            }
            EngineEvent::Title(title) => self.emit(SessionEvent::TitleChanged(title)),
            EngineEvent::Bell => self.emit(SessionEvent::Bell),
            EngineEvent::SelectionChanged => {
                let mut touch = self.inner.touch.lock();
                if let Some(controller) = touch.as_mut() {
                    let engine = self.inner.engine.lock();
                    controller.on_selection_change(&**engine);
                }
            }
            EngineEvent::Scrolled(viewport) => {
                self.inner.resize.lock().note_scroll(viewport);
                if let Some(controller) = self.inner.touch.lock().as_mut() {
                    controller.on_scroll();
                }
            }
        }
    }

    /// Returns false once the connection is gone.
    fn on_inbound(&self, event: Inbound) -> bool {
        match event {
            Inbound::Output(bytes) => {
                self.inner.engine.lock().write(&bytes);
                true
            }
            Inbound::Exit(exit) => {
                tracing::info!(session_id = %self.id(), "{}", exit.describe());
                self.emit(SessionEvent::ProcessExit(exit));
                true
            }
            Inbound::Closed => {
                self.inner.transport.lock().take();
                self.set_state(ConnectionState::Closed);
                self.emit(SessionEvent::Disconnected);
                tracing::info!(session_id = %self.id(), "Terminal disconnected");
                false
            }
            Inbound::Error(e) => {
                self.inner.transport.lock().take();
                tracing::error!(session_id = %self.id(), error = %e, "Terminal socket error");
                self.set_state(ConnectionState::Errored);
                self.emit(SessionEvent::Error(e));
                false
            }
        }
    }
}

fn spawn_engine_pump(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            TerminalSession { inner }.on_engine_event(event);
        }
    });
}

fn spawn_inbound_pump(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let session = TerminalSession { inner };
            if !session.on_inbound(event) {
                break;
            }
        }
    });
}

fn log_bootstrap_output(session_id: String, mut output: mpsc::UnboundedReceiver<LogLine>) {
    tokio::spawn(async move {
        while let Some(line) = output.recv().await {
            match line {
                LogLine::Info(line) => tracing::debug!(session_id = %session_id, "{}", line),
                LogLine::Error(line) => tracing::warn!(session_id = %session_id, "{}", line),
            }
        }
    });
}
