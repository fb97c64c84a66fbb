//! In-memory collaborators for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use protocol::{ProtocolError, Result as ProtocolResult, TerminalSize};

use crate::bootstrap::{Bootstrap, BootstrapError, LogLine, LogSink};
use crate::control::ControlPlane;
use crate::engine::{
    Addon, CellSize, EngineError, EngineEvent, EngineEventSink, RenderEngine, SearchOptions,
    SurfaceKind,
};
use crate::options::TerminalOptions;

/// Everything a [`FakeEngine`] has been told, plus knobs for its answers.
#[derive(Debug)]
pub(crate) struct FakeState {
    pub cols: u16,
    pub rows: u16,
    pub buffer_length: usize,
    pub viewport_y: usize,
    pub lines: Vec<String>,
    pub cell: Option<CellSize>,
    /// `(col, row, length)` of the current selection.
    pub selection: Option<(u16, usize, usize)>,
    pub written: Vec<u8>,
    pub resizes: Vec<(u16, u16)>,
    pub scrolls: Vec<isize>,
    pub scrolled_to_bottom: usize,
    pub attached: Option<SurfaceKind>,
    pub detached: Vec<SurfaceKind>,
    pub fail_accelerated: bool,
    /// Software attach reports success without attaching anything.
    pub silent_software: bool,
    pub addons: Vec<Addon>,
    pub failing_addons: Vec<Addon>,
    pub options: Option<TerminalOptions>,
    pub proposed: Option<(u16, u16)>,
    pub focused: bool,
    pub cleared: usize,
    pub refreshes: usize,
    pub searches: Vec<(String, SearchOptions)>,
    pub find_result: bool,
    pub disposed: bool,
    pub sink: Option<EngineEventSink>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new(cols: u16, rows: u16) -> Self {
        let state = FakeState {
            cols,
            rows,
            buffer_length: rows as usize,
            viewport_y: 0,
            lines: Vec::new(),
            cell: Some(CellSize::new(10.0, 20.0)),
            selection: None,
            written: Vec::new(),
            resizes: Vec::new(),
            scrolls: Vec::new(),
            scrolled_to_bottom: 0,
            attached: None,
            detached: Vec::new(),
            fail_accelerated: false,
            silent_software: false,
            addons: Vec::new(),
            failing_addons: Vec::new(),
            options: None,
            proposed: None,
            focused: false,
            cleared: 0,
            refreshes: 0,
            searches: Vec::new(),
            find_result: true,
            disposed: false,
            sink: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    /// Shared state that outlives the engine being boxed into a session.
    pub fn handle(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    pub fn set_lines(&mut self, lines: &[&str]) {
        let mut state = self.state.lock();
        state.lines = lines.iter().map(|l| l.to_string()).collect();
        state.buffer_length = state.buffer_length.max(state.lines.len());
    }

    /// Raise an event as the renderer would.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(sink) = self.state.lock().sink.as_ref() {
            let _ = sink.send(event);
        }
    }
}

impl FakeState {
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    fn max_viewport(&self) -> usize {
        self.buffer_length.saturating_sub(self.rows as usize)
    }

    fn selected_text(&self) -> Option<String> {
        let (mut col, mut row, mut remaining) = self.selection?;
        let mut text = String::new();
        while remaining > 0 {
            let take = ((self.cols - col) as usize).min(remaining);
            let line = self.lines.get(row).map(String::as_str).unwrap_or("");
            text.extend(line.chars().skip(col as usize).take(take));
            remaining -= take;
            if remaining > 0 {
                text.push('\n');
            }
            row += 1;
            col = 0;
        }
        Some(text)
    }
}

impl RenderEngine for FakeEngine {
    fn subscribe(&mut self, sink: EngineEventSink) {
        self.state.lock().sink = Some(sink);
    }

    fn write(&mut self, data: &[u8]) {
        self.state.lock().written.extend_from_slice(data);
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let mut state = self.state.lock();
        state.cols = cols;
        state.rows = rows;
        state.buffer_length = state.buffer_length.max(rows as usize);
        state.viewport_y = state.viewport_y.min(state.max_viewport());
        state.resizes.push((cols, rows));
    }

    fn cols(&self) -> u16 {
        self.state.lock().cols
    }

    fn rows(&self) -> u16 {
        self.state.lock().rows
    }

    fn viewport_y(&self) -> usize {
        self.state.lock().viewport_y
    }

    fn buffer_length(&self) -> usize {
        self.state.lock().buffer_length
    }

    fn scroll_lines(&mut self, delta: isize) {
        let mut state = self.state.lock();
        state.scrolls.push(delta);
        let target = (state.viewport_y as isize + delta).max(0) as usize;
        state.viewport_y = target.min(state.max_viewport());
    }

    fn scroll_to_bottom(&mut self) {
        let mut state = self.state.lock();
        state.viewport_y = state.max_viewport();
        state.scrolled_to_bottom += 1;
    }

    fn line_text(&self, row: usize) -> Option<String> {
        let state = self.state.lock();
        match state.lines.get(row) {
            Some(line) => Some(line.clone()),
            None if row < state.buffer_length => Some(String::new()),
            None => None,
        }
    }

    fn select(&mut self, col: u16, row: usize, length: usize) {
        self.state.lock().selection = Some((col, row, length));
    }

    fn clear_selection(&mut self) {
        self.state.lock().selection = None;
    }

    fn selection(&self) -> Option<String> {
        self.state.lock().selected_text()
    }

    fn cell_size(&self) -> Option<CellSize> {
        self.state.lock().cell
    }

    fn attach(&mut self, surface: SurfaceKind) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        match surface {
            SurfaceKind::Accelerated if state.fail_accelerated => Err(
                EngineError::SurfaceUnavailable(surface, "context creation failed".to_string()),
            ),
            SurfaceKind::Software if state.silent_software => Ok(()),
            _ => {
                state.attached = Some(surface);
                Ok(())
            }
        }
    }

    fn detach(&mut self, surface: SurfaceKind) {
        let mut state = self.state.lock();
        state.detached.push(surface);
        if state.attached == Some(surface) {
            state.attached = None;
        }
    }

    fn attached_surface(&self) -> Option<SurfaceKind> {
        self.state.lock().attached
    }

    fn load_addon(&mut self, addon: Addon) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.failing_addons.contains(&addon) {
            return Err(EngineError::AddonFailed(addon, "not available".to_string()));
        }
        if !state.addons.contains(&addon) {
            state.addons.push(addon);
        }
        Ok(())
    }

    fn dispose_addon(&mut self, addon: Addon) {
        self.state.lock().addons.retain(|a| *a != addon);
    }

    fn apply_options(&mut self, options: &TerminalOptions) {
        self.state.lock().options = Some(options.clone());
    }

    fn proposed_dimensions(&self) -> Option<(u16, u16)> {
        self.state.lock().proposed
    }

    fn focus(&mut self) {
        self.state.lock().focused = true;
    }

    fn blur(&mut self) {
        self.state.lock().focused = false;
    }

    fn clear(&mut self) {
        self.state.lock().cleared += 1;
    }

    fn refresh(&mut self) {
        self.state.lock().refreshes += 1;
    }

    fn find(&mut self, term: &str, options: &SearchOptions) -> bool {
        let mut state = self.state.lock();
        state.searches.push((term.to_string(), options.clone()));
        state.find_result
    }

    fn dispose(&mut self) {
        self.state.lock().disposed = true;
    }
}

/// A control-plane request seen by [`FakeControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlCall {
    Allocate(TerminalSize),
    Resize(String, TerminalSize),
    Terminate(String),
}

#[derive(Debug)]
pub(crate) struct FakeControlPlane {
    pid: String,
    socket_base: String,
    calls: Mutex<Vec<ControlCall>>,
    fail_allocate: AtomicBool,
    fail_resize: AtomicBool,
    fail_terminate: AtomicBool,
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        // Nothing listens on the discard port, so sockets fail fast.
        Self::new("4242", "ws://127.0.0.1:9/terminals")
    }
}

impl FakeControlPlane {
    pub fn new(pid: impl Into<String>, socket_base: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            socket_base: socket_base.into(),
            calls: Mutex::new(Vec::new()),
            fail_allocate: AtomicBool::new(false),
            fail_resize: AtomicBool::new(false),
            fail_terminate: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().clone()
    }

    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ControlCall::Resize(_, size) => Some(size),
                _ => None,
            })
            .collect()
    }

    pub fn fail_allocate(&self) {
        self.fail_allocate.store(true, Ordering::SeqCst);
    }

    pub fn fail_resize(&self) {
        self.fail_resize.store(true, Ordering::SeqCst);
    }

    pub fn fail_terminate(&self) {
        self.fail_terminate.store(true, Ordering::SeqCst);
    }

    fn refused(what: &str) -> ProtocolError {
        ProtocolError::HttpStatus {
            status: 500,
            body: format!("{} refused", what),
        }
    }
}

impl ControlPlane for FakeControlPlane {
    fn allocate(
        &self,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<String>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().push(ControlCall::Allocate(size));
            if self.fail_allocate.load(Ordering::SeqCst) {
                return Err(Self::refused("allocate"));
            }
            Ok(self.pid.clone())
        })
    }

    fn resize<'a>(
        &'a self,
        pid: &'a str,
        size: TerminalSize,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().push(ControlCall::Resize(pid.to_string(), size));
            if self.fail_resize.load(Ordering::SeqCst) {
                return Err(Self::refused("resize"));
            }
            Ok(())
        })
    }

    fn terminate<'a>(
        &'a self,
        pid: &'a str,
    ) -> Pin<Box<dyn Future<Output = ProtocolResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().push(ControlCall::Terminate(pid.to_string()));
            if self.fail_terminate.load(Ordering::SeqCst) {
                return Err(Self::refused("terminate"));
            }
            Ok(())
        })
    }

    fn socket_url(&self, pid: &str) -> String {
        format!("{}/{}", self.socket_base, pid)
    }
}

#[derive(Debug)]
pub(crate) struct FakeBootstrap {
    installed: AtomicBool,
    supported: AtomicBool,
    never_running: AtomicBool,
    ready_after: AtomicU32,
    polls: AtomicU32,
    starts: AtomicU32,
    install_output: Mutex<Vec<LogLine>>,
    install_fails: AtomicBool,
}

impl Default for FakeBootstrap {
    fn default() -> Self {
        Self {
            installed: AtomicBool::new(true),
            supported: AtomicBool::new(true),
            never_running: AtomicBool::new(false),
            ready_after: AtomicU32::new(1),
            polls: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            install_output: Mutex::new(Vec::new()),
            install_fails: AtomicBool::new(false),
        }
    }
}

impl FakeBootstrap {
    /// The server answers on the `n`th readiness poll.
    pub fn running_after_polls(&self, n: u32) {
        self.ready_after.store(n, Ordering::SeqCst);
    }

    pub fn never_running(&self) {
        self.never_running.store(true, Ordering::SeqCst);
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn install_output(&self, lines: Vec<LogLine>) {
        *self.install_output.lock() = lines;
    }

    pub fn fail_install(&self) {
        self.install_fails.store(true, Ordering::SeqCst);
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Bootstrap for FakeBootstrap {
    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.installed.load(Ordering::SeqCst) })
    }

    fn is_supported(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move { self.supported.load(Ordering::SeqCst) })
    }

    fn is_axs_running(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            !self.never_running.load(Ordering::SeqCst)
                && polls >= self.ready_after.load(Ordering::SeqCst)
        })
    }

    fn start_axs(
        &self,
        _installing: bool,
        _log: LogSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BootstrapError>> + Send + '_>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn install(
        &self,
        log: LogSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), BootstrapError>> + Send + '_>> {
        Box::pin(async move {
            let lines = self.install_output.lock().clone();
            for line in lines {
                let _ = log.send(line);
            }
            if self.install_fails.load(Ordering::SeqCst) {
                return Err(BootstrapError::InstallFailed("exit status 1".to_string()));
            }
            Ok(())
        })
    }
}
