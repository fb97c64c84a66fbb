//! Render engine that passes output straight through to a host terminal.
//!
//! The host terminal does the drawing, so there is no scrollback, selection
//! or search here. Window titles and bells are picked out of the output and
//! reported as engine events.

use std::io::Write;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::{
    Addon, CellSize, EngineError, EngineEvent, EngineEventSink, RenderEngine, SearchOptions,
    SurfaceKind,
};
use crate::options::TerminalOptions;

static TITLE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\][02];([^\x07\x1b]*)(?:\x07|\x1b\\)").expect("title pattern is valid")
});

const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";

/// Reports the host terminal size, if it can be determined.
pub type SizeProbe = fn() -> Option<(u16, u16)>;

pub struct StdioEngine<W: Write + Send> {
    out: W,
    cols: u16,
    rows: u16,
    surface: Option<SurfaceKind>,
    addons: Vec<Addon>,
    probe: Option<SizeProbe>,
    sink: Option<EngineEventSink>,
    disposed: bool,
}

impl<W: Write + Send> StdioEngine<W> {
    pub fn new(out: W, cols: u16, rows: u16) -> Self {
        Self {
            out,
            cols,
            rows,
            surface: None,
            addons: Vec::new(),
            probe: None,
            sink: None,
            disposed: false,
        }
    }

    /// Use `probe` to answer [`RenderEngine::proposed_dimensions`].
    pub fn with_size_probe(mut self, probe: SizeProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn addons(&self) -> &[Addon] {
        &self.addons
    }

    fn report(&self, data: &[u8]) {
        let Some(sink) = &self.sink else {
            return;
        };
        let text = String::from_utf8_lossy(data);

        for caps in TITLE_SEQUENCE.captures_iter(&text) {
            let _ = sink.send(EngineEvent::Title(caps[1].to_string()));
        }
        // Sequences split across writes are not recognized.
        let rest = TITLE_SEQUENCE.replace_all(&text, "");
        if rest.contains('\x07') {
            let _ = sink.send(EngineEvent::Bell);
        }
    }

    fn emit_raw(&mut self, data: &[u8]) {
        if let Err(e) = self.out.write_all(data).and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "Failed to write terminal output");
        }
    }
}

impl<W: Write + Send> RenderEngine for StdioEngine<W> {
    fn subscribe(&mut self, sink: EngineEventSink) {
        self.sink = Some(sink);
    }

    fn write(&mut self, data: &[u8]) {
        if self.disposed {
            return;
        }
        self.emit_raw(data);
        self.report(data);
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    fn cols(&self) -> u16 {
        self.cols
    }

    fn rows(&self) -> u16 {
        self.rows
    }

    fn viewport_y(&self) -> usize {
        0
    }

    fn buffer_length(&self) -> usize {
        self.rows as usize
    }

    fn scroll_lines(&mut self, _delta: isize) {}

    fn scroll_to_bottom(&mut self) {}

    fn line_text(&self, _row: usize) -> Option<String> {
        None
    }

    fn select(&mut self, _col: u16, _row: usize, _length: usize) {}

    fn clear_selection(&mut self) {}

    fn selection(&self) -> Option<String> {
        None
    }

    fn cell_size(&self) -> Option<CellSize> {
        None
    }

    fn attach(&mut self, surface: SurfaceKind) -> Result<(), EngineError> {
        match surface {
            SurfaceKind::Accelerated => Err(EngineError::SurfaceUnavailable(
                surface,
                "host terminal draws its own cells".to_string(),
            )),
            SurfaceKind::Software => {
                self.surface = Some(surface);
                Ok(())
            }
        }
    }

    fn detach(&mut self, surface: SurfaceKind) {
        if self.surface == Some(surface) {
            self.surface = None;
        }
    }

    fn attached_surface(&self) -> Option<SurfaceKind> {
        self.surface
    }

    fn load_addon(&mut self, addon: Addon) -> Result<(), EngineError> {
        if matches!(addon, Addon::Image | Addon::Ligatures) {
            return Err(EngineError::AddonFailed(
                addon,
                "not supported by the host terminal".to_string(),
            ));
        }
        if !self.addons.contains(&addon) {
            self.addons.push(addon);
        }
        Ok(())
    }

    fn dispose_addon(&mut self, addon: Addon) {
        self.addons.retain(|a| *a != addon);
    }

    fn apply_options(&mut self, _options: &TerminalOptions) {}

    fn proposed_dimensions(&self) -> Option<(u16, u16)> {
        self.probe
            .and_then(|probe| probe())
            .filter(|(cols, rows)| *cols > 0 && *rows > 0)
    }

    fn focus(&mut self) {}

    fn blur(&mut self) {}

    fn clear(&mut self) {
        self.emit_raw(CLEAR_SCREEN);
    }

    fn refresh(&mut self) {}

    fn find(&mut self, _term: &str, _options: &SearchOptions) -> bool {
        false
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.sink = None;
        if let Err(e) = self.out.flush() {
            tracing::debug!(error = %e, "Flush on dispose failed");
        }
    }
}
