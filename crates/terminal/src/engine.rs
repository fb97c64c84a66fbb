//! Seam to the external character-grid renderer.
//!
//! Parsing escape sequences and drawing cells is not done here. A session
//! only needs to push bytes, query the viewport, drive selection and pick a
//! drawing surface. Anything implementing [`RenderEngine`] can host a
//! session: a GPU canvas, a DOM renderer, or plain stdout.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::options::TerminalOptions;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0:?} surface unavailable: {1}")]
    SurfaceUnavailable(SurfaceKind, String),

    #[error("failed to load {0:?} addon: {1}")]
    AddonFailed(Addon, String),
}

/// Drawing surface backing the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// GPU accelerated canvas. Preferred, may be missing on some devices.
    Accelerated,
    /// Software fallback, always expected to work.
    Software,
}

/// Optional engine capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addon {
    Fit,
    Unicode11,
    Search,
    WebLinks,
    Image,
    Ligatures,
}

impl Addon {
    /// Addons every session loads at creation.
    pub const BASELINE: [Addon; 4] = [Addon::Fit, Addon::Unicode11, Addon::Search, Addon::WebLinks];
}

/// Pixel size of a single cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width: f64,
    pub height: f64,
}

impl CellSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_usable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub backward: bool,
    pub case_sensitive: bool,
    pub regex: bool,
    pub whole_word: bool,
}

/// Notifications raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Keyboard input typed into the grid.
    Input(String),
    Title(String),
    Bell,
    SelectionChanged,
    /// Viewport moved to the given line.
    Scrolled(usize),
}

pub type EngineEventSink = mpsc::UnboundedSender<EngineEvent>;

/// Character-grid renderer driven by a session.
///
/// Rows are absolute buffer lines: row 0 is the oldest scrollback line and
/// `viewport_y()` is the first visible one.
pub trait RenderEngine: Send {
    /// Register the channel the engine reports [`EngineEvent`]s on.
    fn subscribe(&mut self, sink: EngineEventSink);

    fn write(&mut self, data: &[u8]);
    fn resize(&mut self, cols: u16, rows: u16);
    fn cols(&self) -> u16;
    fn rows(&self) -> u16;

    fn viewport_y(&self) -> usize;
    fn buffer_length(&self) -> usize;
    fn scroll_lines(&mut self, delta: isize);
    fn scroll_to_bottom(&mut self);
    fn line_text(&self, row: usize) -> Option<String>;

    fn select(&mut self, col: u16, row: usize, length: usize);
    fn clear_selection(&mut self);
    fn selection(&self) -> Option<String>;

    /// `None` until the surface has been laid out.
    fn cell_size(&self) -> Option<CellSize>;

    fn attach(&mut self, surface: SurfaceKind) -> Result<(), EngineError>;
    fn detach(&mut self, surface: SurfaceKind);
    fn attached_surface(&self) -> Option<SurfaceKind>;

    fn load_addon(&mut self, addon: Addon) -> Result<(), EngineError>;
    fn dispose_addon(&mut self, addon: Addon);

    fn apply_options(&mut self, options: &TerminalOptions);

    /// Grid size that would fill the container, as computed by the fit addon.
    fn proposed_dimensions(&self) -> Option<(u16, u16)>;

    fn focus(&mut self);
    fn blur(&mut self);
    fn clear(&mut self);
    fn refresh(&mut self);

    /// Highlight the next match. Returns false when nothing matched.
    fn find(&mut self, term: &str, options: &SearchOptions) -> bool;

    fn dispose(&mut self);
}

/// Attach the preferred surface, falling back to software rendering.
///
/// A failed accelerated attempt is disposed before the fallback so no half
/// initialised context lingers.
pub fn negotiate_surface(engine: &mut dyn RenderEngine) -> Result<SurfaceKind, EngineError> {
    match engine.attach(SurfaceKind::Accelerated) {
        Ok(()) => {}
        Err(err) => {
            tracing::warn!(error = %err, "Accelerated surface failed, using software renderer");
            engine.detach(SurfaceKind::Accelerated);
        }
    }

    if engine.attached_surface().is_none() {
        engine.attach(SurfaceKind::Software)?;
    }

    engine.attached_surface().ok_or_else(|| {
        EngineError::SurfaceUnavailable(
            SurfaceKind::Software,
            "no surface attached after fallback".to_string(),
        )
    })
}
