//! Resize burst bookkeeping and viewport easing.
//!
//! Soft keyboards and container animations produce bursts of resize events.
//! Only the settled size is forwarded to the server, and only if it differs
//! enough from what the server already has. After a forwarded resize the
//! viewport is walked back toward where the user was reading.

use std::time::Duration;

use parking_lot::Mutex;
use protocol::TerminalSize;

use crate::engine::RenderEngine;

/// Quiet period before a resize burst is considered settled.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(150);

const EASE_STEPS: usize = 3;
const EASE_FIRST_DELAY: Duration = Duration::from_millis(100);
const EASE_STEP_INTERVAL: Duration = Duration::from_millis(50);

/// What to do with a settled burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDecision {
    /// Intermediate jitter; the server keeps its current size.
    Skip,
    /// Send `size` to the server, then ease the viewport toward `anchor`.
    Forward { size: TerminalSize, anchor: usize },
}

/// Tracks the size last sent to the server and the burst in progress.
#[derive(Debug, Clone)]
pub struct ResizeTracker {
    forwarded: TerminalSize,
    burst: u32,
    anchor: usize,
    last_scroll: usize,
}

impl ResizeTracker {
    pub fn new(initial: TerminalSize) -> Self {
        Self {
            forwarded: initial,
            burst: 0,
            anchor: 0,
            last_scroll: 0,
        }
    }

    /// Size the server was last told about.
    pub fn forwarded(&self) -> TerminalSize {
        self.forwarded
    }

    pub fn is_resizing(&self) -> bool {
        self.burst > 0
    }

    pub fn burst_len(&self) -> u32 {
        self.burst
    }

    pub fn last_scroll(&self) -> usize {
        self.last_scroll
    }

    /// Remember where the user is reading. Ignored mid-burst, when the
    /// viewport is being moved by reflow rather than by the user.
    pub fn note_scroll(&mut self, viewport_y: usize) {
        if !self.is_resizing() {
            self.last_scroll = viewport_y;
        }
    }

    /// Count one resize event. `viewport_before` is the viewport line prior
    /// to the local reflow; the first event of a burst fixes the anchor.
    pub fn record(&mut self, viewport_before: usize) {
        if self.burst == 0 {
            self.anchor = viewport_before;
        }
        self.burst += 1;
    }

    /// Decide the fate of the burst now that it has settled at `current`.
    ///
    /// A skip ends the burst immediately. A forward leaves it open until
    /// [`complete`](Self::complete) is called.
    pub fn settle(&mut self, current: TerminalSize) -> ResizeDecision {
        let row_diff = current.rows.abs_diff(self.forwarded.rows);
        let col_diff = current.cols.abs_diff(self.forwarded.cols);

        if row_diff < 2 && col_diff < 2 && self.burst > 1 {
            self.burst = 0;
            return ResizeDecision::Skip;
        }

        ResizeDecision::Forward {
            size: current,
            anchor: self.anchor,
        }
    }

    /// Close a forwarded burst.
    pub fn complete(&mut self, size: TerminalSize) {
        self.forwarded = size;
        self.burst = 0;
        self.last_scroll = self.anchor;
    }
}

/// First step of an ease from `viewport_y` toward `target`.
///
/// Returns the clamped target and the step size, or `None` when the buffer
/// fits on screen or the viewport is already within two lines.
pub fn ease_plan(
    buffer_length: usize,
    rows: usize,
    viewport_y: usize,
    target: usize,
) -> Option<(usize, usize)> {
    if buffer_length <= rows {
        return None;
    }
    let max_scroll = buffer_length - rows;
    let safe = target.min(max_scroll);
    let distance = viewport_y.abs_diff(safe);
    if distance <= 2 {
        return None;
    }
    Some((safe, distance.div_ceil(EASE_STEPS)))
}

/// Signed scroll for one ease step, never overshooting `safe`.
pub fn ease_adjustment(viewport_y: usize, safe: usize, step: usize) -> isize {
    let remaining = safe as isize - viewport_y as isize;
    remaining.signum() * remaining.abs().min(step as isize)
}

/// Walk the viewport toward `target` in up to three steps: the first after
/// 100 ms, the rest 50 ms apart.
pub async fn ease_viewport(engine: &Mutex<Box<dyn RenderEngine>>, target: usize) {
    let plan = {
        let engine = engine.lock();
        ease_plan(
            engine.buffer_length(),
            engine.rows() as usize,
            engine.viewport_y(),
            target,
        )
    };
    let Some((safe, step)) = plan else {
        return;
    };

    tokio::time::sleep(EASE_FIRST_DELAY).await;
    for current_step in 1..=EASE_STEPS {
        let remaining = {
            let mut engine = engine.lock();
            let viewport_y = engine.viewport_y();
            let adjustment = ease_adjustment(viewport_y, safe, step);
            if adjustment != 0 {
                engine.scroll_lines(adjustment);
            }
            safe.abs_diff(viewport_y)
        };

        if current_step == EASE_STEPS || remaining <= 1 {
            break;
        }
        tokio::time::sleep(EASE_STEP_INTERVAL).await;
    }
}
