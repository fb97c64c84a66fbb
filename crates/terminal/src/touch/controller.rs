use std::time::Instant;

use crate::engine::{CellSize, RenderEngine};
use crate::options::clamp_font_size;

use super::geometry::{
    cell_to_point, end_handle_origin, is_edge_gesture, menu_origin, point_to_cell,
    selection_length, start_handle_origin, CellPos, Point, Rect, SurfaceGeometry,
};
use super::state::{Handle, SelectionMode, SelectionRange};
use super::word::word_bounds;
use super::TouchConfig;

/// Input delivered to [`TouchSelectionController::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum TouchInput {
    /// A finger went down. Carries every touch currently on the surface.
    Start(Vec<Point>),
    /// Touches moved. Carries every touch currently on the surface.
    Move(Vec<Point>),
    /// A finger lifted. Carries the touches still down.
    End(Vec<Point>),
    /// Time passed; fires the hold timer if it is due.
    Tick,
    Menu(MenuAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Copy,
    Paste,
}

/// Work the controller hands back to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchEffect {
    FontSizeChanged(u16),
    HapticFeedback,
    /// Put this text on the clipboard.
    Copy(String),
    /// Paste the clipboard into the session.
    PasteRequested,
    /// Give keyboard focus back to the terminal.
    Focus,
}

/// Where to draw the selection chrome, relative to the container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub start_handle: Option<Point>,
    pub end_handle: Option<Point>,
    pub menu: Option<Point>,
}

#[derive(Debug, Clone, Copy)]
struct Pinch {
    start_distance: f64,
    initial_font_size: u16,
    last_zoom: Option<Instant>,
    resume_selecting: bool,
}

/// Gesture state machine for one terminal surface.
#[derive(Debug)]
pub struct TouchSelectionController {
    config: TouchConfig,
    geometry: Option<SurfaceGeometry>,
    cell: Option<CellSize>,
    font_size: u16,
    mode: SelectionMode,
    range: Option<SelectionRange>,
    touch_start: Point,
    drag_origin: Point,
    hold_point: Point,
    hold_deadline: Option<Instant>,
    protected_until: Option<Instant>,
    menu_visible: bool,
    pinch: Option<Pinch>,
    current_selection: Option<String>,
}

impl TouchSelectionController {
    pub fn new(config: TouchConfig, font_size: u16) -> Self {
        Self {
            config,
            geometry: None,
            cell: None,
            font_size,
            mode: SelectionMode::Idle,
            range: None,
            touch_start: Point::default(),
            drag_origin: Point::default(),
            hold_point: Point::default(),
            hold_deadline: None,
            protected_until: None,
            menu_visible: false,
            pinch: None,
            current_selection: None,
        }
    }

    pub fn config(&self) -> &TouchConfig {
        &self.config
    }

    pub fn set_geometry(&mut self, geometry: SurfaceGeometry) {
        self.geometry = Some(geometry);
    }

    pub fn geometry(&self) -> Option<SurfaceGeometry> {
        self.geometry
    }

    /// Re-read cell metrics. Unusable metrics disable selection until the
    /// next refresh.
    pub fn refresh_metrics(&mut self, engine: &dyn RenderEngine) {
        self.cell = engine.cell_size().filter(CellSize::is_usable);
    }

    pub fn set_font_size(&mut self, font_size: u16) {
        self.font_size = font_size;
    }

    pub fn font_size(&self) -> u16 {
        self.font_size
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn is_selecting(&self) -> bool {
        self.mode.is_selecting()
    }

    pub fn selection(&self) -> Option<SelectionRange> {
        self.range
    }

    pub fn selected_text(&self) -> Option<&str> {
        self.current_selection.as_deref()
    }

    pub fn is_menu_visible(&self) -> bool {
        self.menu_visible
    }

    pub fn is_protected(&self, now: Instant) -> bool {
        self.protected_until.is_some_and(|until| now < until)
    }

    /// When the host should deliver the next [`TouchInput::Tick`].
    pub fn next_deadline(&self) -> Option<Instant> {
        self.hold_deadline
    }

    pub fn handle(
        &mut self,
        input: TouchInput,
        now: Instant,
        engine: &mut dyn RenderEngine,
    ) -> Vec<TouchEffect> {
        let mut effects = Vec::new();
        self.expire_protection(now);
        self.fire_hold_timer(now, engine, &mut effects);

        match input {
            TouchInput::Start(touches) => self.on_start(&touches, now, engine, &mut effects),
            TouchInput::Move(touches) => self.on_move(&touches, now, engine, &mut effects),
            TouchInput::End(remaining) => self.on_end(&remaining),
            TouchInput::Tick => {}
            TouchInput::Menu(action) => self.on_menu(action, engine, &mut effects),
        }

        effects
    }

    /// Clear the selection unless it is protected. Returns true if a
    /// selection was cleared.
    pub fn clear(&mut self, now: Instant, engine: &mut dyn RenderEngine) -> bool {
        self.expire_protection(now);
        if self.is_protected(now) {
            return false;
        }
        let was_selecting = self.is_selecting();
        self.reset(engine);
        was_selecting
    }

    /// Clear the selection regardless of protection.
    pub fn force_clear(&mut self, engine: &mut dyn RenderEngine) {
        self.reset(engine);
    }

    /// The grid was resized. Keeps the selection if it still fits the buffer,
    /// pulled in from the right edge when the grid got narrower.
    pub fn on_terminal_resize(&mut self, now: Instant, engine: &mut dyn RenderEngine) {
        self.refresh_metrics(engine);
        self.expire_protection(now);
        if !self.is_selecting() {
            return;
        }
        self.clamp_to_grid(engine);
        if self.is_protected(now) {
            return;
        }

        let fits = self
            .range
            .is_some_and(|range| range.fits(engine.buffer_length()));
        if fits {
            self.menu_visible = self.config.show_context_menu;
        } else {
            self.reset(engine);
        }
    }

    /// The engine's selection changed under us.
    pub fn on_selection_change(&mut self, engine: &dyn RenderEngine) {
        if !self.is_selecting() {
            return;
        }
        if let Some(text) = engine.selection().filter(|s| !s.is_empty()) {
            self.current_selection = Some(text);
        }
    }

    /// The viewport scrolled; the menu would float over the wrong text.
    pub fn on_scroll(&mut self) {
        if self.is_selecting() {
            self.menu_visible = false;
        }
    }

    /// Handle and menu positions, or `None` when nothing is drawable.
    pub fn overlay(&self, engine: &dyn RenderEngine) -> Option<Overlay> {
        let geometry = self.geometry?;
        let cell = self.cell?;
        let range = self.range?;
        let (start, end) = range.ordered();
        let viewport_y = engine.viewport_y();
        let rows = engine.rows();

        let start_point = cell_to_point(start, &geometry, cell, viewport_y, rows);
        let end_point = cell_to_point(end, &geometry, cell, viewport_y, rows);

        let menu = if self.menu_visible {
            menu_origin(
                start_point,
                end_point,
                cell,
                &geometry.container,
                self.config.menu_width,
                self.config.menu_height,
            )
        } else {
            None
        };

        Some(Overlay {
            start_handle: start_point.map(|p| start_handle_origin(p, cell, self.config.handle_size)),
            end_handle: end_point.map(|p| end_handle_origin(p, cell, self.config.handle_size)),
            menu,
        })
    }

    fn on_start(
        &mut self,
        touches: &[Point],
        now: Instant,
        engine: &mut dyn RenderEngine,
        effects: &mut Vec<TouchEffect>,
    ) {
        if let [first, second] = touches {
            self.start_pinch(*first, *second);
            return;
        }
        let [point] = touches else {
            return;
        };
        let point = *point;
        self.touch_start = point;

        if self.is_selecting() {
            if let Some(handle) = self.handle_at(point, engine) {
                self.mode = SelectionMode::HandleDragging(handle);
                self.drag_origin = point;
                return;
            }
            if self.menu_contains(point, engine) || self.is_protected(now) {
                return;
            }
            let inside = self
                .geometry
                .is_some_and(|geometry| geometry.terminal.contains(point));
            if inside && self.clear(now, engine) {
                effects.push(TouchEffect::Focus);
            }
            return;
        }

        if self.mode == SelectionMode::Pinching || self.is_edge(point) {
            return;
        }

        self.mode = SelectionMode::TapHoldPending;
        self.hold_point = point;
        self.hold_deadline = Some(now + self.config.tap_hold());
    }

    fn on_move(
        &mut self,
        touches: &[Point],
        now: Instant,
        engine: &mut dyn RenderEngine,
        effects: &mut Vec<TouchEffect>,
    ) {
        if let [first, second] = touches {
            self.pinch_step(*first, *second, now, effects);
            return;
        }
        let [point] = touches else {
            return;
        };
        let point = *point;

        match self.mode {
            SelectionMode::Pinching => return,
            SelectionMode::HandleDragging(handle) => {
                self.drag_handle(handle, point, engine);
                return;
            }
            _ => {}
        }

        let threshold = self.config.move_threshold;
        let horizontal = point.x - self.touch_start.x;
        let dx = horizontal.abs();
        let dy = (point.y - self.touch_start.y).abs();

        if self.is_edge(self.touch_start) && horizontal.abs() > dy && dx > threshold {
            self.cancel_hold();
            return;
        }

        if dx > threshold || dy > threshold {
            self.cancel_hold();
            if self.mode == SelectionMode::Selecting {
                self.extend_selection(point, engine);
            }
        }
    }

    fn on_end(&mut self, remaining: &[Point]) {
        if self.mode == SelectionMode::Pinching {
            if remaining.len() < 2 {
                let resume = self.pinch.take().is_some_and(|p| p.resume_selecting);
                self.mode = if resume && self.range.is_some() {
                    SelectionMode::Selecting
                } else {
                    SelectionMode::Idle
                };
            }
            return;
        }

        self.cancel_hold();
        if self.is_selecting() {
            self.mode = SelectionMode::Selecting;
            if self.config.show_context_menu && self.current_selection.is_some() {
                self.menu_visible = true;
            }
        }
    }

    fn on_menu(
        &mut self,
        action: MenuAction,
        engine: &mut dyn RenderEngine,
        effects: &mut Vec<TouchEffect>,
    ) {
        if !self.is_selecting() {
            return;
        }
        match action {
            MenuAction::Copy => {
                let text = self
                    .current_selection
                    .clone()
                    .or_else(|| engine.selection())
                    .filter(|text| !text.is_empty());
                if let Some(text) = text {
                    effects.push(TouchEffect::Copy(text));
                }
            }
            MenuAction::Paste => effects.push(TouchEffect::PasteRequested),
        }
        self.reset(engine);
    }

    fn start_pinch(&mut self, first: Point, second: Point) {
        let resume_selecting = self.is_selecting();
        self.cancel_hold();
        self.pinch = Some(Pinch {
            start_distance: first.distance(&second),
            initial_font_size: self.font_size,
            last_zoom: None,
            resume_selecting,
        });
        self.mode = SelectionMode::Pinching;
    }

    fn pinch_step(
        &mut self,
        first: Point,
        second: Point,
        now: Instant,
        effects: &mut Vec<TouchEffect>,
    ) {
        if self.mode != SelectionMode::Pinching {
            return;
        }
        let throttle = self.config.zoom_throttle();
        let Some(pinch) = self.pinch.as_mut() else {
            return;
        };
        if pinch
            .last_zoom
            .is_some_and(|last| now.saturating_duration_since(last) < throttle)
        {
            return;
        }
        pinch.last_zoom = Some(now);
        if pinch.start_distance <= 0.0 {
            return;
        }

        let scale = first.distance(&second) / pinch.start_distance;
        let size = clamp_font_size((pinch.initial_font_size as f64 * scale).round() as i32);
        if size != self.font_size {
            self.font_size = size;
            effects.push(TouchEffect::FontSizeChanged(size));
        }
    }

    fn drag_handle(&mut self, handle: Handle, point: Point, engine: &mut dyn RenderEngine) {
        let threshold = self.config.move_threshold;
        let dx = (point.x - self.drag_origin.x).abs();
        let dy = (point.y - self.drag_origin.y).abs();
        if dx < threshold && dy < threshold {
            return;
        }

        let adjusted = Point::new(point.x, point.y - self.config.finger_offset);
        let Some(pos) = self.cell_at(adjusted, engine) else {
            return;
        };
        let Some(range) = self.range.as_mut() else {
            return;
        };
        let active = range.drag(handle, pos);
        self.mode = SelectionMode::HandleDragging(active);
        self.apply_selection(engine);
    }

    fn extend_selection(&mut self, point: Point, engine: &mut dyn RenderEngine) {
        let Some(pos) = self.cell_at(point, engine) else {
            return;
        };
        if let Some(range) = self.range.as_mut() {
            range.end = pos;
            self.apply_selection(engine);
        }
    }

    fn fire_hold_timer(
        &mut self,
        now: Instant,
        engine: &mut dyn RenderEngine,
        effects: &mut Vec<TouchEffect>,
    ) {
        let due = self.hold_deadline.is_some_and(|deadline| deadline <= now);
        if due && self.mode == SelectionMode::TapHoldPending {
            self.start_selection(self.hold_point, now, engine, effects);
        }
    }

    fn start_selection(
        &mut self,
        point: Point,
        now: Instant,
        engine: &mut dyn RenderEngine,
        effects: &mut Vec<TouchEffect>,
    ) {
        self.hold_deadline = None;
        let Some(pos) = self.cell_at(point, engine) else {
            self.mode = SelectionMode::Idle;
            return;
        };

        self.protected_until = Some(now + self.config.protection());
        self.mode = SelectionMode::Selecting;

        let range = engine
            .line_text(pos.row)
            .and_then(|line| word_bounds(&line, pos.col))
            .map(|(start, end)| {
                SelectionRange::new(CellPos::new(pos.row, start), CellPos::new(pos.row, end))
            })
            .unwrap_or_else(|| SelectionRange::single(pos));
        self.range = Some(range);
        self.apply_selection(engine);

        self.menu_visible = self.config.show_context_menu;
        if self.config.haptic_feedback {
            effects.push(TouchEffect::HapticFeedback);
        }
        tracing::debug!(row = pos.row, col = pos.col, "Touch selection started");
    }

    fn apply_selection(&mut self, engine: &mut dyn RenderEngine) {
        let Some(range) = self.range else {
            return;
        };
        let (start, end) = range.ordered();
        let length = selection_length(start, end, engine.cols());
        engine.clear_selection();
        engine.select(start.col, start.row, length);
        self.current_selection = engine.selection().filter(|s| !s.is_empty());
    }

    fn clamp_to_grid(&mut self, engine: &mut dyn RenderEngine) {
        let Some(range) = self.range.as_mut() else {
            return;
        };
        let before = *range;
        range.clamp_cols(engine.cols());
        if *range != before {
            self.apply_selection(engine);
        }
    }

    fn reset(&mut self, engine: &mut dyn RenderEngine) {
        if self.mode != SelectionMode::Pinching {
            self.mode = SelectionMode::Idle;
        }
        self.range = None;
        self.current_selection = None;
        self.hold_deadline = None;
        self.protected_until = None;
        self.menu_visible = false;
        engine.clear_selection();
    }

    fn cancel_hold(&mut self) {
        self.hold_deadline = None;
        if self.mode == SelectionMode::TapHoldPending {
            self.mode = SelectionMode::Idle;
        }
    }

    fn expire_protection(&mut self, now: Instant) {
        if self.protected_until.is_some_and(|until| now >= until) {
            self.protected_until = None;
        }
    }

    fn is_edge(&self, point: Point) -> bool {
        self.geometry.is_some_and(|geometry| {
            is_edge_gesture(point, geometry.screen_width, self.config.edge_threshold)
        })
    }

    fn cell_at(&self, point: Point, engine: &dyn RenderEngine) -> Option<CellPos> {
        let geometry = self.geometry?;
        let cell = self.cell?;
        point_to_cell(
            point,
            &geometry.terminal,
            cell,
            engine.cols(),
            engine.viewport_y(),
        )
    }

    fn handle_at(&self, point: Point, engine: &dyn RenderEngine) -> Option<Handle> {
        let geometry = self.geometry?;
        let overlay = self.overlay(engine)?;
        let local = geometry.to_container(point);
        let size = self.config.handle_size;

        [
            (Handle::Start, overlay.start_handle),
            (Handle::End, overlay.end_handle),
        ]
        .into_iter()
        .find_map(|(handle, origin)| {
            origin
                .filter(|o| Rect::new(o.x, o.y, size, size).contains(local))
                .map(|_| handle)
        })
    }

    fn menu_contains(&self, point: Point, engine: &dyn RenderEngine) -> bool {
        let Some(geometry) = self.geometry else {
            return false;
        };
        let Some(menu) = self.overlay(engine).and_then(|overlay| overlay.menu) else {
            return false;
        };
        let rect = Rect::new(menu.x, menu.y, self.config.menu_width, self.config.menu_height);
        rect.contains(geometry.to_container(point))
    }
}
