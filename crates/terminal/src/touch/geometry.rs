//! Pixel and cell coordinate math for the selection overlay.
//!
//! Screen points are in the same space as touch events. Overlay positions
//! are relative to the container that hosts the terminal element.

use crate::engine::CellSize;

/// Margin kept between the context menu and the container edges.
const MENU_MARGIN: f64 = 10.0;

/// Gap between the lower selection row and the context menu.
const MENU_GAP: f64 = 40.0;

/// Gap between a cell's bottom edge and its handle.
const HANDLE_GAP: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Inclusive on all edges.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left
            && point.x <= self.right()
            && point.y >= self.top
            && point.y <= self.bottom()
    }
}

/// A cell in the buffer. Ordered by row, then column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellPos {
    pub row: usize,
    pub col: u16,
}

impl CellPos {
    pub fn new(row: usize, col: u16) -> Self {
        Self { row, col }
    }
}

/// Where the terminal sits on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    /// Bounds of the terminal element in screen coordinates.
    pub terminal: Rect,
    /// Bounds of the hosting container in screen coordinates.
    pub container: Rect,
    pub screen_width: f64,
}

impl SurfaceGeometry {
    /// Terminal filling the whole container.
    pub fn filling(container: Rect, screen_width: f64) -> Self {
        Self {
            terminal: container,
            container,
            screen_width,
        }
    }

    /// Convert a screen point into container-relative coordinates.
    pub fn to_container(&self, point: Point) -> Point {
        Point::new(point.x - self.container.left, point.y - self.container.top)
    }
}

/// Whether a touch starting at `point` is likely a system back gesture.
pub fn is_edge_gesture(point: Point, screen_width: f64, threshold: f64) -> bool {
    point.x <= threshold || point.x >= screen_width - threshold
}

/// Map a screen point to the buffer cell under it.
///
/// Returns `None` for points outside the terminal element.
pub fn point_to_cell(
    point: Point,
    terminal: &Rect,
    cell: CellSize,
    cols: u16,
    viewport_y: usize,
) -> Option<CellPos> {
    let x = point.x - terminal.left;
    let y = point.y - terminal.top;
    if x < 0.0 || y < 0.0 || x > terminal.width || y > terminal.height {
        return None;
    }
    if !cell.is_usable() || cols == 0 {
        return None;
    }

    let col = ((x / cell.width).floor() as u64).min(cols as u64 - 1) as u16;
    let row = (y / cell.height).floor() as usize + viewport_y;
    Some(CellPos::new(row, col))
}

/// Top-left pixel of `pos`, relative to the container.
///
/// Returns `None` when the row is scrolled out of view.
pub fn cell_to_point(
    pos: CellPos,
    geometry: &SurfaceGeometry,
    cell: CellSize,
    viewport_y: usize,
    rows: u16,
) -> Option<Point> {
    if pos.row < viewport_y || pos.row >= viewport_y + rows as usize {
        return None;
    }
    let offset_x = geometry.terminal.left - geometry.container.left;
    let offset_y = geometry.terminal.top - geometry.container.top;
    let x = pos.col as f64 * cell.width + offset_x;
    let y = (pos.row - viewport_y) as f64 * cell.height + offset_y;
    Some(Point::new(x, y))
}

/// Number of cells from `start` to `end` inclusive, wrapping at `cols`.
///
/// `start` must not be after `end`. Columns past the right edge count as
/// the last column.
pub fn selection_length(start: CellPos, end: CellPos, cols: u16) -> usize {
    let last_col = cols.saturating_sub(1);
    let start_col = start.col.min(last_col) as usize;
    let end_col = end.col.min(last_col) as usize;
    if start.row == end.row {
        return end_col.saturating_sub(start_col) + 1;
    }
    let cols = cols as usize;
    let first = cols.saturating_sub(start_col);
    let middle = end.row.saturating_sub(start.row + 1) * cols;
    first + middle + end_col + 1
}

/// Top-left corner of the start handle for a cell at `cell_point`.
pub fn start_handle_origin(cell_point: Point, cell: CellSize, handle_size: f64) -> Point {
    Point::new(
        cell_point.x - handle_size / 2.0,
        cell_point.y + cell.height + HANDLE_GAP,
    )
}

/// Top-left corner of the end handle for a cell at `cell_point`.
pub fn end_handle_origin(cell_point: Point, cell: CellSize, handle_size: f64) -> Point {
    Point::new(
        cell_point.x + cell.width - handle_size / 2.0 - 1.0,
        cell_point.y + cell.height + HANDLE_GAP,
    )
}

/// Top-left corner of the context menu.
///
/// The menu is centred under the selection and kept inside the container.
/// If it would overflow the bottom it is moved above the selection.
pub fn menu_origin(
    start: Option<Point>,
    end: Option<Point>,
    cell: CellSize,
    container: &Rect,
    menu_width: f64,
    menu_height: f64,
) -> Option<Point> {
    let (center_x, base_y, top_y) = match (start, end) {
        (Some(s), Some(e)) => ((s.x + e.x) / 2.0, s.y.max(e.y), s.y.min(e.y)),
        (Some(p), None) | (None, Some(p)) => (p.x, p.y, p.y),
        (None, None) => return None,
    };

    let max_x = container.width - menu_width - MENU_MARGIN;
    let x = (center_x - menu_width / 2.0).min(max_x).max(MENU_MARGIN);

    let max_y = container.height - menu_height - MENU_MARGIN;
    let mut y = base_y + cell.height + MENU_GAP;
    if y > max_y {
        y = top_y - menu_height - MENU_MARGIN;
    }
    let y = y.min(max_y).max(MENU_MARGIN);

    Some(Point::new(x, y))
}
