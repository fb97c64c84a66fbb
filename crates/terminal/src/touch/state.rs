//! Selection range and gesture modes.

use super::geometry::CellPos;

/// Gesture the controller is in. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    #[default]
    Idle,
    /// One finger down, waiting for the hold timer.
    TapHoldPending,
    Selecting,
    /// Selecting, with a handle under the finger.
    HandleDragging(Handle),
    Pinching,
}

impl SelectionMode {
    pub fn is_selecting(&self) -> bool {
        matches!(self, SelectionMode::Selecting | SelectionMode::HandleDragging(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Start,
    End,
}

/// Two selection endpoints. They may be stored out of order; consumers use
/// [`ordered`](Self::ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub start: CellPos,
    pub end: CellPos,
}

impl SelectionRange {
    pub fn new(start: CellPos, end: CellPos) -> Self {
        Self { start, end }
    }

    pub fn single(pos: CellPos) -> Self {
        Self::new(pos, pos)
    }

    /// Endpoints in buffer order.
    pub fn ordered(&self) -> (CellPos, CellPos) {
        if self.start <= self.end {
            (self.start, self.end)
        } else {
            (self.end, self.start)
        }
    }

    /// Move the endpoint owned by `handle` to `pos`.
    ///
    /// When the dragged endpoint crosses the other one the endpoints swap
    /// and the returned handle is the one now under the finger.
    pub fn drag(&mut self, handle: Handle, pos: CellPos) -> Handle {
        match handle {
            Handle::Start => {
                self.start = pos;
                if pos > self.end {
                    std::mem::swap(&mut self.start, &mut self.end);
                    return Handle::End;
                }
                Handle::Start
            }
            Handle::End => {
                self.end = pos;
                if pos < self.start {
                    std::mem::swap(&mut self.start, &mut self.end);
                    return Handle::Start;
                }
                Handle::End
            }
        }
    }

    /// Pull both endpoints inside a grid `cols` wide.
    pub fn clamp_cols(&mut self, cols: u16) {
        let last = cols.saturating_sub(1);
        self.start.col = self.start.col.min(last);
        self.end.col = self.end.col.min(last);
    }

    /// Whether both endpoints fall inside a buffer of `buffer_length` lines.
    pub fn fits(&self, buffer_length: usize) -> bool {
        self.start.row < buffer_length && self.end.row < buffer_length
    }
}
