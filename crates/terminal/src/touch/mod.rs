//! Touch selection and gestures over a rendered terminal.
//!
//! The controller is a synchronous state machine. The host feeds it touch
//! events stamped with the time they happened, plus [`TouchInput::Tick`]
//! when [`TouchSelectionController::next_deadline`] passes. It drives the
//! engine's selection directly and hands everything else back as
//! [`TouchEffect`]s.

mod controller;
pub mod geometry;
pub mod state;
pub mod word;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use controller::{MenuAction, Overlay, TouchEffect, TouchInput, TouchSelectionController};
pub use geometry::{CellPos, Point, Rect, SurfaceGeometry};
pub use state::{Handle, SelectionMode, SelectionRange};

/// Touch tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    /// Hold time before a touch starts a selection, in milliseconds.
    pub tap_hold_ms: u64,
    /// Movement in pixels that cancels a hold or starts a drag.
    pub move_threshold: f64,
    pub handle_size: f64,
    pub haptic_feedback: bool,
    pub show_context_menu: bool,
    /// Handles are dragged this many pixels above the finger.
    pub finger_offset: f64,
    /// Touches this close to a screen edge are left to the system.
    pub edge_threshold: f64,
    /// Fresh selections ignore clears for this long, in milliseconds.
    pub protection_ms: u64,
    /// Minimum interval between pinch zoom steps, in milliseconds.
    pub zoom_throttle_ms: u64,
    pub menu_width: f64,
    pub menu_height: f64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            tap_hold_ms: 600,
            move_threshold: 8.0,
            handle_size: 24.0,
            haptic_feedback: true,
            show_context_menu: true,
            finger_offset: 40.0,
            edge_threshold: 30.0,
            protection_ms: 1000,
            zoom_throttle_ms: 50,
            menu_width: 200.0,
            menu_height: 50.0,
        }
    }
}

impl TouchConfig {
    pub fn tap_hold(&self) -> Duration {
        Duration::from_millis(self.tap_hold_ms)
    }

    pub fn protection(&self) -> Duration {
        Duration::from_millis(self.protection_ms)
    }

    pub fn zoom_throttle(&self) -> Duration {
        Duration::from_millis(self.zoom_throttle_ms)
    }
}
