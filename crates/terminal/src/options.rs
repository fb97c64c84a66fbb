//! Terminal appearance and behaviour options.
//!
//! These are the values a session hands to its render engine. The stored copy
//! on the session is the source of truth; every update is applied to both.

use serde::{Deserialize, Serialize};

/// Smallest font size reachable through pinch or keyboard zoom.
pub const MIN_FONT_SIZE: u16 = 8;

/// Largest font size reachable through pinch or keyboard zoom.
pub const MAX_FONT_SIZE: u16 = 24;

pub const DEFAULT_FONT_SIZE: u16 = 14;

pub const DEFAULT_FONT_FAMILY: &str = "MesloLGS NF Regular";

/// Clamp a requested font size into the supported range.
pub fn clamp_font_size(size: i32) -> u16 {
    size.clamp(MIN_FONT_SIZE as i32, MAX_FONT_SIZE as i32) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStyle {
    #[default]
    Block,
    Underline,
    Bar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorInactiveStyle {
    Outline,
    Block,
    Bar,
    #[default]
    Underline,
    None,
}

/// Colour scheme. Values are CSS-style colour strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub background: String,
    pub foreground: String,
    pub cursor: String,
    pub cursor_accent: String,
    pub selection_background: String,
    pub selection_foreground: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: "#1e1e1e".to_string(),
            foreground: "#d4d4d4".to_string(),
            cursor: "#ffffff".to_string(),
            cursor_accent: "#1e1e1e".to_string(),
            selection_background: "#264f78".to_string(),
            selection_foreground: "#ffffff".to_string(),
        }
    }
}

/// Partial theme. Present fields replace the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemePatch {
    pub background: Option<String>,
    pub foreground: Option<String>,
    pub cursor: Option<String>,
    pub cursor_accent: Option<String>,
    pub selection_background: Option<String>,
    pub selection_foreground: Option<String>,
}

impl Theme {
    pub fn merge(&mut self, patch: &ThemePatch) {
        let fields = [
            (&mut self.background, &patch.background),
            (&mut self.foreground, &patch.foreground),
            (&mut self.cursor, &patch.cursor),
            (&mut self.cursor_accent, &patch.cursor_accent),
            (&mut self.selection_background, &patch.selection_background),
            (&mut self.selection_foreground, &patch.selection_foreground),
        ];
        for (slot, value) in fields {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
    }
}

/// Options applied to the render engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalOptions {
    pub font_size: u16,
    pub font_family: String,
    pub theme: Theme,
    pub cursor_blink: bool,
    pub cursor_style: CursorStyle,
    pub cursor_inactive_style: CursorInactiveStyle,
    pub scrollback: u32,
    pub tab_stop_width: u8,
    pub convert_eol: bool,
    pub letter_spacing: i16,
    pub image_support: bool,
    pub font_ligatures: bool,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            theme: Theme::default(),
            cursor_blink: true,
            cursor_style: CursorStyle::default(),
            cursor_inactive_style: CursorInactiveStyle::default(),
            scrollback: 1000,
            tab_stop_width: 4,
            convert_eol: true,
            letter_spacing: 0,
            image_support: false,
            font_ligatures: false,
        }
    }
}

/// Partial option update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsPatch {
    pub font_size: Option<u16>,
    pub font_family: Option<String>,
    pub theme: Option<ThemePatch>,
    pub cursor_blink: Option<bool>,
    pub cursor_style: Option<CursorStyle>,
    pub cursor_inactive_style: Option<CursorInactiveStyle>,
    pub scrollback: Option<u32>,
    pub tab_stop_width: Option<u8>,
    pub convert_eol: Option<bool>,
    pub letter_spacing: Option<i16>,
}

impl TerminalOptions {
    /// Apply a patch. Returns true if anything changed.
    pub fn apply(&mut self, patch: &OptionsPatch) -> bool {
        let before = self.clone();

        if let Some(size) = patch.font_size {
            self.font_size = clamp_font_size(size as i32);
        }
        if let Some(family) = &patch.font_family {
            self.font_family = family.clone();
        }
        if let Some(theme) = &patch.theme {
            self.theme.merge(theme);
        }
        if let Some(blink) = patch.cursor_blink {
            self.cursor_blink = blink;
        }
        if let Some(style) = patch.cursor_style {
            self.cursor_style = style;
        }
        if let Some(style) = patch.cursor_inactive_style {
            self.cursor_inactive_style = style;
        }
        if let Some(scrollback) = patch.scrollback {
            self.scrollback = scrollback;
        }
        if let Some(width) = patch.tab_stop_width {
            self.tab_stop_width = width;
        }
        if let Some(convert) = patch.convert_eol {
            self.convert_eol = convert;
        }
        if let Some(spacing) = patch.letter_spacing {
            self.letter_spacing = spacing;
        }

        *self != before
    }
}
