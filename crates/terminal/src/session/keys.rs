//! Keyboard shortcuts handled before keys reach the shell.

use std::fmt;
use std::str::FromStr;

/// A key press with its modifiers. `key` is the logical key, e.g. `"C"` or `"="`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChord {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
    pub key: String,
}

impl KeyChord {
    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            ctrl: true,
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn ctrl_shift(key: impl Into<String>) -> Self {
        Self {
            ctrl: true,
            shift: true,
            key: key.into(),
            ..Default::default()
        }
    }

    fn key_is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    fn is_modifier_only(&self) -> bool {
        matches!(self.key.as_str(), "Control" | "Alt" | "Meta" | "Shift")
    }

    fn same_modifiers(&self, other: &KeyChord) -> bool {
        self.ctrl == other.ctrl
            && self.shift == other.shift
            && self.alt == other.alt
            && self.meta == other.meta
    }
}

/// Parse failure for a binding string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidChord(pub String);

impl fmt::Display for InvalidChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid key binding: {:?}", self.0)
    }
}

impl std::error::Error for InvalidChord {}

impl FromStr for KeyChord {
    type Err = InvalidChord;

    /// Parses `Ctrl-Shift-P` style chords. `Ctrl--` binds the minus key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chord = KeyChord::default();
        let (modifiers, key) = match s.strip_suffix("--") {
            Some(head) => (head, "-"),
            None => match s.rsplit_once('-') {
                Some((head, key)) => (head, key),
                None => ("", s),
            },
        };

        for part in modifiers.split('-').filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" => chord.ctrl = true,
                "shift" => chord.shift = true,
                "alt" => chord.alt = true,
                "meta" | "cmd" => chord.meta = true,
                _ => return Err(InvalidChord(s.to_string())),
            }
        }

        if key.is_empty() {
            return Err(InvalidChord(s.to_string()));
        }
        chord.key = key.to_string();
        Ok(chord)
    }
}

/// What a session does with a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Copy,
    Paste,
    IncreaseFontSize,
    DecreaseFontSize,
    /// Belongs to the host application, not the shell.
    ForwardToApp,
    PassThrough,
}

/// Built-in shortcuts plus the host application's bindings.
#[derive(Debug, Clone, Default)]
pub struct KeyBindings {
    app: Vec<KeyChord>,
}

impl KeyBindings {
    /// Build from binding strings like `"Ctrl-S|Ctrl-Shift-S"`. Unparseable
    /// entries are logged and skipped.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Self {
        let mut app = Vec::new();
        for spec in specs {
            for combo in spec.as_ref().split('|').map(str::trim).filter(|c| !c.is_empty()) {
                match combo.parse::<KeyChord>() {
                    Ok(chord) => app.push(chord),
                    Err(e) => tracing::warn!("Skipping key binding: {}", e),
                }
            }
        }
        Self { app }
    }

    pub fn app_bindings(&self) -> &[KeyChord] {
        &self.app
    }

    pub fn classify(&self, chord: &KeyChord) -> KeyAction {
        if chord.ctrl && chord.shift && chord.key_is("C") {
            return KeyAction::Copy;
        }
        if chord.ctrl && chord.shift && chord.key_is("V") {
            return KeyAction::Paste;
        }
        if chord.ctrl && (chord.key == "+" || chord.key == "=") {
            return KeyAction::IncreaseFontSize;
        }
        if chord.ctrl && chord.key == "-" {
            return KeyAction::DecreaseFontSize;
        }

        if !(chord.ctrl || chord.alt || chord.meta) || chord.is_modifier_only() {
            return KeyAction::PassThrough;
        }

        let is_app = self
            .app
            .iter()
            .any(|binding| binding.same_modifiers(chord) && binding.key_is(&chord.key));
        if is_app {
            KeyAction::ForwardToApp
        } else {
            KeyAction::PassThrough
        }
    }
}
