//! System clipboard seam.

use parking_lot::Mutex;

/// Host clipboard access.
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str);
    fn paste(&self) -> Option<String>;
}

/// Process-local clipboard, used when no system clipboard is available.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clipboard for MemoryClipboard {
    fn copy(&self, text: &str) {
        *self.contents.lock() = Some(text.to_string());
    }

    fn paste(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}
