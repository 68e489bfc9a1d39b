use serde::{Deserialize, Serialize};

/// Visible terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl std::fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// The terminal emulator a session renders into.
///
/// Keystrokes flow the other way, through [`crate::SessionHandle::send_input`].
pub trait TerminalIo: Send + Sync + 'static {
    /// Display raw output bytes, ANSI sequences included.
    fn write(&self, bytes: &[u8]);

    /// Geometry that fits the visible area, if it can be measured.
    fn size(&self) -> Option<TerminalSize>;

    /// Write a locally generated notice on its own line.
    fn notice(&self, text: &str) {
        self.write(format!("\r\n{text}\r\n").as_bytes());
    }
}
