//! Controlling-terminal plumbing. Unix only; the module is gated in `cli`.

use anyhow::Result;
use nix::libc;
use std::io::Write;

use ssh_session::{TerminalIo, TerminalSize};

/// RAII guard that saves terminal settings and restores them on drop.
pub struct TerminalGuard {
    original: Option<nix::sys::termios::Termios>,
}

impl TerminalGuard {
    pub fn new() -> Self {
        use nix::sys::termios;
        let stdin = std::io::stdin();
        let original = termios::tcgetattr(&stdin).ok();
        Self { original }
    }

    /// False when stdin is not a terminal.
    pub fn is_tty(&self) -> bool {
        self.original.is_some()
    }

    pub fn enter_raw_mode(&self) {
        if let Some(ref original) = self.original {
            use nix::sys::termios;
            let stdin = std::io::stdin();
            let mut raw = original.clone();
            termios::cfmakeraw(&mut raw);
            let _ = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, &raw);
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(ref original) = self.original {
            use nix::sys::termios;
            let stdin = std::io::stdin();
            let _ = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, original);
        }
    }
}

/// Get the current terminal size (rows, cols).
pub fn get_terminal_size() -> Result<(u16, u16)> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if ret == -1 {
        anyhow::bail!("ioctl TIOCGWINSZ failed");
    }
    if ws.ws_row == 0 || ws.ws_col == 0 {
        anyhow::bail!("terminal reports zero size");
    }
    Ok((ws.ws_row, ws.ws_col))
}

/// The controlling terminal: output to stdout, geometry from the tty.
pub struct StdioTerminal;

impl TerminalIo for StdioTerminal {
    fn write(&self, bytes: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }

    fn size(&self) -> Option<TerminalSize> {
        get_terminal_size()
            .ok()
            .map(|(rows, cols)| TerminalSize { cols, rows })
    }
}
