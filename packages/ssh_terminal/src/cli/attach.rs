use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use ssh_session::{
    ConnectionState, Credentials, HttpTokenSource, SessionActor, SessionConfig, WsTransport,
};

use crate::cli::terminal::{StdioTerminal, TerminalGuard};

const DETACH_BYTE: u8 = 0x1D; // Ctrl-]

/// How an interactive session ended.
#[derive(Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    /// User pressed Ctrl-].
    Detached,
    /// The session went idle on its own: remote logout, idle timeout, or a
    /// close that was not retried.
    Ended,
    /// The session never came up, or ended on an error.
    Failed(String),
}

/// Run an interactive session on the controlling terminal until it ends or
/// the user detaches.
pub async fn attach(
    host_id: &str,
    config: SessionConfig,
    tokens: HttpTokenSource,
    credentials: Credentials,
) -> Result<AttachOutcome> {
    let transport = WsTransport::new(config.transport.clone());
    let session = SessionActor::spawn(host_id, config, tokens, transport, StdioTerminal);
    let mut status = session.subscribe();

    // 1. Enter raw mode
    let guard = TerminalGuard::new();
    if !guard.is_tty() {
        anyhow::bail!("stdin is not a terminal");
    }
    guard.enter_raw_mode();
    eprint!("\r[sshterm: connecting to {host_id} -- Ctrl-] to detach]\r\n");

    session.connect(credentials)?;

    // 2. SIGWINCH drives resizes
    let mut sigwinch =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())?;

    // 3. Blocking stdin reader thread (with poll so it can shut down cleanly)
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    let stdin_shutdown = Arc::new(AtomicBool::new(false));
    let stdin_shutdown_thread = stdin_shutdown.clone();
    std::thread::spawn(move || {
        use std::io::Read;
        use std::os::fd::AsRawFd;
        let stdin = std::io::stdin();
        let stdin_fd = stdin.as_raw_fd();
        let mut buf = [0u8; 4096];
        loop {
            if stdin_shutdown_thread.load(Ordering::Relaxed) {
                break;
            }
            // Poll stdin with 100ms timeout so we can check the shutdown flag
            let mut pfd = nix::libc::pollfd {
                fd: stdin_fd,
                events: nix::libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { nix::libc::poll(&mut pfd, 1, 100) };
            if ret <= 0 {
                continue;
            }
            let mut handle = stdin.lock();
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    drop(handle);
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // 4. Main select loop
    let mut keys = Utf8Assembler::default();
    let mut left_idle = false;
    let outcome = loop {
        tokio::select! {
            Some(data) = stdin_rx.recv() => {
                if let Some(pos) = data.iter().position(|&b| b == DETACH_BYTE) {
                    // Send everything before the detach byte
                    if let Some(text) = keys.push(&data[..pos]) {
                        let _ = session.send_input(text.as_bytes());
                    }
                    break AttachOutcome::Detached;
                }
                if let Some(text) = keys.push(&data) {
                    let _ = session.send_input(text.as_bytes());
                }
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break AttachOutcome::Ended;
                }
                let snapshot = status.borrow_and_update().clone();
                debug!(state = %snapshot.state, "session state");
                if snapshot.state != ConnectionState::Idle {
                    left_idle = true;
                } else if left_idle || snapshot.last_error.is_some() {
                    break match snapshot.last_error {
                        Some(err) => AttachOutcome::Failed(err),
                        None => AttachOutcome::Ended,
                    };
                }
            }

            _ = sigwinch.recv() => session.viewport_changed(),
        }
    };

    // 5. Clean exit: hang up, stop the stdin reader, restore the terminal
    let _ = session.close();
    if tokio::time::timeout(Duration::from_secs(2), session.closed())
        .await
        .is_err()
    {
        debug!("session actor did not stop in time");
    }
    stdin_shutdown.store(true, Ordering::Relaxed);
    drop(guard);

    info!(host_id, ?outcome, "attach finished");
    match &outcome {
        AttachOutcome::Detached => eprintln!("\r\n[sshterm: detached]"),
        AttachOutcome::Ended => eprintln!("\r\n[sshterm: session ended]"),
        AttachOutcome::Failed(_) => {}
    }
    Ok(outcome)
}

/// Reassembles keystrokes split across reads so multi-byte characters are
/// never forwarded in halves.
#[derive(Default)]
struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    /// Append `bytes` and return the complete text so far, if any.
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // An incomplete sequence at the end waits for the next read.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid bytes are passed through and replaced.
            Err(_) => self.pending.len(),
        };
        if complete == 0 {
            return None;
        }
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        Some(text)
    }
}
