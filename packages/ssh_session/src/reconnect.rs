use std::time::Duration;

/// WebSocket close codes the controller gives meaning to.
pub mod close_code {
    /// Normal closure, usually user initiated.
    pub const NORMAL: u16 = 1000;
    /// No close frame was received. Treated as an expired session.
    pub const ABNORMAL: u16 = 1006;
    /// Policy violation, used by the gateway for auth failures.
    pub const POLICY: u16 = 1008;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Fixed delay before a retry.
    pub backoff: Duration,
    /// Consecutive automatic retries allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            backoff: Duration::from_secs(3),
            max_attempts: 10,
        }
    }
}

/// What the controller knows when a socket closes.
#[derive(Debug, Clone, Copy)]
pub struct CloseContext {
    pub code: u16,
    /// A `connected` frame was seen on this socket.
    pub was_connected: bool,
    pub view_open: bool,
    /// Automatic retries already made since the session was last established.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseVerdict {
    /// Schedule a retry after the backoff.
    Reconnect { delay: Duration },
    /// Closed before the SSH session came up with an abnormal code.
    Reauthenticate,
    /// Go idle.
    Stop,
}

impl ReconnectPolicy {
    pub fn judge(&self, ctx: CloseContext) -> CloseVerdict {
        if !ctx.was_connected {
            return if ctx.code == close_code::ABNORMAL {
                CloseVerdict::Reauthenticate
            } else {
                CloseVerdict::Stop
            };
        }
        let reserved = matches!(
            ctx.code,
            close_code::NORMAL | close_code::ABNORMAL | close_code::POLICY
        );
        if self.enabled && ctx.view_open && !reserved
            && ctx.attempts < self.max_attempts
        {
            CloseVerdict::Reconnect {
                delay: self.backoff,
            }
        } else {
            CloseVerdict::Stop
        }
    }
}
