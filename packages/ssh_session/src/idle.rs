//! Inactivity warning and disconnect timers.

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// How long a connected session may sit without traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Inactivity after which the session is closed.
    pub total: Duration,
    /// Lead time of the warning before the disconnect.
    pub warning: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            total: Duration::from_secs(15 * 60),
            warning: Duration::from_secs(60),
        }
    }
}

impl IdlePolicy {
    /// Delay from the last activity until the warning fires.
    pub fn warning_after(&self) -> Duration {
        self.total.saturating_sub(self.warning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAlarm {
    Warning,
    Disconnect,
}

/// The pair of cancellable timers owned by a session.
///
/// Both sleeps live as long as the session and are re-armed in place, so a
/// reset on every frame costs two deadline updates and no allocation.
pub struct IdleTimers {
    policy: IdlePolicy,
    warning: Pin<Box<Sleep>>,
    disconnect: Pin<Box<Sleep>>,
    warning_armed: bool,
    disconnect_armed: bool,
}

impl IdleTimers {
    pub fn new(policy: IdlePolicy) -> Self {
        let now = Instant::now();
        Self {
            policy,
            warning: Box::pin(tokio::time::sleep_until(now + policy.warning_after())),
            disconnect: Box::pin(tokio::time::sleep_until(now + policy.total)),
            warning_armed: false,
            disconnect_armed: false,
        }
    }

    pub fn policy(&self) -> IdlePolicy {
        self.policy
    }

    /// Cancel both timers and schedule them again from now.
    pub fn restart(&mut self) {
        let now = Instant::now();
        self.warning
            .as_mut()
            .reset(now + self.policy.warning_after());
        self.disconnect.as_mut().reset(now + self.policy.total);
        self.warning_armed = true;
        self.disconnect_armed = true;
    }

    pub fn cancel(&mut self) {
        self.warning_armed = false;
        self.disconnect_armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.disconnect_armed
    }

    /// When the session will be closed for inactivity, if the timers run.
    pub fn disconnect_deadline(&self) -> Option<Instant> {
        self.disconnect_armed.then(|| self.disconnect.deadline())
    }

    pub fn warning_deadline(&self) -> Option<Instant> {
        self.warning_armed.then(|| self.warning.deadline())
    }

    /// Resolves with the next alarm. Pending forever while disarmed.
    ///
    /// Cancel safe: dropping the future leaves both deadlines untouched.
    pub async fn expired(&mut self) -> IdleAlarm {
        if !self.disconnect_armed {
            return std::future::pending().await;
        }
        if !self.warning_armed {
            self.disconnect.as_mut().await;
            self.cancel();
            return IdleAlarm::Disconnect;
        }
        tokio::select! {
            biased;
            () = self.disconnect.as_mut() => {
                self.cancel();
                IdleAlarm::Disconnect
            }
            () = self.warning.as_mut() => {
                self.warning_armed = false;
                IdleAlarm::Warning
            }
        }
    }
}
