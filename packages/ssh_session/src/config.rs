use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::idle::IdlePolicy;
use crate::protocol::DEFAULT_TERM;
use crate::reconnect::ReconnectPolicy;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [idle]
//                    timeout_secs = 600
//
//   env var:         SSHTERM_IDLE__TIMEOUT_SECS=600   (double underscore = nesting)

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("server.base_url is not set")]
    MissingBaseUrl,

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("idle.warning_secs ({warning}) must be shorter than idle.timeout_secs ({total})")]
    WarningNotBeforeTimeout { warning: u64, total: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level tunable configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub idle: IdleFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub transport: TransportFileConfig,
    #[serde(default)]
    pub terminal: TerminalFileConfig,
}

/// Backend location and ambient auth (lives under `[server]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Raw `Cookie` header value carrying the dashboard login session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdleFileConfig {
    #[serde(default = "default_idle_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_idle_warning")]
    pub warning_secs: u64,
}

impl Default for IdleFileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_idle_timeout(),
            warning_secs: default_idle_warning(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backoff_secs: default_backoff(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    /// Client ping interval; 0 disables keepalive pings.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_max_frame_kib")]
    pub max_frame_kib: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Drop a socket that delivers nothing, pongs included, for this long;
    /// 0 disables the check.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// How long to wait for `connected` after sending `connect`.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive(),
            max_frame_kib: default_max_frame_kib(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalFileConfig {
    #[serde(default = "default_term")]
    pub term: String,
}

impl Default for TerminalFileConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    15 * 60
}
fn default_idle_warning() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_backoff() -> u64 {
    3
}
fn default_max_attempts() -> u32 {
    10
}
fn default_keepalive() -> u64 {
    30
}
fn default_max_frame_kib() -> usize {
    1024
}
fn default_connect_timeout() -> u64 {
    20
}
fn default_read_timeout() -> u64 {
    90
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_term() -> String {
    DEFAULT_TERM.to_string()
}

/// Default location of `config.toml`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sshterm")
}

/// Build a figment that layers: defaults → config.toml → SSHTERM_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SSHTERM_SERVER__BASE_URL=https://…`  →  `server.base_url`
///   `SSHTERM_RECONNECT__ENABLED=false`    →  `reconnect.enabled`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("SSHTERM_").split("__"))
}

// =============================================================================
// Resolved runtime config
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub keepalive: Option<Duration>,
    pub max_frame_bytes: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keepalive: Some(Duration::from_secs(default_keepalive())),
            max_frame_bytes: default_max_frame_kib() * 1024,
            connect_timeout: Duration::from_secs(default_connect_timeout()),
            read_timeout: Some(Duration::from_secs(default_read_timeout())),
            handshake_timeout: Duration::from_secs(default_handshake_timeout()),
        }
    }
}

/// Everything a session needs besides its collaborators.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub session_cookie: Option<String>,
    pub idle: IdlePolicy,
    pub reconnect: ReconnectPolicy,
    pub transport: TransportConfig,
    pub term: String,
}

impl SessionConfig {
    /// Defaults for everything except the backend location.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session_cookie: None,
            idle: IdlePolicy::default(),
            reconnect: ReconnectPolicy::default(),
            transport: TransportConfig::default(),
            term: default_term(),
        }
    }

    pub fn from_file(fc: &FileConfig) -> Result<Self, ConfigError> {
        let base_url = fc
            .server
            .base_url
            .as_deref()
            .ok_or(ConfigError::MissingBaseUrl)?;
        let endpoint = Endpoint::parse(base_url)?;

        if fc.idle.timeout_secs == 0 {
            return Err(ConfigError::Zero("idle.timeout_secs"));
        }
        if fc.idle.warning_secs >= fc.idle.timeout_secs {
            return Err(ConfigError::WarningNotBeforeTimeout {
                warning: fc.idle.warning_secs,
                total: fc.idle.timeout_secs,
            });
        }
        if fc.transport.max_frame_kib == 0 {
            return Err(ConfigError::Zero("transport.max_frame_kib"));
        }
        if fc.transport.connect_timeout_secs == 0 {
            return Err(ConfigError::Zero("transport.connect_timeout_secs"));
        }
        if fc.transport.handshake_timeout_secs == 0 {
            return Err(ConfigError::Zero("transport.handshake_timeout_secs"));
        }

        Ok(Self {
            endpoint,
            session_cookie: fc
                .server
                .session_cookie
                .clone()
                .filter(|c| !c.trim().is_empty()),
            idle: IdlePolicy {
                total: Duration::from_secs(fc.idle.timeout_secs),
                warning: Duration::from_secs(fc.idle.warning_secs),
            },
            reconnect: ReconnectPolicy {
                enabled: fc.reconnect.enabled,
                backoff: Duration::from_secs(fc.reconnect.backoff_secs),
                max_attempts: fc.reconnect.max_attempts,
            },
            transport: TransportConfig {
                keepalive: (fc.transport.keepalive_secs > 0)
                    .then(|| Duration::from_secs(fc.transport.keepalive_secs)),
                max_frame_bytes: fc.transport.max_frame_kib * 1024,
                connect_timeout: Duration::from_secs(fc.transport.connect_timeout_secs),
                read_timeout: (fc.transport.read_timeout_secs > 0)
                    .then(|| Duration::from_secs(fc.transport.read_timeout_secs)),
                handshake_timeout: Duration::from_secs(fc.transport.handshake_timeout_secs),
            },
            term: if fc.terminal.term.trim().is_empty() {
                default_term()
            } else {
                fc.terminal.term.clone()
            },
        })
    }
}
