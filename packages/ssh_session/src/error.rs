use tokio_tungstenite::tungstenite;

/// Broad failure classes. Every session error belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Token fetch failed or the session expired before the SSH handshake.
    /// Never retried automatically.
    Authentication,
    /// Socket errors and sends into a socket that is not open.
    Transport,
    /// Frames that could not be decoded. Logged, never shown to the user.
    Protocol,
    /// `error` frames reported by the gateway.
    Remote,
    /// Credentials rejected before any network activity.
    Validation,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("token request failed with HTTP {0}")]
    TokenRejected(u16),

    #[error("token response was malformed: {0}")]
    TokenMalformed(String),

    #[error("session likely expired, please reauthenticate")]
    SessionExpired,

    #[error("server is unavailable")]
    Unavailable,

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("cannot send {frame} frame: socket is not open")]
    NotOpen { frame: &'static str },

    #[error("connection closed before the session was established (code {0})")]
    ClosedBeforeConnect(u16),

    #[error("timed out waiting for the SSH session to start")]
    HandshakeTimeout,

    #[error("{0}")]
    Remote(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    #[error("session has ended")]
    Ended,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized
            | Self::TokenRejected(_)
            | Self::TokenMalformed(_)
            | Self::SessionExpired => ErrorKind::Authentication,
            Self::Unavailable
            | Self::Transport(_)
            | Self::NotOpen { .. }
            | Self::ClosedBeforeConnect(_)
            | Self::HandshakeTimeout
            | Self::Ended => ErrorKind::Transport,
            Self::Remote(_) => ErrorKind::Remote,
            Self::InvalidCredentials(_) => ErrorKind::Validation,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Authentication failures end the attempt and suppress reconnection.
    pub fn is_authentication(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Transport(err.to_string())
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable
            }
            // The gateway refuses the upgrade when the token is stale.
            tungstenite::Error::Http(response)
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                Self::SessionExpired
            }
            _ => Self::Transport(err.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to encode {frame} frame: {source}")]
    Encode {
        frame: &'static str,
        source: serde_json::Error,
    },
}
