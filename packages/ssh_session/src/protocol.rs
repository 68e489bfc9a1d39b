//! JSON control frames exchanged with the terminal gateway.
//!
//! Every frame is a single JSON object carrying a `type` discriminator.
//! Outbound frames borrow their payload so that secrets are only ever
//! copied into the encoded text that goes on the wire.

use serde::{Deserialize, Serialize};

use crate::credentials::{AuthMethod, Credentials};
use crate::error::ProtocolError;
use crate::terminal::TerminalSize;

/// Terminal type requested for the remote PTY.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Frames sent by the client.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame<'a> {
    Connect {
        username: &'a str,
        port: u16,
        terminal: &'a str,
        cols: u16,
        rows: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<&'a str>,
        #[serde(rename = "privateKey", skip_serializing_if = "Option::is_none")]
        private_key: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        passphrase: Option<&'a str>,
    },
    Input {
        data: &'a str,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    Disconnect,
}

impl<'a> ClientFrame<'a> {
    /// Build the `connect` frame for the selected auth method. Exactly one of
    /// `password` / `privateKey` is populated.
    pub fn connect(credentials: &'a Credentials, terminal: &'a str, size: TerminalSize) -> Self {
        let (password, private_key, passphrase) = match credentials.method() {
            AuthMethod::Password { password } => (Some(password.expose()), None, None),
            AuthMethod::PrivateKey {
                private_key,
                passphrase,
            } => (
                None,
                Some(private_key.expose()),
                passphrase
                    .as_ref()
                    .map(|p| p.expose())
                    .filter(|p| !p.is_empty()),
            ),
        };
        Self::Connect {
            username: credentials.username(),
            port: credentials.port(),
            terminal,
            cols: size.cols,
            rows: size.rows,
            password,
            private_key,
            passphrase,
        }
    }

    /// Frame name, as it appears in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::Disconnect => "disconnect",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            frame: self.name(),
            source,
        })
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ClientFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect {
                username,
                port,
                cols,
                rows,
                private_key,
                ..
            } => f
                .debug_struct("Connect")
                .field("username", username)
                .field("port", port)
                .field("cols", cols)
                .field("rows", rows)
                .field(
                    "auth",
                    &if private_key.is_some() {
                        "private-key"
                    } else {
                        "password"
                    },
                )
                .finish(),
            Self::Input { data } => f.debug_struct("Input").field("len", &data.len()).finish(),
            Self::Resize { cols, rows } => f
                .debug_struct("Resize")
                .field("cols", cols)
                .field("rows", rows)
                .finish(),
            Self::Disconnect => f.write_str("Disconnect"),
        }
    }
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// SSH session established.
    Connected,
    /// Raw PTY output.
    Data { data: String },
    Error { message: String },
    /// The remote SSH session ended; the socket may stay open.
    Closed,
    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
