//! SSH Session - browser-style remote terminal sessions over a WebSocket gateway
//!
//! This crate drives one interactive SSH session per terminal view. The
//! gateway does the actual SSH; this side fetches a short-lived token,
//! opens the terminal socket, forwards keystrokes and resizes, renders
//! output, and takes care of idle timeouts and reconnection.
//!
//! # Example
//!
//! ```no_run
//! use ssh_session::{
//!     Credentials, Endpoint, HttpTokenSource, SessionActor, SessionConfig, TerminalIo,
//!     TerminalSize, WsTransport,
//! };
//!
//! struct Stdout;
//!
//! impl TerminalIo for Stdout {
//!     fn write(&self, bytes: &[u8]) {
//!         use std::io::Write;
//!         let _ = std::io::stdout().write_all(bytes);
//!     }
//!
//!     fn size(&self) -> Option<TerminalSize> {
//!         None
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new(Endpoint::parse("https://patch.example.com")?);
//!     let tokens = HttpTokenSource::new(
//!         config.endpoint.clone(),
//!         Some("session=..."),
//!         config.transport.connect_timeout,
//!     )?;
//!     let transport = WsTransport::new(config.transport.clone());
//!
//!     let session = SessionActor::spawn("host-42", config, tokens, transport, Stdout);
//!     session.connect(Credentials::password("root", "hunter2", 22))?;
//!
//!     session.send_input(b"uptime\r")?;
//!     session.disconnect()?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod idle;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod terminal;
pub mod transport;

pub use auth::{HttpTokenSource, TokenSource};
pub use config::{ConfigError, FileConfig, SessionConfig, TransportConfig, load_config};
pub use credentials::{AuthMethod, Credentials, DEFAULT_SSH_PORT, SecretString};
pub use endpoint::Endpoint;
pub use error::{ErrorKind, ProtocolError, SessionError};
pub use idle::IdlePolicy;
pub use reconnect::ReconnectPolicy;
pub use session::{ConnectionState, SessionActor, SessionHandle, SessionStatus};
pub use terminal::{TerminalIo, TerminalSize};
pub use transport::{Socket, SocketEvent, SocketPeer, Transport, WsTransport};
