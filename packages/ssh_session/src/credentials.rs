//! SSH credentials held for the lifetime of a session.
//!
//! Secrets are wiped with `zeroize` when cleared or dropped and are redacted
//! from `Debug`/`Display`. Nothing here is ever serialized to disk.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SessionError;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// A string that is zeroed when cleared or dropped.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self { inner: s.into() }
    }

    /// Borrow the secret. Keep the borrow short-lived.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Zero the buffer and leave an empty string behind.
    pub fn clear(&mut self) {
        self.inner.zeroize();
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString([REDACTED, {} bytes])", self.inner.len())
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub enum AuthMethod {
    Password {
        password: SecretString,
    },
    PrivateKey {
        private_key: SecretString,
        passphrase: Option<SecretString>,
    },
}

#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    port: u16,
    method: AuthMethod,
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            port,
            method: AuthMethod::Password {
                password: SecretString::new(password),
            },
        }
    }

    pub fn private_key(
        username: impl Into<String>,
        private_key: impl Into<String>,
        passphrase: Option<&str>,
        port: u16,
    ) -> Self {
        Self {
            username: username.into(),
            port,
            method: AuthMethod::PrivateKey {
                private_key: SecretString::new(private_key),
                passphrase: passphrase.map(SecretString::new),
            },
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Reject credentials the gateway would refuse anyway.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.username.trim().is_empty() {
            return Err(SessionError::InvalidCredentials("username is required"));
        }
        if self.port == 0 {
            return Err(SessionError::InvalidCredentials(
                "port must be between 1 and 65535",
            ));
        }
        match &self.method {
            AuthMethod::Password { password } if password.is_empty() => Err(
                SessionError::InvalidCredentials("password is required"),
            ),
            AuthMethod::PrivateKey { private_key, .. } if private_key.is_empty() => Err(
                SessionError::InvalidCredentials("private key is required"),
            ),
            _ => Ok(()),
        }
    }

    /// Wipe every secret field in place. The username is cleared as well.
    pub fn clear(&mut self) {
        self.username.zeroize();
        match &mut self.method {
            AuthMethod::Password { password } => password.clear(),
            AuthMethod::PrivateKey {
                private_key,
                passphrase,
            } => {
                private_key.clear();
                if let Some(p) = passphrase.as_mut() {
                    p.clear();
                }
            }
        }
    }

    /// True once every secret field is empty.
    pub fn is_cleared(&self) -> bool {
        match &self.method {
            AuthMethod::Password { password } => password.is_empty(),
            AuthMethod::PrivateKey {
                private_key,
                passphrase,
            } => private_key.is_empty() && passphrase.as_ref().is_none_or(|p| p.is_empty()),
        }
    }
}
