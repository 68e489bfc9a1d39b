use url::Url;

use crate::config::ConfigError;

/// The dashboard backend a session talks to.
///
/// Accepts `http(s)://` or `ws(s)://` base URLs; a bare host is assumed to
/// be served over TLS. REST calls use the http form and the terminal socket
/// the ws form, `wss` whenever the backend is on TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    pub fn parse(base: &str) -> Result<Self, ConfigError> {
        let trimmed = base.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        let normalized = if let Some(rest) = trimmed.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("ws://") {
            format!("http://{rest}")
        } else if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
            trimmed.to_string()
        } else if trimmed.contains("://") {
            return Err(ConfigError::InvalidBaseUrl {
                url: base.to_string(),
                reason: "scheme must be http, https, ws or wss".into(),
            });
        } else {
            tracing::warn!(url = %trimmed, "base URL has no scheme, assuming https");
            format!("https://{trimmed}")
        };
        let base = Url::parse(&normalized).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        if base.host_str().is_none() {
            return Err(ConfigError::InvalidBaseUrl {
                url: base.to_string(),
                reason: "missing host".into(),
            });
        }
        Ok(Self { base })
    }

    pub fn is_tls(&self) -> bool {
        self.base.scheme() == "https"
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `GET` target for the short-lived WebSocket token.
    pub fn token_url(&self) -> Url {
        Self::with_segments(self.base.clone(), &["api", "v1", "auth", "ws-token"])
    }

    /// Terminal socket URL for `host_id`, authenticated by `token`.
    pub fn terminal_url(&self, host_id: &str, token: &str) -> Url {
        let scheme = if self.is_tls() { "wss" } else { "ws" };
        let rest = &self.base.as_str()[self.base.scheme().len()..];
        let mut url = match Url::parse(&format!("{scheme}{rest}")) {
            Ok(url) => url,
            Err(_) => self.base.clone(),
        };
        url.set_query(None);
        url = Self::with_segments(url, &["api", "v1", "ssh-terminal", host_id]);
        url.query_pairs_mut().append_pair("token", token);
        url
    }

    fn with_segments(mut url: Url, segments: &[&str]) -> Url {
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}
