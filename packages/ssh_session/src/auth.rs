//! Short-lived WebSocket token acquisition.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{COOKIE, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::SessionError;

/// Issues the single-use token that authenticates one WebSocket upgrade.
pub trait TokenSource: Send + Sync + 'static {
    fn fetch_token(&self) -> impl Future<Output = Result<String, SessionError>> + Send;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches tokens from `GET /api/v1/auth/ws-token`, authenticated by the
/// dashboard's login cookie.
#[derive(Clone)]
pub struct HttpTokenSource {
    client: reqwest::Client,
    endpoint: Endpoint,
    cookie: Option<HeaderValue>,
}

impl HttpTokenSource {
    pub fn new(
        endpoint: Endpoint,
        session_cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SessionError::from_reqwest)?;
        let cookie = session_cookie
            .map(|c| {
                let mut value = HeaderValue::from_str(c)
                    .map_err(|_| SessionError::Transport("session cookie is not a valid header".into()))?;
                value.set_sensitive(true);
                Ok::<_, SessionError>(value)
            })
            .transpose()?;
        Ok(Self {
            client,
            endpoint,
            cookie,
        })
    }
}

impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<String, SessionError> {
        let url = self.endpoint.token_url();
        debug!(%url, "requesting websocket token");

        let mut request = self.client.get(url);
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie.clone());
        }
        let resp = request.send().await.map_err(SessionError::from_reqwest)?;

        match resp.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SessionError::Unauthorized);
            }
            status => return Err(SessionError::TokenRejected(status.as_u16())),
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::TokenMalformed(e.to_string()))?;
        if body.token.is_empty() {
            return Err(SessionError::TokenMalformed("empty token".into()));
        }
        Ok(body.token)
    }
}
