//! NAS REST client
//!
//! Wraps `reqwest::Client` with bearer authentication and path construction.
//! Path segments are percent-encoded one by one, so entry names can be passed
//! as they are on disk.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nasbackup_remote::client::NasClient;
//! use reqwest::Method;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = NasClient::new("http://192.168.1.20:3000")?.with_token("token");
//! let response = client.request(Method::GET, &["drives"])?.send().await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use crate::RemoteError;

/// HTTP client for the NAS API
#[derive(Debug, Clone)]
pub struct NasClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl NasClient {
    /// Creates a client without credentials.
    ///
    /// # Errors
    /// [`RemoteError::InvalidBaseUrl`] when `base_url` does not parse or
    /// cannot carry path segments (e.g. `mailto:`).
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let parsed =
            Url::parse(base_url).map_err(|e| RemoteError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(RemoteError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base_url: parsed,
            token: None,
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Replaces the bearer token (e.g. after a login or logout)
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
        debug!(authenticated = self.token.is_some(), "Updated NasClient token");
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for `segments` below the base URL
    pub fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Creates an authenticated request builder for `segments`
    pub fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, RemoteError> {
        let url = self.url(segments)?;
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

/// Maps a non-success response to a [`RemoteError`], keeping the body text.
pub async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(body),
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::CONFLICT => RemoteError::Conflict(body),
        _ => RemoteError::ServerError {
            status: status.as_u16(),
            body,
        },
    })
}
