//! HTTP replay of queued actions

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{HttpMethod, SyncAction};
use crate::util::{error_excerpt, join_url, non_blank, normalize_base_url};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid replay request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// The server could not be reached at all, as opposed to answering badly
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Http(error) if error.is_connect() || error.is_timeout())
    }
}

/// Sends one queued action to its business endpoint.
///
/// `Ok` means the server answered 2xx; everything else is an error.
pub trait Transport: Send + Sync {
    fn send(&self, action: &SyncAction) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    async fn send(&self, action: &SyncAction) -> Result<(), TransportError> {
        self.as_ref().send(action).await
    }
}

/// reqwest-backed transport against the shop API
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(&base_url.into()).ok_or_else(|| {
            TransportError::InvalidRequest(
                "API base URL must include http:// or https://".to_string(),
            )
        })?;
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url,
            access_token: non_blank(access_token),
        })
    }

    /// Absolute URLs are used verbatim; paths are joined onto the base URL
    fn resolve(&self, url: &str) -> String {
        join_url(&self.base_url, url)
    }
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl Transport for HttpTransport {
    async fn send(&self, action: &SyncAction) -> Result<(), TransportError> {
        let mut request = self
            .client
            .request(reqwest_method(action.method), self.resolve(&action.url))
            .header("Accept", "application/json")
            .header("X-Sync-Action-Id", action.id.as_str());
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &action.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return error_excerpt(&message);
        }
    }

    let trimmed = error_excerpt(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request rejected")
            .to_string()
    } else {
        trimmed
    }
}
