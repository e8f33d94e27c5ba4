//! Live reads of server-owned entities, the input side of the read path

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::models::{CachedEntity, InventoryItem};
use crate::sync::{parse_api_error, TransportError};
use crate::util::{join_url, non_blank, normalize_base_url};

/// Default inventory listing endpoint, relative to the API base URL
pub const INVENTORY_PATH: &str = "/inventory";

/// Fetches the current server-side set of `T` for one tenant
pub trait LiveReader<T>: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<T>, TransportError>> + Send;
}

impl<T, R: LiveReader<T>> LiveReader<T> for Arc<R> {
    async fn fetch(&self) -> Result<Vec<T>, TransportError> {
        self.as_ref().fetch().await
    }
}

/// A bare JSON array, or the same rows under `items`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped { items: Vec<T> },
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}

/// reqwest-backed listing of one entity type, `GET <path>?tenantId=...`
pub struct HttpReader<T> {
    client: reqwest::Client,
    url: String,
    tenant_id: String,
    access_token: Option<String>,
    entity: PhantomData<fn() -> T>,
}

pub type HttpInventoryReader = HttpReader<InventoryItem>;

impl<T> HttpReader<T> {
    pub fn new(
        base_url: &str,
        path: &str,
        tenant_id: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(base_url).ok_or_else(|| {
            TransportError::InvalidRequest(
                "API base URL must include http:// or https://".to_string(),
            )
        })?;
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(TransportError::InvalidRequest(
                "tenant id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: join_url(&base_url, path),
            tenant_id: tenant_id.to_string(),
            access_token: non_blank(access_token),
            entity: PhantomData,
        })
    }
}

impl<T: CachedEntity> LiveReader<T> for HttpReader<T> {
    async fn fetch(&self) -> Result<Vec<T>, TransportError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("tenantId", self.tenant_id.as_str())])
            .header("Accept", "application/json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        let listing: Listing<T> = response.json().await?;
        Ok(listing.into_items())
    }
}
