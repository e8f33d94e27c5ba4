//! Client configuration from the environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{HttpInventoryReader, INVENTORY_PATH};
use crate::listener::{HttpEventSource, ListenerError};
use crate::sync::{HttpTransport, SyncPolicy, TransportError};
use crate::util::{non_blank, normalize_base_url};

const DEFAULT_DB_PATH: &str = "shopsync.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a client needs to queue, replay, and listen for one tenant
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub tenant_id: String,
    /// Inventory listing endpoint, absolute or relative to the base URL
    pub inventory_path: String,
    pub db_path: PathBuf,
    pub request_timeout: Duration,
    /// Dead-letter cap; `None` retries forever
    pub max_attempts: Option<u32>,
    pub retry_tick: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("tenant_id", &self.tenant_id)
            .field("inventory_path", &self.inventory_path)
            .field("db_path", &self.db_path)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_tick", &self.retry_tick)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = normalize_base_url(&required_trimmed(&lookup, "SHOPSYNC_API_BASE_URL")?)
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "SHOPSYNC_API_BASE_URL must start with http:// or https://".to_string(),
                )
            })?;

        let tenant_id = required_trimmed(&lookup, "SHOPSYNC_TENANT_ID")?;
        let access_token = optional_trimmed(&lookup, "SHOPSYNC_ACCESS_TOKEN");
        let inventory_path = value_or_default(&lookup, "SHOPSYNC_INVENTORY_PATH", INVENTORY_PATH);
        let db_path = PathBuf::from(value_or_default(
            &lookup,
            "SHOPSYNC_DB_PATH",
            DEFAULT_DB_PATH,
        ));

        let request_timeout_secs =
            bounded(&lookup, "SHOPSYNC_REQUEST_TIMEOUT_SECS", "30", 1..=300)?;
        let retry_tick_secs = bounded(&lookup, "SHOPSYNC_RETRY_TICK_SECS", "15", 1..=600)?;

        let max_attempts = optional_trimmed(&lookup, "SHOPSYNC_MAX_ATTEMPTS")
            .map(|value| {
                value
                    .parse::<u32>()
                    .ok()
                    .filter(|attempts| *attempts >= 1)
                    .ok_or_else(|| {
                        ConfigError::Invalid(
                            "SHOPSYNC_MAX_ATTEMPTS must be a positive integer".to_string(),
                        )
                    })
            })
            .transpose()?;

        Ok(Self {
            api_base_url,
            access_token,
            tenant_id,
            inventory_path,
            db_path,
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_attempts,
            retry_tick: Duration::from_secs(retry_tick_secs),
        })
    }

    pub const fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_attempts: self.max_attempts,
        }
    }

    pub fn transport(&self) -> Result<HttpTransport, TransportError> {
        HttpTransport::new(
            self.api_base_url.clone(),
            self.access_token.clone(),
            self.request_timeout,
        )
    }

    pub fn inventory_reader(&self) -> Result<HttpInventoryReader, TransportError> {
        HttpInventoryReader::new(
            &self.api_base_url,
            &self.inventory_path,
            &self.tenant_id,
            self.access_token.clone(),
            self.request_timeout,
        )
    }

    pub fn event_source(&self) -> Result<HttpEventSource, ListenerError> {
        HttpEventSource::new(
            &self.api_base_url,
            &self.tenant_id,
            self.access_token.clone(),
            self.request_timeout,
        )
    }
}

fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    non_blank(lookup(name))
}
