use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the cross-process change record lives
#[derive(Clone, PartialEq, Eq)]
pub enum ChangeLogConfig {
    /// Process-local; only correct with a single server instance
    Memory,
    /// libSQL file shared by processes on one host
    LocalFile(PathBuf),
    /// Remote libSQL database shared by every instance
    Remote { url: String, auth_token: String },
}

impl fmt::Debug for ChangeLogConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => formatter.write_str("Memory"),
            Self::LocalFile(path) => formatter.debug_tuple("LocalFile").field(path).finish(),
            Self::Remote { url, .. } => formatter
                .debug_struct("Remote")
                .field("url", url)
                .field("auth_token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Tenant id -> member user ids
pub type TenantMembers = HashMap<String, HashSet<String>>;

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub session_jwt_secret: String,
    pub session_jwt_issuer: Option<String>,
    pub session_jwt_audience: String,
    pub auth_clock_skew: Duration,
    pub membership_api_url: Option<String>,
    pub membership_api_token: Option<String>,
    pub tenant_members: Option<TenantMembers>,
    pub change_log: ChangeLogConfig,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub max_streams_per_user: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("session_jwt_secret", &"[REDACTED]")
            .field("session_jwt_issuer", &self.session_jwt_issuer)
            .field("session_jwt_audience", &self.session_jwt_audience)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("membership_api_url", &self.membership_api_url)
            .field(
                "membership_api_token",
                &self.membership_api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "tenant_members",
                &self.tenant_members.as_ref().map(HashMap::len),
            )
            .field("change_log", &self.change_log)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("poll_interval", &self.poll_interval)
            .field("max_streams_per_user", &self.max_streams_per_user)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SHOPSYNC_API_BIND_ADDR", "127.0.0.1:8080");

        let session_jwt_secret = required_trimmed(&lookup, "SESSION_JWT_SECRET")?;
        if session_jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "SESSION_JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }
        let session_jwt_issuer = optional_trimmed(&lookup, "SESSION_JWT_ISSUER");
        let session_jwt_audience =
            value_or_default(&lookup, "SESSION_JWT_AUDIENCE", "authenticated");
        let auth_clock_skew_secs = bounded(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0..=300)?;

        let membership_api_url = optional_trimmed(&lookup, "MEMBERSHIP_API_URL")
            .map(|value| trim_trailing(&value).to_string());
        if let Some(url) = membership_api_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "MEMBERSHIP_API_URL must start with http:// or https://".to_string(),
                ));
            }
        }
        let membership_api_token = optional_trimmed(&lookup, "MEMBERSHIP_API_TOKEN");
        let tenant_members = optional_trimmed(&lookup, "TENANT_MEMBERS")
            .map(|value| parse_tenant_members(&value))
            .transpose()?;
        if membership_api_url.is_none() && tenant_members.is_none() {
            return Err(ConfigError::Invalid(
                "one of MEMBERSHIP_API_URL or TENANT_MEMBERS must be set".to_string(),
            ));
        }

        let change_log = parse_change_log(&lookup)?;

        let heartbeat_secs = bounded(&lookup, "STREAM_HEARTBEAT_SECS", "20", 5..=300)?;
        let poll_secs = bounded(&lookup, "STREAM_POLL_SECS", "3", 1..=60)?;
        let max_streams_per_user =
            usize::try_from(bounded(&lookup, "MAX_STREAMS_PER_USER", "5", 1..=100)?)
                .unwrap_or(usize::MAX);

        Ok(Self {
            bind_addr,
            session_jwt_secret,
            session_jwt_issuer,
            session_jwt_audience,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            membership_api_url,
            membership_api_token,
            tenant_members,
            change_log,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            poll_interval: Duration::from_secs(poll_secs),
            max_streams_per_user,
        })
    }
}

fn parse_change_log(lookup: impl Fn(&str) -> Option<String>) -> Result<ChangeLogConfig, ConfigError> {
    let url = optional_trimmed(&lookup, "CHANGE_LOG_URL");
    let auth_token = optional_trimmed(&lookup, "CHANGE_LOG_AUTH_TOKEN");
    let path = optional_trimmed(&lookup, "CHANGE_LOG_PATH");

    match (url, path) {
        (Some(_), Some(_)) => Err(ConfigError::Invalid(
            "set only one of CHANGE_LOG_URL or CHANGE_LOG_PATH".to_string(),
        )),
        (Some(url), None) => {
            let auth_token = auth_token.ok_or(ConfigError::MissingVar("CHANGE_LOG_AUTH_TOKEN"))?;
            Ok(ChangeLogConfig::Remote { url, auth_token })
        }
        (None, Some(path)) => Ok(ChangeLogConfig::LocalFile(PathBuf::from(path))),
        (None, None) => Ok(ChangeLogConfig::Memory),
    }
}

/// `tenant:user1,user2;tenant2:user3`
fn parse_tenant_members(value: &str) -> Result<TenantMembers, ConfigError> {
    let mut members = TenantMembers::new();
    for entry in value.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (tenant, users) = entry.split_once(':').ok_or_else(|| {
            ConfigError::Invalid(format!(
                "TENANT_MEMBERS entry `{entry}` must look like `tenant:user1,user2`"
            ))
        })?;
        let tenant = tenant.trim();
        if tenant.is_empty() {
            return Err(ConfigError::Invalid(
                "TENANT_MEMBERS contains an empty tenant id".to_string(),
            ));
        }
        members.entry(tenant.to_string()).or_default().extend(
            users
                .split(',')
                .map(str::trim)
                .filter(|user| !user.is_empty())
                .map(str::to_string),
        );
    }
    Ok(members)
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
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    pub(crate) const TEST_SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    pub(crate) fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let mut map: HashMap<&str, &str> = HashMap::new();
        map.insert("SESSION_JWT_SECRET", TEST_SECRET);
        map.insert("TENANT_MEMBERS", "T1:user-a,user-b;T2:user-c");
        map.extend(pairs.iter().copied());
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_session_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SESSION_JWT_SECRET"));
    }

    #[test]
    fn config_applies_stream_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.change_log, ChangeLogConfig::Memory);
        assert_eq!(config.session_jwt_audience, "authenticated");
        assert_eq!(config.max_streams_per_user, 5);
    }

    #[test]
    fn config_rejects_out_of_range_intervals() {
        assert!(config_from(&[("STREAM_POLL_SECS", "0")]).is_err());
        assert!(config_from(&[("STREAM_HEARTBEAT_SECS", "3")]).is_err());
        assert!(config_from(&[("STREAM_POLL_SECS", "soon")]).is_err());
        assert!(config_from(&[("MAX_STREAMS_PER_USER", "0")]).is_err());
    }

    #[test]
    fn config_requires_some_membership_source() {
        let mut map: HashMap<&str, &str> = HashMap::new();
        map.insert("SESSION_JWT_SECRET", TEST_SECRET);
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MEMBERSHIP_API_URL"));
    }

    #[test]
    fn remote_change_log_needs_token() {
        let err = config_from(&[("CHANGE_LOG_URL", "libsql://changes.example.com")]).unwrap_err();
        assert!(err.to_string().contains("CHANGE_LOG_AUTH_TOKEN"));

        let config = config_from(&[("CHANGE_LOG_PATH", "/var/lib/shopsync/changes.db")]).unwrap();
        assert_eq!(
            config.change_log,
            ChangeLogConfig::LocalFile(PathBuf::from("/var/lib/shopsync/changes.db"))
        );
    }

    #[test]
    fn parses_tenant_member_lists() {
        let members = parse_tenant_members(" T1: a , b ;T2:c;; T1:d").unwrap();
        assert_eq!(members["T1"].len(), 3);
        assert!(members["T2"].contains("c"));
        assert!(parse_tenant_members("T1").is_err());
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let config = config_from(&[
            ("CHANGE_LOG_URL", "libsql://changes.example.com"),
            ("CHANGE_LOG_AUTH_TOKEN", "sensitive-change-log-token"),
            ("MEMBERSHIP_API_URL", "https://members.example.com"),
            ("MEMBERSHIP_API_TOKEN", "sensitive-membership-token"),
        ])
        .unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(TEST_SECRET));
        assert!(!debug_output.contains("sensitive-change-log-token"));
        assert!(!debug_output.contains("sensitive-membership-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
