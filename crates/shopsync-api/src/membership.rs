//! Tenant membership checks, consulted once per stream open or publish

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::config::{AppConfig, TenantMembers};
use crate::error::AppError;

#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn is_member(&self, tenant_id: &str, user_id: &str) -> Result<bool, AppError>;
}

/// Asks the shop's membership service: `GET {base}/tenants/{tenant}/members/{user}`
#[derive(Debug, Clone)]
pub struct HttpMembershipDirectory {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpMembershipDirectory {
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url).map_err(|error| {
            AppError::Config(format!("MEMBERSHIP_API_URL is not a valid URL: {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(
                "MEMBERSHIP_API_URL cannot be used as a base URL".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|error| AppError::Config(format!("HTTP client setup failed: {error}")))?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    fn member_url(&self, tenant_id: &str, user_id: &str) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AppError::internal("membership base URL has no path"))?
            .pop_if_empty()
            .extend(["tenants", tenant_id, "members", user_id]);
        Ok(url)
    }
}

#[async_trait]
impl MembershipDirectory for HttpMembershipDirectory {
    async fn is_member(&self, tenant_id: &str, user_id: &str) -> Result<bool, AppError> {
        let mut request = self
            .client
            .get(self.member_url(tenant_id, user_id)?)
            .header("Accept", "application/json");
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|error| {
            AppError::external(format!("Membership request failed: {}", sanitize(&error)))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Ok(false);
        }
        Err(AppError::external(format!(
            "Membership request failed with HTTP {}",
            status.as_u16()
        )))
    }
}

/// Fixed membership table from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticMembershipDirectory {
    members: TenantMembers,
}

impl StaticMembershipDirectory {
    pub const fn new(members: TenantMembers) -> Self {
        Self { members }
    }
}

#[async_trait]
impl MembershipDirectory for StaticMembershipDirectory {
    async fn is_member(&self, tenant_id: &str, user_id: &str) -> Result<bool, AppError> {
        Ok(self
            .members
            .get(tenant_id)
            .is_some_and(|users| users.contains(user_id)))
    }
}

/// HTTP directory when configured, otherwise the static table
pub fn directory_from_config(
    config: &AppConfig,
) -> Result<Box<dyn MembershipDirectory>, AppError> {
    if let Some(url) = config.membership_api_url.as_deref() {
        return Ok(Box::new(HttpMembershipDirectory::new(
            url,
            config.membership_api_token.clone(),
        )?));
    }
    config
        .tenant_members
        .clone()
        .map(|members| Box::new(StaticMembershipDirectory::new(members)) as Box<dyn MembershipDirectory>)
        .ok_or_else(|| AppError::Config("no membership directory configured".to_string()))
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::tests::config_from;

    #[test]
    fn member_url_escapes_path_segments() {
        let directory =
            HttpMembershipDirectory::new("https://members.example.com/api/", None).unwrap();
        let url = directory.member_url("T 1", "user/a").unwrap();
        assert_eq!(
            url.as_str(),
            "https://members.example.com/api/tenants/T%201/members/user%2Fa"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(HttpMembershipDirectory::new("not a url", None).is_err());
    }

    #[tokio::test]
    async fn static_directory_checks_tenant_membership() {
        let mut members = TenantMembers::new();
        members.insert("T1".to_string(), HashSet::from(["user-a".to_string()]));
        let directory = StaticMembershipDirectory::new(members);

        assert!(directory.is_member("T1", "user-a").await.unwrap());
        assert!(!directory.is_member("T1", "user-b").await.unwrap());
        assert!(!directory.is_member("T2", "user-a").await.unwrap());
    }

    #[tokio::test]
    async fn config_selects_static_directory() {
        let config = config_from(&[]).unwrap();
        let directory = directory_from_config(&config).unwrap();
        assert!(directory.is_member("T2", "user-c").await.unwrap());
        assert!(!directory.is_member("T2", "user-a").await.unwrap());
    }
}
