use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Verifies HS256 session tokens issued by the shop's auth service
#[derive(Clone)]
pub struct SessionVerifier {
    key: DecodingKey,
    config: Arc<AppConfig>,
}

impl SessionVerifier {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            key: DecodingKey::from_secret(config.session_jwt_secret.as_bytes()),
            config,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = self.config.auth_clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = self.config.session_jwt_issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        let decoded = decode::<SessionClaims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        if !audience_matches(
            decoded.claims.aud.as_ref(),
            &self.config.session_jwt_audience,
        ) {
            return Err(AppError::unauthorized("Token audience is not allowed"));
        }
        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        validate_temporal_claims(&decoded.claims, self.config.auth_clock_skew)?;

        Ok(AuthenticatedUser {
            user_id: decoded.claims.sub,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

/// Bearer header first; `access_token` query parameter for `EventSource`
/// clients, which cannot set headers.
pub fn extract_session_token<'a>(
    headers: &'a HeaderMap,
    query_token: Option<&'a str>,
) -> Result<&'a str, AppError> {
    if headers.contains_key("authorization") {
        return extract_bearer_token(headers);
    }
    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("Missing session token"))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

fn validate_temporal_claims(claims: &SessionClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn audience_matches(aud: Option<&Value>, expected: &str) -> bool {
    let Some(aud) = aud else {
        return false;
    };

    match aud {
        Value::String(value) => value == expected,
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_str)
            .any(|value| value == expected),
        _ => false,
    }
}

/// Stable hash so user ids never appear in logs
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

/// Sign a session for `user_id` the way the auth service would
#[cfg(test)]
pub(crate) fn sign_session(secret: &str, user_id: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        aud: Some(Value::String("authenticated".to_string())),
        exp: Some(now + 600),
        iat: Some(now),
        nbf: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::config::tests::{config_from, TEST_SECRET};

    fn verifier() -> SessionVerifier {
        SessionVerifier::new(Arc::new(config_from(&[]).unwrap()))
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn session_token_falls_back_to_query_parameter() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_session_token(&headers, Some(" abc ")).unwrap(),
            "abc"
        );
        assert!(extract_session_token(&headers, Some("  ")).is_err());
        assert!(extract_session_token(&headers, None).is_err());
    }

    #[test]
    fn verifies_signed_session() {
        let token = sign_session(TEST_SECRET, "user-a");
        let user = verifier().verify_access_token(&token).unwrap();
        assert_eq!(user.user_id, "user-a");
    }

    #[test]
    fn unknown_session_claims_are_ignored() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": "user-a",
            "aud": "authenticated",
            "exp": now + 600,
            "iat": now,
            "jti": "session-1",
            "role": "cashier",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();

        let user = verifier().verify_access_token(&token).unwrap();
        assert_eq!(user.user_id, "user-a");
    }

    #[test]
    fn user_fingerprint_is_stable_per_user() {
        assert_eq!(user_fingerprint("user-a"), user_fingerprint("user-a"));
        assert_ne!(user_fingerprint("user-a"), user_fingerprint("user-b"));
    }

    #[test]
    fn rejects_session_signed_with_other_secret() {
        let token = sign_session("another-secret-that-is-long-enough-too", "user-a");
        let err = verifier().verify_access_token(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn audience_matches_string_or_array() {
        assert!(audience_matches(
            Some(&Value::String("authenticated".to_string())),
            "authenticated"
        ));
        assert!(audience_matches(
            Some(&Value::Array(vec![
                Value::String("anon".to_string()),
                Value::String("authenticated".to_string())
            ])),
            "authenticated"
        ));
        assert!(!audience_matches(
            Some(&Value::String("anon".to_string())),
            "authenticated"
        ));
    }

    #[test]
    fn temporal_claims_require_exp_and_iat() {
        let claims = SessionClaims {
            sub: "user".to_string(),
            aud: Some(Value::String("authenticated".to_string())),
            exp: None,
            iat: None,
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "user".to_string(),
            aud: Some(Value::String("authenticated".to_string())),
            exp: Some(now + 300),
            iat: Some(now + 120),
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }
}
