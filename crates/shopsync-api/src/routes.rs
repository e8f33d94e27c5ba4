use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shopsync_core::models::ChangePayload;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_session_token, user_fingerprint, AuthenticatedUser, SessionVerifier};
use crate::change_log::{change_log_from_config, ChangeLog};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::membership::{directory_from_config, MembershipDirectory};
use crate::notifier::ChangeNotifier;
use crate::stream::{open_tenant_stream, sse_response, OpenStreams, StreamSettings};
use crate::stream_limit::StreamLimiter;

const MAX_ENTITY_LEN: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: Arc<SessionVerifier>,
    membership: Arc<dyn MembershipDirectory>,
    notifier: Arc<ChangeNotifier>,
    stream_limiter: StreamLimiter,
    open_streams: OpenStreams,
}

impl AppState {
    pub async fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let membership = Arc::from(directory_from_config(&config)?);
        let change_log = change_log_from_config(&config.change_log).await?;
        Ok(Self::new(config, membership, change_log))
    }

    pub fn new(
        config: Arc<AppConfig>,
        membership: Arc<dyn MembershipDirectory>,
        change_log: Arc<dyn ChangeLog>,
    ) -> Self {
        Self {
            verifier: Arc::new(SessionVerifier::new(config.clone())),
            membership,
            notifier: Arc::new(ChangeNotifier::new(change_log)),
            stream_limiter: StreamLimiter::new(config.max_streams_per_user),
            open_streams: OpenStreams::default(),
            config,
        }
    }

    /// In-process publisher for mutations served by this instance
    pub fn notifier(&self) -> Arc<ChangeNotifier> {
        self.notifier.clone()
    }

    fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            heartbeat_interval: self.config.heartbeat_interval,
            poll_interval: self.config.poll_interval,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/events", get(open_change_stream))
        .route("/tenants/{tenant_id}/changes", post(publish_change))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    open_streams: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        open_streams: state.open_streams.get(),
    })
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let query_token = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.access_token);
    let token = extract_session_token(request.headers(), query_token.as_deref())?.to_string();
    let user = state.verifier.verify_access_token(&token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn authorize_tenant(
    state: &AppState,
    user: &AuthenticatedUser,
    tenant_id: &str,
) -> Result<(), AppError> {
    if state.membership.is_member(tenant_id, &user.user_id).await? {
        return Ok(());
    }
    tracing::warn!(
        tenant = tenant_id,
        user = user_fingerprint(&user.user_id),
        "Rejected non-member"
    );
    Err(AppError::forbidden("Not a member of this tenant"))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(rename = "tenantId")]
    tenant_id: Option<String>,
}

async fn open_change_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    let tenant_id = query
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|tenant_id| !tenant_id.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing `tenantId` query parameter"))?
        .to_string();

    authorize_tenant(&state, &user, &tenant_id).await?;
    let permit = state.stream_limiter.acquire(&tenant_id, &user.user_id)?;

    tracing::info!(
        endpoint = "stream_open",
        tenant = %tenant_id,
        user = user_fingerprint(&user.user_id),
        "Opening change stream"
    );
    let messages = open_tenant_stream(
        tenant_id,
        state.notifier.change_log(),
        state.notifier.subscribe(),
        state.stream_settings(),
        &state.open_streams,
        permit,
    );

    Ok(([("x-accel-buffering", "no")], sse_response(messages)).into_response())
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    entity: String,
}

async fn publish_change(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(tenant_id): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<ChangePayload>), AppError> {
    let entity = request.entity.trim();
    if entity.is_empty() || entity.len() > MAX_ENTITY_LEN {
        return Err(AppError::bad_request(format!(
            "`entity` must be 1-{MAX_ENTITY_LEN} characters"
        )));
    }

    authorize_tenant(&state, &user, &tenant_id).await?;

    let change = state.notifier.publish(&tenant_id, entity).await;
    tracing::info!(
        endpoint = "publish",
        tenant = %tenant_id,
        entity,
        user = user_fingerprint(&user.user_id),
        updated_at = change.updated_at,
        "Published tenant change"
    );
    Ok((StatusCode::ACCEPTED, Json(change)))
}
