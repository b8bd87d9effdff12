use crate::metrics::{metrics_middleware, render_metrics};
use crate::state::AppState;
use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value as JsonValue, json};
use ssl_manager_common::ManagerError;
use ssl_manager_common::models::{
    CreateDomainRequest, CreateDomainResponse, DeleteDomainQuery, DomainPage, ListDomainsQuery,
    MessageResponse,
};
use tower_http::trace::TraceLayer;

type ApiResult<T> = std::result::Result<T, ManagerError>;

/// 上游网关认证后注入的调用方身份
pub const ACTOR_HEADER: &str = "x-actor-id";

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/domains",
            get(list_domains).post(create_domain).delete(delete_domain),
        )
        .route("/api/v1/certificates/renew", post(renew_certificates))
        .route("/api/v1/acme/challenge/{token}", get(get_acme_challenge))
        .route("/.well-known/acme-challenge/{token}", get(serve_acme_challenge))
        .route("/api/v1/metrics", get(metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 请求方标识，缺失时返回 401
#[derive(Debug, Clone)]
pub struct Actor(pub String);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ManagerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Actor(value.to_string()))
            .ok_or_else(|| ManagerError::Unauthorized(format!("missing {ACTOR_HEADER} header")))
    }
}

async fn create_domain(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(payload): Json<CreateDomainRequest>,
) -> ApiResult<(StatusCode, Json<CreateDomainResponse>)> {
    let domain_id = state.orchestrator.register_domain(payload, &actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateDomainResponse {
            message: "Domain created successfully".to_string(),
            domain_id,
        }),
    ))
}

async fn list_domains(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Query(query): Query<ListDomainsQuery>,
) -> ApiResult<Json<DomainPage>> {
    let page = state.orchestrator.get_domains(&query, &actor).await?;
    Ok(Json(page))
}

async fn delete_domain(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Query(query): Query<DeleteDomainQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let target = query.target()?;
    state.orchestrator.delete_domain(target.clone(), &actor).await?;
    Ok(Json(MessageResponse {
        message: format!("Domain '{}' deleted successfully", target),
    }))
}

async fn renew_certificates(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Json<JsonValue> {
    let scheduled = state.scheduler.trigger();
    tracing::info!(actor = %actor, scheduled, "Manual renewal scan requested");
    Json(json!({"scheduled": scheduled}))
}

async fn metrics() -> Response {
    render_metrics()
}

async fn get_acme_challenge(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match state.challenges.get(&token).await {
        Some(key_auth) => Json(json!({"key_auth": key_auth})).into_response(),
        None => challenge_not_found(),
    }
}

/// CA 直接访问的 HTTP-01 路径，返回纯文本
async fn serve_acme_challenge(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match state.challenges.get(&token).await {
        Some(key_auth) => key_auth.into_response(),
        None => challenge_not_found(),
    }
}

fn challenge_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "challenge not found"})),
    )
        .into_response()
}
