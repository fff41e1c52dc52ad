//! Admin API for route registration.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use service::errors::DeployError;
use service::registry::{ChangeResponse, ConflictResponse, RoutesResponse};
use service::routing::RouteEntry;
use tracing::warn;

use crate::observability;
use crate::route_store::RouteStore;

/// Maps store failures onto HTTP statuses.
struct ApiError(DeployError, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(err, service) = self;
        match err {
            DeployError::RouteConflict { host, prefix, first, second } => {
                let existing = if first == service { second } else { first };
                let body = ConflictResponse {
                    error: format!("route overlaps the route of `{existing}`"),
                    host,
                    path_prefix: prefix,
                    existing,
                };
                (StatusCode::CONFLICT, Json(body)).into_response()
            }
            DeployError::Config(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg, "code": 1001 }))).into_response()
            }
            other => {
                warn!(%service, error = %other, "route update failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": other.to_string(), "code": other.code() })),
                )
                    .into_response()
            }
        }
    }
}

/// Bearer token required for route changes.
#[derive(Clone)]
pub struct AdminToken(Arc<str>);

impl AdminToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    fn matches(&self, presented: &str) -> bool {
        let (a, b) = (self.0.as_bytes(), presented.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

pub async fn require_admin_token(
    State(token): State<AdminToken>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .is_some_and(|p| !p.is_empty() && token.matches(p));

    if !authorized {
        warn!(method = %req.method(), path = %req.uri().path(), "rejected unauthenticated route change");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

async fn list_routes(State(store): State<RouteStore>) -> Json<RoutesResponse> {
    Json(RoutesResponse { routes: store.list().await.into_iter().collect() })
}

async fn put_route(
    State(store): State<RouteStore>,
    Path(service): Path<String>,
    Json(entry): Json<RouteEntry>,
) -> Result<Json<ChangeResponse>, ApiError> {
    if !valid_service_name(&service) {
        return Err(ApiError(DeployError::Config(format!("invalid service name `{service}`")), service));
    }
    match store.upsert(&service, entry).await {
        Ok(changed) => Ok(Json(ChangeResponse { changed })),
        Err(e) => Err(ApiError(e, service)),
    }
}

async fn delete_route(
    State(store): State<RouteStore>,
    Path(service): Path<String>,
) -> Result<Json<ChangeResponse>, ApiError> {
    match store.remove(&service).await {
        Ok(changed) => Ok(Json(ChangeResponse { changed })),
        Err(e) => Err(ApiError(e, service)),
    }
}

async fn metrics() -> impl IntoResponse {
    observability::encode_metrics()
}

/// `/routes`, `/routes/:service` and `/metrics`; `/healthz` is added by the admin server.
/// Changing a route needs `Authorization: Bearer <token>`.
pub fn router(store: RouteStore, token: AdminToken) -> Router {
    let writes = Router::new()
        .route("/routes/:service", axum::routing::put(put_route).delete(delete_route))
        .route_layer(middleware::from_fn_with_state(token, require_admin_token));
    Router::new()
        .route("/metrics", get(metrics))
        .route("/routes", get(list_routes))
        .merge(writes)
        .with_state(store)
}
