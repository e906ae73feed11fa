//! HTTP ingress.
//!
//! Every route requires the shared key in the `api-key` header. Responses
//! carry the route in `request` and `"success"` or `"error"` in `status`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use edgeship_common::keys::validate_app_key;
use edgeship_common::{
    Artifact, DeployStatusQuery, MessageBus, ServiceActionRequest, publish_json, topics,
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::reconcile::{self, ReconcileError};
use crate::store::StateStore;

pub const API_KEY_HEADER: &str = "api-key";

pub struct ApiState {
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<dyn MessageBus>,
    pub api_key: String,
}

// ===================================================================
// Errors
// ===================================================================

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    route: &'static str,
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(route: &'static str, message: impl Into<String>) -> Self {
        Self {
            route,
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(route: &'static str, message: impl Into<String>) -> Self {
        Self {
            route,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "request": self.route,
            "status": "error",
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

fn success(route: &'static str, extra: Value) -> Json<Value> {
    let mut body = json!({ "request": route, "status": "success" });
    if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    Json(body)
}

// ===================================================================
// Auth
// ===================================================================

async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        tracing::warn!(path = %request.uri().path(), "rejected unauthenticated request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "error", "error": "unauthenticated" })),
        )
            .into_response();
    }
    next.run(request).await
}

// ===================================================================
// Handlers
// ===================================================================

async fn push(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<Artifact>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    const ROUTE: &str = "/push";
    let Json(artifact) = body.map_err(|e| ApiError::bad_request(ROUTE, e.body_text()))?;
    artifact
        .validate()
        .map_err(|e| ApiError::bad_request(ROUTE, e.to_string()))?;
    let app = artifact.app_key();
    validate_app_key(&app).map_err(|e| ApiError::bad_request(ROUTE, e))?;

    let cleared = state.store.delete_conditions(&app).await.map_err(|e| {
        tracing::error!(app = %app, error = %e, "failed to clear previous conditions");
        ApiError::internal(ROUTE, "failed to clear previous deployment conditions")
    })?;

    publish_json(state.bus.as_ref(), topics::REPO_PUSH, &artifact)
        .await
        .map_err(|e| {
            tracing::error!(app = %app, error = %e, "failed to publish push event");
            ApiError::internal(ROUTE, "failed to publish push event")
        })?;

    tracing::info!(app = %app, sha = %artifact.sha, name = %artifact.name, cleared, "push accepted");
    Ok(success(ROUTE, Value::Null))
}

async fn deploy_status(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<DeployStatusQuery>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    const ROUTE: &str = "/deploy/status";
    let Json(query) = body.map_err(|e| ApiError::bad_request(ROUTE, e.body_text()))?;
    let app = query.app_key();
    validate_app_key(&app).map_err(|e| ApiError::bad_request(ROUTE, e))?;

    match reconcile::get_deploy_status(state.store.as_ref(), &app, Utc::now()).await {
        Ok(status) => {
            let extra = serde_json::to_value(&status)
                .map_err(|e| ApiError::internal(ROUTE, e.to_string()))?;
            Ok(success(ROUTE, extra))
        }
        Err(e @ ReconcileError::NoAgentsConfigured) => {
            Err(ApiError::bad_request(ROUTE, e.to_string()))
        }
        Err(ReconcileError::Store(e)) => {
            tracing::error!(app = %app, error = %e, "failed to read deploy status");
            Err(ApiError::internal(ROUTE, "failed to read deploy status"))
        }
    }
}

async fn service(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<ServiceActionRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    const ROUTE: &str = "/service";
    let Json(request) = body.map_err(|e| ApiError::bad_request(ROUTE, e.body_text()))?;
    validate_app_key(&request.app_key()).map_err(|e| ApiError::bad_request(ROUTE, e))?;

    publish_json(state.bus.as_ref(), topics::SERVICE, &request)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to publish service action");
            ApiError::internal(ROUTE, "failed to publish service action")
        })?;

    tracing::info!(app = %request.app_key(), action = %request.action, "service action sent");
    Ok(success(ROUTE, Value::Null))
}

async fn health() -> Json<Value> {
    success("/health", json!({ "version": env!("CARGO_PKG_VERSION") }))
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/push", post(push))
        .route("/deploy/status", get(deploy_status))
        .route("/service", post(service))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
