use std::sync::Arc;

use akka_agent::runtime::AgentRuntime;
use akka_core::catalog::CatalogSummary;
use akka_core::domain::routing::{PipelineRequest, PipelineResult};
use akka_core::errors::InterfaceError;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub admin_token: Option<SecretString>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub fn error_response(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let detail = match &error {
        InterfaceError::BadRequest { message, .. }
        | InterfaceError::Unauthorized { message, .. }
        | InterfaceError::ServiceUnavailable { message, .. }
        | InterfaceError::Internal { message, .. } => message.clone(),
    };
    let body = ApiError {
        error: error.user_message(),
        detail,
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(body))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub catalog: CatalogSummary,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/ask", post(ask))
        .route("/v1/admin/reload", post(reload))
        .with_state(state)
}

pub async fn ask(
    State(state): State<ApiState>,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<PipelineResult>, (StatusCode, Json<ApiError>)> {
    if request.query.trim().is_empty() {
        let correlation_id = Uuid::new_v4().to_string();
        let error = InterfaceError::bad_request("query must not be empty", correlation_id);
        return Err(error_response(error));
    }

    Ok(Json(state.runtime.handle(&request).await))
}

pub async fn reload(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = Uuid::new_v4().to_string();
    admin_guard(&headers, &state, &correlation_id)?;

    match state.runtime.reload().await {
        Ok(catalog) => Ok(Json(ReloadResponse { status: "reloaded", catalog })),
        Err(error) => Err(error_response(error.into_interface(correlation_id))),
    }
}

fn admin_guard(
    headers: &HeaderMap,
    state: &ApiState,
    correlation_id: &str,
) -> Result<(), (StatusCode, Json<ApiError>)> {
    let Some(expected) = &state.admin_token else {
        return Ok(());
    };

    let provided = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token == expected.expose_secret() => Ok(()),
        _ => {
            tracing::warn!(
                event_name = "http.admin.unauthorized",
                correlation_id,
                "admin request rejected"
            );
            Err(error_response(InterfaceError::unauthorized(correlation_id)))
        }
    }
}
