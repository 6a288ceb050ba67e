use std::sync::Arc;

use akka_agent::runtime::{AgentRuntime, RuntimeStatus};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub similarity: HealthCheck,
    pub cloud: HealthCheck,
    pub runtime: RuntimeStatus,
    pub checked_at: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { runtime })
}

/// The pipeline keeps answering without the fastpath or the cloud backend,
/// so a degraded report is still served with 200.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let runtime = state.runtime.status().await;

    let similarity = if runtime.similarity_enabled {
        HealthCheck {
            status: "ready",
            detail: format!(
                "{} anchor vectors across {} intents embedded; threshold {:.2}",
                runtime.embedded_anchors, runtime.embedded_intents, runtime.similarity_threshold
            ),
        }
    } else {
        HealthCheck {
            status: "degraded",
            detail: "similarity router disabled; every query goes to the classifier".to_string(),
        }
    };

    let cloud = if runtime.cloud_enabled {
        HealthCheck { status: "ready", detail: "cloud backend configured".to_string() }
    } else {
        HealthCheck {
            status: "degraded",
            detail: "no cloud backend; rules questions receive an apology".to_string(),
        }
    };

    let ready = similarity.status == "ready" && cloud.status == "ready";
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("{} intents loaded", runtime.catalog.intents),
        },
        similarity,
        cloud,
        runtime,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
