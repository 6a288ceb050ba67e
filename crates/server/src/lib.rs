pub mod api;
pub mod bootstrap;
pub mod health;

use std::sync::Arc;

use akka_agent::runtime::AgentRuntime;
use axum::Router;
use secrecy::SecretString;

pub fn app(runtime: Arc<AgentRuntime>, admin_token: Option<SecretString>) -> Router {
    health::router(Arc::clone(&runtime)).merge(api::router(api::ApiState { runtime, admin_token }))
}
