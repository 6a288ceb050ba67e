use std::sync::Arc;

use akka_agent::runtime::AgentRuntime;
use akka_core::config::{AppConfig, ConfigError, LoadOptions};
use akka_core::errors::ApplicationError;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("routing runtime failed to start: {0}")]
    Runtime(#[from] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        catalog_dir = %config.catalog.dir.display(),
        embedding_provider = ?config.embedding.provider,
        "starting application bootstrap"
    );

    let runtime = AgentRuntime::from_config(&config).await?;

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        "routing runtime initialized"
    );

    Ok(Application { config, runtime: Arc::new(runtime) })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use akka_core::config::{ConfigOverrides, EmbeddingProvider, LoadOptions};

    use super::{bootstrap, BootstrapError};

    #[tokio::test]
    async fn missing_catalog_is_a_startup_failure() {
        let options = LoadOptions {
            overrides: ConfigOverrides {
                catalog_dir: Some(PathBuf::from("/nonexistent/akka-catalog")),
                embedding_provider: Some(EmbeddingProvider::Disabled),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };

        let result = bootstrap(options).await;
        assert!(matches!(result, Err(BootstrapError::Runtime(_))));
    }
}
