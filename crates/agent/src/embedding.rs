use std::sync::Arc;
use std::time::Duration;

use akka_core::config::{EmbeddingConfig, EmbeddingProvider};
use akka_core::errors::{BackendError, EmbeddingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    /// One vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Bounded pool for CPU-bound work such as local inference and scoring.
#[derive(Clone, Debug)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    pub fn new(workers: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(workers.max(1))) }
    }

    /// Jobs must be bounded CPU work. A job keeps its worker until it returns, even when
    /// the awaiting request has been dropped.
    pub async fn run<F, T>(&self, job: F) -> Result<T, EmbeddingError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|error| EmbeddingError::Worker(error.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|error| EmbeddingError::Worker(error.to_string()))
    }
}

/// Builds the configured embedding backend; `None` when embeddings are disabled.
pub fn embedder_from_config(
    config: &EmbeddingConfig,
    pool: &BlockingPool,
) -> Result<Option<Arc<dyn Embedder>>, EmbeddingError> {
    match config.provider {
        EmbeddingProvider::Disabled => Ok(None),
        EmbeddingProvider::Ollama => {
            let embedder =
                OllamaEmbedder::new(&config.base_url, &config.model, config.timeout_secs)?;
            Ok(Some(Arc::new(embedder)))
        }
        EmbeddingProvider::Fastembed => fastembed_from_config(config, pool),
    }
}

#[cfg(feature = "fastembed")]
fn fastembed_from_config(
    config: &EmbeddingConfig,
    pool: &BlockingPool,
) -> Result<Option<Arc<dyn Embedder>>, EmbeddingError> {
    let embedder = local::FastEmbedder::new(&config.model, pool.clone())?;
    Ok(Some(Arc::new(embedder)))
}

#[cfg(not(feature = "fastembed"))]
fn fastembed_from_config(
    _config: &EmbeddingConfig,
    _pool: &BlockingPool,
) -> Result<Option<Arc<dyn Embedder>>, EmbeddingError> {
    Err(EmbeddingError::Unavailable(
        "embedding.provider = \"fastembed\" requires the `fastembed` cargo feature".to_string(),
    ))
}

#[derive(Clone, Debug)]
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    const BACKEND: &'static str = "ollama-embed";

    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, EmbeddingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| BackendError::Transport {
                backend: Self::BACKEND,
                message: error.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &'static str {
        Self::BACKEND
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest { model: &self.model, input: inputs })
            .send()
            .await
            .map_err(|error| BackendError::Transport {
                backend: Self::BACKEND,
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: Self::BACKEND,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let decoded: EmbedResponse =
            response.json().await.map_err(|error| BackendError::MalformedOutput {
                backend: Self::BACKEND,
                message: error.to_string(),
            })?;

        ensure_count(inputs.len(), decoded.embeddings)
    }
}

pub(crate) fn ensure_count(
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch { expected, got: vectors.len() });
    }
    Ok(vectors)
}

#[cfg(feature = "fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use akka_core::errors::EmbeddingError;
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{ensure_count, BlockingPool, Embedder};

    /// In-process ONNX inference; every call runs on the blocking pool.
    pub struct FastEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        pool: BlockingPool,
    }

    impl FastEmbedder {
        pub fn new(name: &str, pool: BlockingPool) -> Result<Self, EmbeddingError> {
            let model = TextEmbedding::try_new(
                InitOptions::new(model_for(name)?).with_show_download_progress(false),
            )
            .map_err(|error| EmbeddingError::Unavailable(error.to_string()))?;

            Ok(Self { model: Arc::new(Mutex::new(model)), pool })
        }
    }

    fn model_for(name: &str) -> Result<EmbeddingModel, EmbeddingError> {
        let normalized = name.to_ascii_lowercase();
        if normalized.contains("multilingual-e5-small") {
            Ok(EmbeddingModel::MultilingualE5Small)
        } else if normalized.contains("multilingual-e5-base") {
            Ok(EmbeddingModel::MultilingualE5Base)
        } else if normalized.contains("multilingual-e5-large") {
            Ok(EmbeddingModel::MultilingualE5Large)
        } else if normalized.contains("all-minilm-l6-v2") {
            Ok(EmbeddingModel::AllMiniLML6V2)
        } else {
            Err(EmbeddingError::Unavailable(format!("unsupported fastembed model `{name}`")))
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn name(&self) -> &'static str {
            "fastembed"
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let model = Arc::clone(&self.model);
            let batch = inputs.to_vec();
            let expected = batch.len();

            let vectors = self
                .pool
                .run(move || {
                    let model = model.lock().map_err(|_| {
                        EmbeddingError::Worker("embedding model lock poisoned".into())
                    })?;
                    model
                        .embed(batch, None)
                        .map_err(|error| EmbeddingError::Unavailable(error.to_string()))
                })
                .await??;

            ensure_count(expected, vectors)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use akka_core::errors::EmbeddingError;

    use super::{ensure_count, BlockingPool};

    #[tokio::test]
    async fn blocking_pool_returns_job_output() {
        let pool = BlockingPool::new(1);
        let value = pool.run(|| 21 * 2).await.expect("job should run");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn abandoned_job_finishes_and_frees_its_worker() {
        let pool = BlockingPool::new(1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let abandoned = pool.run(move || {
            let _ = release_rx.recv();
            let _ = done_tx.send(());
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), abandoned).await.is_err());

        release_tx.send(()).expect("release job");
        let value = pool.run(|| 7).await.expect("worker should be free again");
        assert_eq!(value, 7);
        done_rx.recv_timeout(Duration::from_secs(1)).expect("abandoned job should complete");
    }

    #[test]
    fn vector_count_must_match_inputs() {
        let error = ensure_count(2, vec![vec![1.0]]).expect_err("should reject");
        assert_eq!(error, EmbeddingError::CountMismatch { expected: 2, got: 1 });
    }
}
