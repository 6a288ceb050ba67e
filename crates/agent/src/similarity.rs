use std::sync::Arc;

use akka_core::anchors::{AnchorGroup, AnchorIndex, IntentScore};
use akka_core::catalog::AnchorPhrases;
use akka_core::domain::intent::Intent;
use akka_core::errors::EmbeddingError;

use crate::embedding::{BlockingPool, Embedder};

/// Result of scoring one query against the anchor index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimilarityOutcome {
    /// Best intent when its score reached the threshold.
    pub hit: Option<IntentScore>,
    pub best_score: f32,
    /// Top-k intents regardless of threshold, descending.
    pub ranked: Vec<IntentScore>,
}

impl SimilarityOutcome {
    pub fn miss() -> Self {
        Self::default()
    }
}

enum RouterState {
    Disabled,
    Ready { embedder: Arc<dyn Embedder>, index: Arc<AnchorIndex> },
}

/// Embedding fastpath over the catalog anchors.
pub struct SimilarityRouter {
    state: RouterState,
    threshold: f32,
    query_prefix: String,
    pool: BlockingPool,
}

impl SimilarityRouter {
    pub fn disabled(threshold: f32, pool: BlockingPool) -> Self {
        Self { state: RouterState::Disabled, threshold, query_prefix: String::new(), pool }
    }

    /// Embeds every anchor phrase in a single batch call.
    pub async fn build(
        embedder: Arc<dyn Embedder>,
        anchors: &[AnchorPhrases],
        threshold: f32,
        query_prefix: &str,
        pool: BlockingPool,
    ) -> Result<Self, EmbeddingError> {
        let inputs: Vec<String> = anchors
            .iter()
            .flat_map(|group| group.phrases.iter())
            .map(|phrase| format!("{query_prefix}{phrase}"))
            .collect();

        let vectors = embedder.embed(&inputs).await?;
        if vectors.len() != inputs.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: inputs.len(),
                got: vectors.len(),
            });
        }
        let mut vectors = vectors.into_iter();
        let groups = anchors
            .iter()
            .map(|group| AnchorGroup {
                intent: group.intent.clone(),
                vectors: vectors.by_ref().take(group.phrases.len()).collect(),
            })
            .collect();

        Ok(Self {
            state: RouterState::Ready { embedder, index: Arc::new(AnchorIndex::new(groups)) },
            threshold,
            query_prefix: query_prefix.to_string(),
            pool,
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, RouterState::Ready { .. })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn index(&self) -> Option<&AnchorIndex> {
        match &self.state {
            RouterState::Ready { index, .. } => Some(index),
            RouterState::Disabled => None,
        }
    }

    /// `(intent, score)` on a hit, `(None, score)` otherwise.
    pub async fn route(&self, query: &str) -> (Option<Intent>, f32) {
        let outcome = self.evaluate(query, 0).await;
        (outcome.hit.map(|hit| hit.intent), outcome.best_score)
    }

    pub async fn get_top_matches(&self, query: &str, k: usize) -> Vec<IntentScore> {
        self.evaluate(query, k).await.ranked
    }

    /// Embeds the query once and derives both the hit and the ranking.
    pub async fn evaluate(&self, query: &str, k: usize) -> SimilarityOutcome {
        let RouterState::Ready { embedder, index } = &self.state else {
            return SimilarityOutcome::miss();
        };
        if index.is_empty() {
            return SimilarityOutcome::miss();
        }

        let input = vec![format!("{}{query}", self.query_prefix)];
        let vector = match embedder.embed(&input).await {
            Ok(mut vectors) if vectors.len() == 1 => vectors.remove(0),
            Ok(vectors) => {
                tracing::warn!(
                    event_name = "routing.similarity.query_failed",
                    backend = embedder.name(),
                    vectors = vectors.len(),
                    "embedding backend returned an unexpected vector count"
                );
                return SimilarityOutcome::miss();
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "routing.similarity.query_failed",
                    backend = embedder.name(),
                    error = %error,
                    "query embedding failed; treating as a miss"
                );
                return SimilarityOutcome::miss();
            }
        };

        let index = Arc::clone(index);
        let threshold = self.threshold;
        let scored = self
            .pool
            .run(move || {
                let best = index.best_match(&vector);
                let ranked = if k == 0 { Vec::new() } else { index.top_k(&vector, k) };
                (best, ranked)
            })
            .await;

        match scored {
            Ok((best, ranked)) => {
                let best_score = best.as_ref().map_or(0.0, |best| best.score.max(0.0));
                SimilarityOutcome {
                    hit: best.filter(|best| best.score >= threshold),
                    best_score,
                    ranked,
                }
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "routing.similarity.scoring_failed",
                    error = %error,
                    "anchor scoring failed; treating as a miss"
                );
                SimilarityOutcome::miss()
            }
        }
    }
}
