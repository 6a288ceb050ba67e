use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use akka_core::catalog::{CatalogSummary, RoutingCatalog};
use akka_core::config::{AppConfig, RoutingSettings};
use akka_core::domain::intent::Intent;
use akka_core::domain::routing::{PipelineRequest, PipelineResult, RouteSource, RouterResult};
use akka_core::errors::{ApplicationError, BackendError};
use akka_core::prompt::ClassifierPrompt;
use akka_core::reference::ReferenceProvider;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::classifier::IntentClassifier;
use crate::conversation;
use crate::dispatch::{DispatchInput, Dispatcher};
use crate::embedding::{embedder_from_config, BlockingPool, Embedder};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{GeminiClient, LlmClient, OllamaClient};
use crate::rules::RuleQueryEngine;
use crate::similarity::{SimilarityOutcome, SimilarityRouter};

/// Handles to the external backends the pipeline talks to.
#[derive(Clone)]
pub struct Backends {
    pub local: Arc<dyn LlmClient>,
    pub cloud: Option<Arc<dyn LlmClient>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub references: Option<Arc<dyn ReferenceProvider>>,
}

impl Backends {
    pub fn from_config(config: &AppConfig, pool: &BlockingPool) -> Result<Self, BackendError> {
        let local = OllamaClient::new(
            &config.local_llm.base_url,
            &config.local_llm.model,
            config.local_llm.timeout_secs,
        )?;
        tracing::info!(
            event_name = "system.local_llm.configured",
            correlation_id = "bootstrap",
            model = local.model(),
            "local generative backend configured"
        );

        let cloud = match &config.cloud_llm.api_key {
            Some(api_key) if config.cloud_llm.is_enabled() => {
                let client = GeminiClient::new(
                    &config.cloud_llm.base_url,
                    &config.cloud_llm.model,
                    api_key.clone(),
                    config.cloud_llm.timeout_secs,
                )?;
                Some(Arc::new(client) as Arc<dyn LlmClient>)
            }
            _ => {
                tracing::warn!(
                    event_name = "system.cloud_llm.disabled",
                    correlation_id = "bootstrap",
                    "no cloud api key configured; rules questions will receive an apology"
                );
                None
            }
        };

        let embedder = match embedder_from_config(&config.embedding, pool) {
            Ok(embedder) => embedder,
            Err(error) => {
                tracing::warn!(
                    event_name = "system.embedding.init_failed",
                    correlation_id = "bootstrap",
                    error = %error,
                    "embedding backend could not be created"
                );
                None
            }
        };

        Ok(Self { local: Arc::new(local), cloud, embedder, references: None })
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    pub catalog_dir: PathBuf,
    pub settings: RoutingSettings,
    pub query_prefix: String,
    pub workers: usize,
}

impl RuntimeOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            catalog_dir: config.catalog.dir.clone(),
            settings: config.routing.clone(),
            query_prefix: config.embedding.query_prefix.clone(),
            workers: config.embedding.workers,
        }
    }
}

/// Catalog plus everything compiled from it; replaced wholesale on reload.
pub struct RoutingSnapshot {
    pub catalog: RoutingCatalog,
    pub router: SimilarityRouter,
    pub guardrails: GuardrailPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub catalog: CatalogSummary,
    pub similarity_enabled: bool,
    pub similarity_threshold: f32,
    pub embedded_intents: usize,
    pub embedded_anchors: usize,
    pub allowlist_terms: usize,
    pub cloud_enabled: bool,
}

/// Orchestrator composing the routing stages into one request/response call.
pub struct AgentRuntime {
    options: RuntimeOptions,
    backends: Backends,
    pool: BlockingPool,
    classifier: IntentClassifier,
    dispatcher: Dispatcher,
    snapshot: RwLock<Arc<RoutingSnapshot>>,
    embedding_disabled: AtomicBool,
    reload_lock: Mutex<()>,
}

impl AgentRuntime {
    pub async fn from_config(config: &AppConfig) -> Result<Self, ApplicationError> {
        let options = RuntimeOptions::from_config(config);
        let pool = BlockingPool::new(options.workers);
        let backends = Backends::from_config(config, &pool)
            .map_err(ApplicationError::GenerationBackendFailure)?;
        Self::start(options, backends, pool).await
    }

    /// Loads the catalog and compiles the first snapshot; catalog errors are fatal.
    pub async fn start(
        options: RuntimeOptions,
        backends: Backends,
        pool: BlockingPool,
    ) -> Result<Self, ApplicationError> {
        let catalog = RoutingCatalog::load(&options.catalog_dir)?;

        let mut rules =
            RuleQueryEngine::new(backends.cloud.clone(), options.settings.rag_history_limit);
        if let Some(references) = &backends.references {
            rules = rules.with_references(Arc::clone(references));
        }
        let dispatcher = Dispatcher::new(Arc::clone(&backends.local), rules);
        let classifier = IntentClassifier::new(Arc::clone(&backends.local));

        let runtime = Self {
            embedding_disabled: AtomicBool::new(false),
            snapshot: RwLock::new(Arc::new(RoutingSnapshot {
                router: SimilarityRouter::disabled(
                    options.settings.similarity_threshold,
                    pool.clone(),
                ),
                guardrails: GuardrailPolicy::from_catalog(&catalog),
                catalog,
            })),
            options,
            backends,
            pool,
            classifier,
            dispatcher,
            reload_lock: Mutex::new(()),
        };

        let initial = runtime.snapshot().await;
        let compiled = runtime.compile(initial.catalog.clone()).await;
        let summary = compiled.catalog.summary();
        *runtime.snapshot.write().await = Arc::new(compiled);

        tracing::info!(
            event_name = "catalog.load.applied",
            correlation_id = "bootstrap",
            intents = summary.intents,
            anchor_phrases = summary.anchor_phrases,
            activities = summary.activities,
            "routing catalog loaded"
        );

        Ok(runtime)
    }

    pub async fn snapshot(&self) -> Arc<RoutingSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    async fn compile(&self, catalog: RoutingCatalog) -> RoutingSnapshot {
        let threshold = self.options.settings.similarity_threshold;
        let guardrails = GuardrailPolicy::from_catalog(&catalog);
        let disabled = || SimilarityRouter::disabled(threshold, self.pool.clone());

        let router = match (&self.backends.embedder, self.embedding_disabled.load(Ordering::SeqCst))
        {
            (Some(embedder), false) => match SimilarityRouter::build(
                Arc::clone(embedder),
                catalog.anchors(),
                threshold,
                &self.options.query_prefix,
                self.pool.clone(),
            )
            .await
            {
                Ok(router) => router,
                Err(error) => {
                    self.disable_similarity(&error.to_string());
                    disabled()
                }
            },
            (None, _) => {
                self.disable_similarity("no embedding backend configured");
                disabled()
            }
            (Some(_), true) => disabled(),
        };

        RoutingSnapshot { catalog, router, guardrails }
    }

    fn disable_similarity(&self, reason: &str) {
        if !self.embedding_disabled.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                event_name = "routing.similarity.disabled",
                correlation_id = "bootstrap",
                reason,
                "similarity router disabled for the rest of the process lifetime"
            );
        }
    }

    /// Build-then-swap; a failed reload keeps the current snapshot.
    pub async fn reload(&self) -> Result<CatalogSummary, ApplicationError> {
        let _serialized = self.reload_lock.lock().await;

        let catalog = match RoutingCatalog::load(&self.options.catalog_dir) {
            Ok(catalog) => catalog,
            Err(error) => {
                tracing::error!(
                    event_name = "catalog.reload.rejected",
                    correlation_id = "admin",
                    error = %error,
                    "catalog reload failed; keeping the current snapshot"
                );
                return Err(error.into());
            }
        };

        let compiled = self.compile(catalog).await;
        let summary = compiled.catalog.summary();
        *self.snapshot.write().await = Arc::new(compiled);

        tracing::info!(
            event_name = "catalog.reload.applied",
            correlation_id = "admin",
            intents = summary.intents,
            anchor_phrases = summary.anchor_phrases,
            "routing catalog reloaded"
        );

        Ok(summary)
    }

    pub async fn status(&self) -> RuntimeStatus {
        let snapshot = self.snapshot().await;
        RuntimeStatus {
            catalog: snapshot.catalog.summary(),
            similarity_enabled: snapshot.router.is_enabled(),
            similarity_threshold: snapshot.router.threshold(),
            embedded_intents: snapshot.router.index().map_or(0, |index| index.intent_count()),
            embedded_anchors: snapshot.router.index().map_or(0, |index| index.vector_count()),
            allowlist_terms: snapshot.guardrails.allowlist().len(),
            cloud_enabled: self.dispatcher.rules().has_cloud(),
        }
    }

    pub async fn handle(&self, request: &PipelineRequest) -> PipelineResult {
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let snapshot = self.snapshot().await;
        let catalog = &snapshot.catalog;
        let settings = &self.options.settings;
        let query = request.query.trim();

        let similarity = snapshot.router.evaluate(query, settings.top_k).await;
        let fastpath_score = similarity.best_score;

        let (routed, safety_override) = match &similarity.hit {
            Some(hit) => {
                (RouterResult::new(hit.intent.clone(), hit.score, RouteSource::Fastpath), None)
            }
            None => {
                let routed = self
                    .classify(&snapshot, request, query, &similarity, &correlation_id)
                    .await;
                match snapshot.guardrails.evaluate(&routed.intent, query) {
                    GuardrailDecision::Keep => (routed, None),
                    GuardrailDecision::Override { intent, keyword } => {
                        let classified = routed.intent.clone();
                        (RouterResult { intent, ..routed }, Some((classified, keyword)))
                    }
                }
            }
        };

        let outcome = self
            .dispatcher
            .dispatch(
                catalog,
                DispatchInput {
                    intent: &routed.intent,
                    query,
                    history: &request.history,
                    activity: &request.activity_context,
                },
                &correlation_id,
            )
            .await;

        let via_fastpath = routed.source == RouteSource::Fastpath;
        let result = PipelineResult {
            response: outcome.response,
            intent: routed.intent.clone(),
            confidence: routed.confidence,
            source: outcome.source.label(via_fastpath),
            intent_override: outcome.intent_override,
        };

        let classified_intent =
            safety_override.as_ref().map_or(&routed.intent, |(classified, _)| classified);
        tracing::info!(
            event_name = "pipeline.request.completed",
            correlation_id = %correlation_id,
            intent = %result.intent,
            classified_intent = %classified_intent,
            route = routed.source.as_str(),
            source = %result.source,
            confidence = result.confidence,
            fastpath_score,
            safety_override = safety_override.as_ref().map(|(_, keyword)| keyword.as_str()),
            intent_override = result.intent_override.as_ref().map(Intent::as_str),
            latency_ms = started.elapsed().as_millis() as u64,
            "request routed"
        );

        result
    }

    async fn classify(
        &self,
        snapshot: &RoutingSnapshot,
        request: &PipelineRequest,
        query: &str,
        similarity: &SimilarityOutcome,
        correlation_id: &str,
    ) -> RouterResult {
        let settings = &self.options.settings;
        let context = conversation::extract(
            &request.history,
            settings.context_window,
            settings.context_max_length,
        );

        let activity = snapshot.catalog.library().resolve(request.activity_context.activity_id());
        let keywords: Vec<String> = activity
            .map(|activity| {
                activity.prompt_keywords().iter().take(settings.keyword_limit).cloned().collect()
            })
            .unwrap_or_default();

        let prompt = ClassifierPrompt {
            scores: &similarity.ranked,
            context: &context,
            keywords: &keywords,
            query,
        };
        self.classifier.classify(&snapshot.catalog, &prompt, correlation_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use akka_core::config::RoutingSettings;
    use akka_core::domain::conversation::{ActivityContext, ConversationTurn};
    use akka_core::domain::routing::PipelineRequest;
    use tempfile::TempDir;

    use super::{AgentRuntime, Backends, RuntimeOptions};
    use crate::embedding::{BlockingPool, Embedder};
    use crate::llm::LlmClient;
    use crate::testing::{write_catalog, FailingEmbedder, HashEmbedder, ScriptedLlm, ROUTING};

    struct Harness {
        _dir: TempDir,
        runtime: AgentRuntime,
        local: Arc<ScriptedLlm>,
        cloud: Arc<ScriptedLlm>,
    }

    async fn harness(
        routing: &str,
        local: ScriptedLlm,
        cloud: ScriptedLlm,
        embedder: Arc<dyn Embedder>,
    ) -> Harness {
        let dir = TempDir::new().expect("tempdir");
        write_catalog(dir.path(), routing);

        let local = Arc::new(local);
        let cloud = Arc::new(cloud);
        let backends = Backends {
            local: local.clone() as Arc<dyn LlmClient>,
            cloud: Some(cloud.clone() as Arc<dyn LlmClient>),
            embedder: Some(embedder),
            references: None,
        };
        let options = RuntimeOptions {
            catalog_dir: dir.path().to_path_buf(),
            settings: RoutingSettings::default(),
            query_prefix: "query: ".to_string(),
            workers: 2,
        };

        let runtime =
            AgentRuntime::start(options, backends, BlockingPool::new(2)).await.expect("runtime");
        Harness { _dir: dir, runtime, local, cloud }
    }

    #[tokio::test]
    async fn anchor_hit_is_served_from_the_fastpath() {
        let h = harness(
            ROUTING,
            ScriptedLlm::default(),
            ScriptedLlm::default(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let result = h.runtime.handle(&PipelineRequest::new("wifi密碼")).await;

        assert_eq!(result.source, "fastpath_content_static");
        assert!(result.intent.is("STORE_WIFI"));
        assert!((result.confidence - 1.0).abs() < 1e-5);
        assert!(result.response.contains("playmoregames"));
        assert!(h.local.calls().is_empty(), "fastpath must not consult the classifier");
    }

    #[tokio::test]
    async fn miss_goes_through_classifier_to_static_bank() {
        let h = harness(
            ROUTING,
            ScriptedLlm::replying([r#"{"intent": "STORE_FEE", "confidence": 0.88}"#]),
            ScriptedLlm::default(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let result = h.runtime.handle(&PipelineRequest::new("平日多少錢")).await;

        assert_eq!(result.source, "content_static");
        assert!(result.intent.is("STORE_FEE"));
        assert!((result.confidence - 0.88).abs() < 1e-6);
        assert!(result.intent_override.is_none());

        let prompt = &h.local.calls()[0].prompt;
        assert!(prompt.starts_with("[Semantic Scores]\n- "));
        assert!(prompt.contains("[Activity Keywords]\n梅林, 派西維爾, 刺客"));
        assert!(prompt.ends_with("[User Input] 平日多少錢"));
    }

    #[tokio::test]
    async fn allowlisted_sensitive_verdict_is_answered_by_rules_engine() {
        let h = harness(
            ROUTING,
            ScriptedLlm::replying([r#"{"intent": "SENSITIVE", "confidence": 0.9}"#]),
            ScriptedLlm::replying(["刺客在最後一輪指認梅林即可。"]),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let result = h.runtime.handle(&PipelineRequest::new("刺客要怎麼殺死梅林")).await;

        assert!(result.intent.is("RULES"));
        assert_eq!(result.source, "cloud_gen");
        assert_eq!(result.response, "刺客在最後一輪指認梅林即可。");
        assert_eq!(h.cloud.calls().len(), 1);
    }

    #[tokio::test]
    async fn sensitive_anchor_hit_skips_the_allowlist() {
        let routing = ROUTING.replace(
            "[static_responses]",
            "[[anchors]]\nintent = \"SENSITIVE\"\nphrases = [\"刺客殺人\"]\n\n[static_responses]",
        );
        let h = harness(
            &routing,
            ScriptedLlm::default(),
            ScriptedLlm::default(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let result = h.runtime.handle(&PipelineRequest::new("刺客殺人")).await;

        assert_eq!(result.source, "fastpath_reject");
        assert!(result.intent.is("SENSITIVE"));
        assert_eq!(result.response, "這個話題我沒辦法回答喔。");
        assert!(h.local.calls().is_empty());
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn sensitive_verdict_without_allowlist_match_is_rejected() {
        let h = harness(
            ROUTING,
            ScriptedLlm::replying([r#"{"intent": "SENSITIVE", "confidence": 0.9}"#]),
            ScriptedLlm::default(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let result = h.runtime.handle(&PipelineRequest::new("怎麼傷害別人")).await;

        assert!(result.intent.is("SENSITIVE"));
        assert_eq!(result.source, "reject");
    }

    #[tokio::test]
    async fn cloud_failure_keeps_classified_intent_and_tags_override() {
        let h = harness(
            ROUTING,
            ScriptedLlm::replying([r#"{"intent": "RULES", "confidence": 0.8}"#]),
            ScriptedLlm::failing(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let mut request = PipelineRequest::new("卡卡頌農夫怎麼放");
        request.activity_context = ActivityContext::for_activity("carcassonne");
        request.history = vec![
            ConversationTurn::user("你們有賣卡坦島嗎"),
            ConversationTurn::assistant("有喔", Some("STORE_SALES".into())),
        ];

        let result = h.runtime.handle(&request).await;

        assert!(result.intent.is("RULES"));
        assert_eq!(result.source, "error");
        assert_eq!(result.response, "抱歉，規則查詢暫時失敗。");
        assert_eq!(
            result.intent_override.as_ref().map(|intent| intent.as_str()),
            Some("GENERATION_ERROR")
        );

        let prompt = &h.local.calls()[0].prompt;
        assert!(prompt.contains("[Recent Context]\n- STORE_SALES: 你們有賣卡坦島嗎"));
        assert!(prompt.contains("卡卡頌, 米寶, 板塊"));
    }

    #[tokio::test]
    async fn embedding_outage_disables_fastpath_permanently() {
        let h = harness(
            ROUTING,
            ScriptedLlm::replying([
                r#"{"intent": "STORE_WIFI", "confidence": 0.7}"#,
                r#"{"intent": "STORE_WIFI", "confidence": 0.7}"#,
            ]),
            ScriptedLlm::default(),
            Arc::new(FailingEmbedder),
        )
        .await;

        let result = h.runtime.handle(&PipelineRequest::new("wifi密碼")).await;
        assert_eq!(result.source, "content_static");
        assert!(!h.runtime.status().await.similarity_enabled);

        h.runtime.reload().await.expect("reload");
        assert!(!h.runtime.status().await.similarity_enabled);

        let prompt = &h.local.calls()[0].prompt;
        assert!(!prompt.contains("[Semantic Scores]"));
    }

    #[tokio::test]
    async fn reloading_unchanged_catalog_keeps_decisions_stable() {
        let embedder = Arc::new(HashEmbedder::default());
        let h = harness(ROUTING, ScriptedLlm::default(), ScriptedLlm::default(), embedder.clone())
            .await;
        let probes = ["wifi密碼", "網路密碼", "低消怎麼算"];

        let mut before = Vec::new();
        for probe in probes {
            let snapshot = h.runtime.snapshot().await;
            before.push(snapshot.router.route(probe).await);
        }

        h.runtime.reload().await.expect("first reload");
        h.runtime.reload().await.expect("second reload");

        for (probe, expected) in probes.into_iter().zip(before) {
            let snapshot = h.runtime.snapshot().await;
            assert_eq!(snapshot.router.route(probe).await, expected);
        }

        // three anchor batches plus one query embedding per probe
        assert_eq!(embedder.calls(), 3 + probes.len() * 2);
    }

    #[tokio::test]
    async fn requests_keep_routing_while_reloads_run() {
        let h = harness(
            ROUTING,
            ScriptedLlm::default(),
            ScriptedLlm::default(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let requests = async {
            for _ in 0..20 {
                let result = h.runtime.handle(&PipelineRequest::new("wifi密碼")).await;
                assert_eq!(result.source, "fastpath_content_static");
            }
        };
        let reloads = async {
            for _ in 0..5 {
                h.runtime.reload().await.expect("reload");
            }
        };
        tokio::join!(requests, reloads);

        assert_eq!(h.runtime.status().await.embedded_intents, 2);
        assert!(h.local.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_catalog_on_reload_keeps_previous_snapshot() {
        let h = harness(
            ROUTING,
            ScriptedLlm::default(),
            ScriptedLlm::default(),
            Arc::new(HashEmbedder::default()),
        )
        .await;

        let routing_path = h.runtime.snapshot().await.catalog.root().join("routing.toml");
        fs::write(&routing_path, "[fallback]\nresponses = []\n").expect("overwrite routing");

        assert!(h.runtime.reload().await.is_err());

        let result = h.runtime.handle(&PipelineRequest::new("wifi密碼")).await;
        assert_eq!(result.source, "fastpath_content_static");
    }

    #[tokio::test]
    async fn unknown_catalog_dir_is_fatal_at_start() {
        let backends = Backends {
            local: Arc::new(ScriptedLlm::default()),
            cloud: None,
            embedder: None,
            references: None,
        };
        let options = RuntimeOptions {
            catalog_dir: "/nonexistent/akka/catalog".into(),
            settings: RoutingSettings::default(),
            query_prefix: String::new(),
            workers: 1,
        };

        assert!(AgentRuntime::start(options, backends, BlockingPool::new(1)).await.is_err());
    }
}
