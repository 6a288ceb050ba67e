use std::sync::Arc;

use akka_core::catalog::RoutingCatalog;
use akka_core::domain::routing::{RouteSource, RouterResult};
use akka_core::errors::BackendError;
use akka_core::prompt::ClassifierPrompt;
use serde_json::Value;

use crate::llm::LlmClient;

const DEFAULT_CONFIDENCE: f32 = 0.5;

/// LLM router consulted when the similarity fastpath misses.
#[derive(Clone)]
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Never fails; backend or parse problems yield the unknown intent.
    pub async fn classify(
        &self,
        catalog: &RoutingCatalog,
        prompt: &ClassifierPrompt<'_>,
        correlation_id: &str,
    ) -> RouterResult {
        let fallback = || RouterResult::fallback(catalog.roles().unknown.clone());

        let system_prompt = match catalog.renderer().render_classifier(catalog.known_intents()) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::error!(
                    event_name = "routing.classifier.prompt_failed",
                    correlation_id,
                    error = %error,
                    "classifier system prompt failed to render"
                );
                return fallback();
            }
        };

        let reply = self
            .llm
            .generate_json(&system_prompt, &prompt.render(), catalog.classifier_options())
            .await
            .and_then(|value| parse_verdict(self.llm.name(), &value));

        match reply {
            Ok((label, confidence)) => match catalog.canonical_intent(&label) {
                Some(intent) => {
                    RouterResult::new(intent.clone(), confidence, RouteSource::LlmRouter)
                }
                None => {
                    tracing::warn!(
                        event_name = "routing.classifier.unknown_label",
                        correlation_id,
                        label = %label,
                        "classifier returned a label outside the catalog"
                    );
                    fallback()
                }
            },
            Err(error) => {
                tracing::warn!(
                    event_name = "routing.classifier.failed",
                    correlation_id,
                    backend = error.backend(),
                    error = %error,
                    "classifier call failed; using fallback"
                );
                fallback()
            }
        }
    }
}

fn parse_verdict(backend: &'static str, value: &Value) -> Result<(String, f32), BackendError> {
    let malformed = |message: &str| BackendError::MalformedOutput {
        backend,
        message: message.to_string(),
    };

    let label = value
        .get("intent")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .ok_or_else(|| malformed("reply has no `intent` string"))?;

    let confidence = match value.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(Value::Number(number)) => number.as_f64().map_or(DEFAULT_CONFIDENCE, |n| n as f32),
        Some(Value::String(raw)) => raw.trim().parse::<f32>().unwrap_or(DEFAULT_CONFIDENCE),
        Some(_) => return Err(malformed("`confidence` is not a number")),
    };

    if !confidence.is_finite() {
        return Err(malformed("`confidence` is not finite"));
    }

    Ok((label.to_string(), confidence))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use akka_core::catalog::RoutingCatalog;
    use akka_core::domain::routing::RouteSource;
    use akka_core::prompt::ClassifierPrompt;
    use tempfile::TempDir;

    use super::IntentClassifier;
    use crate::testing::{write_catalog, ScriptedLlm, ROUTING};

    fn catalog() -> (TempDir, RoutingCatalog) {
        let dir = TempDir::new().expect("tempdir");
        write_catalog(dir.path(), ROUTING);
        let catalog = RoutingCatalog::load(dir.path()).expect("catalog");
        (dir, catalog)
    }

    fn prompt() -> ClassifierPrompt<'static> {
        ClassifierPrompt { query: "平日多少錢", ..ClassifierPrompt::default() }
    }

    #[tokio::test]
    async fn structured_reply_becomes_llm_router_result() {
        let (_dir, catalog) = catalog();
        let llm =
            Arc::new(ScriptedLlm::replying([r#"{"intent": "store_fee", "confidence": 0.92}"#]));
        let classifier = IntentClassifier::new(llm.clone());

        let result = classifier.classify(&catalog, &prompt(), "test").await;

        assert!(result.intent.is("STORE_FEE"));
        assert!((result.confidence - 0.92).abs() < 1e-6);
        assert_eq!(result.source, RouteSource::LlmRouter);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].options.json);
        assert!(calls[0].system_prompt.contains("STORE_FEE"));
        assert_eq!(calls[0].prompt, "[User Input] 平日多少錢");
    }

    #[tokio::test]
    async fn missing_confidence_defaults_to_half() {
        let (_dir, catalog) = catalog();
        let llm = Arc::new(ScriptedLlm::replying([r#"{"intent": "RULES"}"#]));

        let result = IntentClassifier::new(llm).classify(&catalog, &prompt(), "test").await;

        assert!(result.intent.is("RULES"));
        assert_eq!(result.confidence, 0.5);
    }

    #[tokio::test]
    async fn malformed_or_failed_replies_fall_back_to_unknown() {
        let (_dir, catalog) = catalog();

        for llm in [
            ScriptedLlm::replying(["definitely RULES"]),
            ScriptedLlm::replying([r#"{"label": "RULES"}"#]),
            ScriptedLlm::replying([r#"{"intent": "NOT_A_LABEL", "confidence": 0.9}"#]),
            ScriptedLlm::failing(),
        ] {
            let result =
                IntentClassifier::new(Arc::new(llm)).classify(&catalog, &prompt(), "t").await;
            assert!(result.intent.is("UNKNOWN"));
            assert_eq!(result.confidence, 0.0);
            assert_eq!(result.source, RouteSource::Fallback);
        }
    }
}
