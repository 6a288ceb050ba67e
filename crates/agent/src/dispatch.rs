use std::sync::Arc;

use akka_core::catalog::{DispatchRule, RoutingCatalog};
use akka_core::domain::conversation::{ActivityContext, ConversationTurn};
use akka_core::domain::intent::Intent;
use akka_core::domain::routing::{DispatchOutcome, ResponseSource};
use rand::seq::SliceRandom;

use crate::llm::LlmClient;
use crate::rules::{RuleQuery, RuleQueryEngine};

/// Turns a final intent into a response using the catalog tables.
#[derive(Clone)]
pub struct Dispatcher {
    local: Arc<dyn LlmClient>,
    rules: RuleQueryEngine,
}

pub struct DispatchInput<'a> {
    pub intent: &'a Intent,
    pub query: &'a str,
    pub history: &'a [ConversationTurn],
    pub activity: &'a ActivityContext,
}

impl Dispatcher {
    pub fn new(local: Arc<dyn LlmClient>, rules: RuleQueryEngine) -> Self {
        Self { local, rules }
    }

    pub fn rules(&self) -> &RuleQueryEngine {
        &self.rules
    }

    pub async fn dispatch(
        &self,
        catalog: &RoutingCatalog,
        input: DispatchInput<'_>,
        correlation_id: &str,
    ) -> DispatchOutcome {
        match catalog.resolve(input.intent) {
            DispatchRule::Static(responses) => {
                DispatchOutcome::new(pick(responses), ResponseSource::ContentStatic)
            }
            DispatchRule::Reject(response) => {
                DispatchOutcome::new(response, ResponseSource::Reject)
            }
            DispatchRule::LocalLlm(persona) => {
                let reply = self
                    .local
                    .generate(&persona.system_prompt, input.query, &persona.options)
                    .await;
                match reply {
                    Ok(text) => DispatchOutcome::new(text, ResponseSource::LocalLlmGen),
                    Err(error) => {
                        tracing::warn!(
                            event_name = "dispatch.local_llm.failed",
                            correlation_id,
                            persona = %persona.name,
                            backend = error.backend(),
                            error = %error,
                            "persona generation failed"
                        );
                        DispatchOutcome::generation_failure(&catalog.messages().local_failure)
                    }
                }
            }
            DispatchRule::CloudRag { template, topic_intent, options } => {
                let request = RuleQuery {
                    template,
                    topic_intent,
                    options,
                    query: input.query,
                    history: input.history,
                    activity: input.activity,
                };
                self.rules.answer(catalog, request, correlation_id).await
            }
            DispatchRule::Fallback(responses) => {
                DispatchOutcome::new(pick(responses), ResponseSource::Fallback)
            }
        }
    }
}

fn pick(responses: &[String]) -> String {
    responses.choose(&mut rand::thread_rng()).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use akka_core::catalog::RoutingCatalog;
    use akka_core::domain::conversation::ActivityContext;
    use akka_core::domain::intent::Intent;
    use akka_core::domain::routing::{DispatchOutcome, ResponseSource};
    use tempfile::TempDir;

    use super::{DispatchInput, Dispatcher};
    use crate::rules::RuleQueryEngine;
    use crate::testing::{write_catalog, ScriptedLlm, ROUTING};

    async fn dispatch(local: ScriptedLlm, intent: &str, query: &str) -> DispatchOutcome {
        let dir = TempDir::new().expect("tempdir");
        write_catalog(dir.path(), ROUTING);
        let catalog = RoutingCatalog::load(dir.path()).expect("catalog");
        let dispatcher = Dispatcher::new(Arc::new(local), RuleQueryEngine::new(None, 6));
        let intent = Intent::from(intent);
        let activity = ActivityContext::default();

        dispatcher
            .dispatch(
                &catalog,
                DispatchInput { intent: &intent, query, history: &[], activity: &activity },
                "test",
            )
            .await
    }

    #[tokio::test]
    async fn static_bank_answers_first() {
        let outcome = dispatch(ScriptedLlm::default(), "STORE_FEE", "平日多少錢").await;
        assert_eq!(outcome.source, ResponseSource::ContentStatic);
        assert!(outcome.response.contains("150"));
    }

    #[tokio::test]
    async fn reject_handler_returns_refusal() {
        let outcome = dispatch(ScriptedLlm::default(), "SENSITIVE", "...").await;
        assert_eq!(outcome.source, ResponseSource::Reject);
        assert_eq!(outcome.response, "這個話題我沒辦法回答喔。");
    }

    #[tokio::test]
    async fn persona_handler_uses_local_backend() {
        let outcome = dispatch(ScriptedLlm::replying(["你好呀！"]), "CHITCHAT", "嗨").await;
        assert_eq!(outcome.source, ResponseSource::LocalLlmGen);
        assert_eq!(outcome.response, "你好呀！");
    }

    #[tokio::test]
    async fn persona_failure_reports_error_source() {
        let outcome = dispatch(ScriptedLlm::failing(), "CHITCHAT", "嗨").await;
        assert_eq!(outcome.source, ResponseSource::Error);
        assert!(outcome.intent_override.is_some());
    }

    #[tokio::test]
    async fn unresolvable_intent_uses_fallback_pool() {
        let outcome = dispatch(ScriptedLlm::default(), "UNKNOWN", "???").await;
        assert_eq!(outcome.source, ResponseSource::Fallback);
        assert_eq!(outcome.response, "不好意思，可以換個說法嗎？");
    }
}
