use std::sync::Arc;

use akka_core::catalog::RoutingCatalog;
use akka_core::domain::conversation::{ActivityContext, ConversationTurn, Role};
use akka_core::domain::intent::Intent;
use akka_core::domain::routing::{DispatchOutcome, ResponseSource};
use akka_core::prompt::GenerationOptions;
use akka_core::reference::ReferenceProvider;

use crate::llm::LlmClient;

/// Cloud handler answering rules questions from reference material.
#[derive(Clone)]
pub struct RuleQueryEngine {
    cloud: Option<Arc<dyn LlmClient>>,
    references: Option<Arc<dyn ReferenceProvider>>,
    history_limit: usize,
}

pub struct RuleQuery<'a> {
    pub template: &'a str,
    pub topic_intent: &'a Intent,
    pub options: &'a GenerationOptions,
    pub query: &'a str,
    pub history: &'a [ConversationTurn],
    pub activity: &'a ActivityContext,
}

impl RuleQueryEngine {
    pub fn new(cloud: Option<Arc<dyn LlmClient>>, history_limit: usize) -> Self {
        Self { cloud, references: None, history_limit }
    }

    /// Replaces the catalog activity library as the reference source.
    pub fn with_references(mut self, references: Arc<dyn ReferenceProvider>) -> Self {
        self.references = Some(references);
        self
    }

    pub fn has_cloud(&self) -> bool {
        self.cloud.is_some()
    }

    pub async fn answer(
        &self,
        catalog: &RoutingCatalog,
        request: RuleQuery<'_>,
        correlation_id: &str,
    ) -> DispatchOutcome {
        let messages = catalog.messages();
        let Some(cloud) = &self.cloud else {
            tracing::warn!(
                event_name = "dispatch.cloud_rag.unconfigured",
                correlation_id,
                "no cloud backend configured for rules questions"
            );
            return DispatchOutcome::generation_failure(&messages.generation_failure);
        };

        let library = catalog.library();
        let requested = request.activity.activity_id();
        let activity = library.resolve(requested);
        let activity_id = activity.map(|activity| activity.id.as_str()).or(requested);
        let activity_name = activity
            .map(|activity| activity.display_name.as_str())
            .or(requested)
            .unwrap_or_default();

        let reference = activity_id.and_then(|id| match &self.references {
            Some(provider) => provider.get_reference(id),
            None => library.get_reference(id),
        });
        let reference = match reference {
            Some(text) => text,
            None => {
                tracing::info!(
                    event_name = "dispatch.cloud_rag.reference_missing",
                    correlation_id,
                    activity_id = activity_id.unwrap_or_default(),
                    "no reference document; answering from general knowledge"
                );
                messages.reference_unavailable.clone()
            }
        };

        let history = topic_history(request.history, request.topic_intent, self.history_limit);
        let system_prompt = match catalog.renderer().render_rag(
            request.template,
            &reference,
            &history,
            activity_name,
        ) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::error!(
                    event_name = "dispatch.cloud_rag.template_failed",
                    correlation_id,
                    template = request.template,
                    error = %error,
                    "rules template failed to render"
                );
                return DispatchOutcome::generation_failure(&messages.generation_failure);
            }
        };

        match cloud.generate(&system_prompt, request.query, request.options).await {
            Ok(text) => DispatchOutcome::new(text, ResponseSource::CloudGen),
            Err(error) => {
                tracing::warn!(
                    event_name = "dispatch.cloud_rag.failed",
                    correlation_id,
                    backend = error.backend(),
                    error = %error,
                    "cloud generation failed"
                );
                DispatchOutcome::generation_failure(&messages.generation_failure)
            }
        }
    }
}

/// Turns tagged with `topic` plus the user turn right before each tagged
/// assistant turn, bounded to the last `limit` turns.
pub fn topic_history(
    history: &[ConversationTurn],
    topic: &Intent,
    limit: usize,
) -> Vec<ConversationTurn> {
    let selected: Vec<ConversationTurn> = history
        .iter()
        .enumerate()
        .filter(|(index, turn)| {
            if turn.is_tagged(topic) {
                return true;
            }
            turn.role == Role::User
                && history.get(index + 1).is_some_and(|next| {
                    next.role == Role::Assistant && next.is_tagged(topic)
                })
        })
        .map(|(_, turn)| turn.clone())
        .collect();

    let skip = selected.len().saturating_sub(limit);
    selected.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use akka_core::catalog::{DispatchRule, RoutingCatalog};
    use akka_core::domain::conversation::{ActivityContext, ConversationTurn};
    use akka_core::domain::intent::Intent;
    use akka_core::domain::routing::ResponseSource;
    use tempfile::TempDir;

    use super::{topic_history, RuleQuery, RuleQueryEngine};
    use crate::testing::{write_catalog, ScriptedLlm, ROUTING};

    fn catalog() -> (TempDir, RoutingCatalog) {
        let dir = TempDir::new().expect("tempdir");
        write_catalog(dir.path(), ROUTING);
        let catalog = RoutingCatalog::load(dir.path()).expect("catalog");
        (dir, catalog)
    }

    async fn ask(
        engine: &RuleQueryEngine,
        catalog: &RoutingCatalog,
        history: &[ConversationTurn],
        activity: &ActivityContext,
    ) -> akka_core::domain::routing::DispatchOutcome {
        let rules = Intent::from("RULES");
        let DispatchRule::CloudRag { template, topic_intent, options } = catalog.resolve(&rules)
        else {
            panic!("RULES should be a cloud_rag handler");
        };
        let request = RuleQuery {
            template,
            topic_intent,
            options,
            query: "刺客什麼時候行動",
            history,
            activity,
        };
        engine.answer(catalog, request, "test").await
    }

    #[test]
    fn topic_history_keeps_tagged_pairs_within_limit() {
        let rules = Intent::from("RULES");
        let history = vec![
            ConversationTurn::user("wifi?"),
            ConversationTurn::assistant("BoardGame_Guest", Some("STORE_WIFI".into())),
            ConversationTurn::user("梅林是誰"),
            ConversationTurn::assistant("好人陣營的先知", Some(rules.clone())),
            ConversationTurn::user("刺客呢"),
            ConversationTurn::assistant("壞人陣營", Some(rules.clone())),
        ];

        let all = topic_history(&history, &rules, 6);
        let contents: Vec<&str> = all.iter().map(|turn| turn.content.as_str()).collect();
        assert_eq!(contents, vec!["梅林是誰", "好人陣營的先知", "刺客呢", "壞人陣營"]);

        let bounded = topic_history(&history, &rules, 2);
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].content, "刺客呢");
    }

    #[tokio::test]
    async fn renders_reference_and_calls_cloud_with_raw_query() {
        let (_dir, catalog) = catalog();
        let cloud = Arc::new(ScriptedLlm::replying(["刺客在任務結束後行動。"]));
        let engine = RuleQueryEngine::new(Some(cloud.clone()), 6);

        let outcome = ask(&engine, &catalog, &[], &ActivityContext::for_activity("Avalon")).await;

        assert_eq!(outcome.source, ResponseSource::CloudGen);
        assert_eq!(outcome.response, "刺客在任務結束後行動。");
        assert!(outcome.intent_override.is_none());

        let calls = cloud.calls();
        assert_eq!(calls[0].prompt, "刺客什麼時候行動");
        assert!(calls[0].system_prompt.starts_with("[阿瓦隆]\n刺客在任務結束後指認梅林。"));
    }

    #[tokio::test]
    async fn missing_reference_uses_notice() {
        let (_dir, catalog) = catalog();
        let cloud = Arc::new(ScriptedLlm::replying(["ok"]));
        let engine = RuleQueryEngine::new(Some(cloud.clone()), 6);

        ask(&engine, &catalog, &[], &ActivityContext::for_activity("carcassonne")).await;

        assert!(cloud.calls()[0].system_prompt.contains("(no reference)"));
    }

    #[tokio::test]
    async fn cloud_failure_and_missing_backend_yield_apology() {
        let (_dir, catalog) = catalog();

        for engine in [
            RuleQueryEngine::new(Some(Arc::new(ScriptedLlm::failing())), 6),
            RuleQueryEngine::new(None, 6),
        ] {
            let outcome = ask(&engine, &catalog, &[], &ActivityContext::default()).await;
            assert_eq!(outcome.source, ResponseSource::Error);
            assert_eq!(outcome.response, "抱歉，規則查詢暫時失敗。");
            assert_eq!(
                outcome.intent_override.as_ref().map(|intent| intent.as_str()),
                Some("GENERATION_ERROR")
            );
        }
    }
}
