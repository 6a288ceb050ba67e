use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::anchors::IntentScore;
use crate::catalog::CatalogError;
use crate::domain::conversation::{ConversationTurn, Role};
use crate::domain::intent::Intent;

pub const CLASSIFIER_TEMPLATE: &str = "classifier/system";

/// Sampling options forwarded to a generative backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    #[serde(default)]
    pub num_ctx: Option<u32>,
    #[serde(default)]
    pub num_predict: Option<u32>,
    #[serde(default)]
    pub json: bool,
}

impl GenerationOptions {
    pub fn classifier() -> Self {
        Self { temperature: 0.1, num_ctx: Some(4096), num_predict: Some(128), json: true }
    }

    pub fn persona() -> Self {
        Self { temperature: 0.7, num_ctx: None, num_predict: Some(64), json: false }
    }

    pub fn rag() -> Self {
        Self { temperature: 0.7, num_ctx: None, num_predict: None, json: false }
    }
}

/// Enriched user prompt for the classifier. Empty blocks are left out.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifierPrompt<'a> {
    pub scores: &'a [IntentScore],
    pub context: &'a [String],
    pub keywords: &'a [String],
    pub query: &'a str,
}

impl ClassifierPrompt<'_> {
    pub fn render(&self) -> String {
        let mut blocks = Vec::with_capacity(4);

        if !self.scores.is_empty() {
            let lines: Vec<String> = self
                .scores
                .iter()
                .map(|entry| format!("- {}: {:.2}", entry.intent, entry.score))
                .collect();
            blocks.push(format!("[Semantic Scores]\n{}", lines.join("\n")));
        }

        if !self.context.is_empty() {
            let lines: Vec<String> =
                self.context.iter().map(|entry| format!("- {entry}")).collect();
            blocks.push(format!("[Recent Context]\n{}", lines.join("\n")));
        }

        if !self.keywords.is_empty() {
            blocks.push(format!("[Activity Keywords]\n{}", self.keywords.join(", ")));
        }

        blocks.push(format!("[User Input] {}", self.query));
        blocks.join("\n\n")
    }
}

/// Precompiled catalog templates.
#[derive(Clone, Debug, Default)]
pub struct PromptRenderer {
    tera: Tera,
}

impl PromptRenderer {
    pub fn new() -> Self {
        Self { tera: Tera::default() }
    }

    pub fn register(&mut self, name: &str, source: &str) -> Result<(), CatalogError> {
        self.tera
            .add_raw_template(name, source)
            .map_err(|source| CatalogError::Template { name: name.to_string(), source })
    }

    pub fn render_classifier(&self, intents: &[Intent]) -> Result<String, tera::Error> {
        let names: Vec<&str> = intents.iter().map(Intent::as_str).collect();
        let mut context = Context::new();
        context.insert("intents", &names.join(", "));
        context.insert("intent_list", &names);
        self.tera.render(CLASSIFIER_TEMPLATE, &context)
    }

    pub fn render_rag(
        &self,
        name: &str,
        reference: &str,
        history: &[ConversationTurn],
        activity: &str,
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("reference", reference);
        context.insert("history", &format_history(history));
        context.insert("turns", history);
        context.insert("activity", activity);
        self.tera.render(&rag_template_name(name), &context)
    }
}

pub fn rag_template_name(name: &str) -> String {
    format!("rag/{name}")
}

pub fn format_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{speaker}: {}", turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{ClassifierPrompt, PromptRenderer};
    use crate::anchors::IntentScore;
    use crate::domain::conversation::ConversationTurn;

    #[test]
    fn classifier_prompt_lays_out_all_blocks() {
        let scores = vec![
            IntentScore { intent: "RULES".into(), score: 0.894 },
            IntentScore { intent: "STORE_SALES".into(), score: 0.72 },
        ];
        let context = vec!["STORE_SALES: 你們有賣卡坦島嗎".to_string()];
        let keywords = vec!["卡卡頌".to_string(), "米寶".to_string(), "板塊".to_string()];

        let prompt = ClassifierPrompt {
            scores: &scores,
            context: &context,
            keywords: &keywords,
            query: "農夫要怎麼放",
        }
        .render();

        assert_eq!(
            prompt,
            "[Semantic Scores]\n- RULES: 0.89\n- STORE_SALES: 0.72\n\n\
             [Recent Context]\n- STORE_SALES: 你們有賣卡坦島嗎\n\n\
             [Activity Keywords]\n卡卡頌, 米寶, 板塊\n\n\
             [User Input] 農夫要怎麼放"
        );
    }

    #[test]
    fn classifier_prompt_omits_empty_blocks() {
        let prompt =
            ClassifierPrompt { query: "平日多少錢", ..ClassifierPrompt::default() }.render();
        assert_eq!(prompt, "[User Input] 平日多少錢");
    }

    #[test]
    fn rag_templates_receive_named_placeholders() {
        let mut renderer = PromptRenderer::new();
        renderer
            .register("rag/rules", "遊戲: {{ activity }}\n{{ reference }}\n---\n{{ history }}")
            .expect("template should compile");

        let history = vec![
            ConversationTurn::user("刺客怎麼玩"),
            ConversationTurn::assistant("刺客在最後指認梅林。", Some("RULES".into())),
        ];
        let rendered = renderer
            .render_rag("rules", "# 規則", &history, "阿瓦隆")
            .expect("template should render");

        assert_eq!(
            rendered,
            "遊戲: 阿瓦隆\n# 規則\n---\nUser: 刺客怎麼玩\nAssistant: 刺客在最後指認梅林。"
        );
    }

    #[test]
    fn classifier_system_prompt_lists_intents() {
        let mut renderer = PromptRenderer::new();
        renderer
            .register(super::CLASSIFIER_TEMPLATE, "Labels: {{ intents }}")
            .expect("template should compile");

        let rendered =
            renderer.render_classifier(&["RULES".into(), "UNKNOWN".into()]).expect("render");
        assert_eq!(rendered, "Labels: RULES, UNKNOWN");
    }

    #[test]
    fn classifier_system_prompt_can_loop_over_intents() {
        let mut renderer = PromptRenderer::new();
        renderer
            .register(
                super::CLASSIFIER_TEMPLATE,
                "{% for intent in intent_list -%}\n- {{ intent }}\n{% endfor -%}",
            )
            .expect("template should compile");

        let rendered =
            renderer.render_classifier(&["RULES".into(), "UNKNOWN".into()]).expect("render");
        assert_eq!(rendered, "- RULES\n- UNKNOWN\n");
    }
}
