//! Configuration Store: routing tables, prompts and activities read from a
//! catalog directory of TOML files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::intent::Intent;
use crate::domain::routing::HandlerRule;
use crate::prompt::{rag_template_name, GenerationOptions, PromptRenderer, CLASSIFIER_TEMPLATE};
use crate::reference::{ActivitiesFile, ReferenceLibrary};

pub const ROUTING_FILE: &str = "routing.toml";
pub const PROMPTS_FILE: &str = "prompts.toml";
pub const ACTIVITIES_FILE: &str = "activities.toml";

const DEFAULT_GENERATION_FAILURE: &str = "抱歉，我現在無法回答這個問題，請稍後再試。";
const DEFAULT_REFERENCE_UNAVAILABLE: &str =
    "目前沒有這個活動的參考資料，請依照一般常識謹慎回答，並提醒玩家以實際規則書為準。";
const DEFAULT_LOCAL_FAILURE: &str = "抱歉，我剛剛沒聽清楚，可以再說一次嗎？";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read catalog file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse catalog file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("catalog template `{name}` is invalid: {source}")]
    Template { name: String, source: tera::Error },
    #[error("catalog validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentRoles {
    pub sensitive: Intent,
    pub benign_override: Intent,
    pub unknown: Intent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorPhrases {
    pub intent: Intent,
    pub phrases: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
    pub options: GenerationOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Messages {
    pub generation_failure: String,
    pub local_failure: String,
    pub reference_unavailable: String,
}

/// Resolution of a final intent against the dispatch tables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DispatchRule<'a> {
    Static(&'a [String]),
    Reject(&'a str),
    LocalLlm(&'a Persona),
    CloudRag { template: &'a str, topic_intent: &'a Intent, options: &'a GenerationOptions },
    Fallback(&'a [String]),
}

impl DispatchRule<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Reject(_) => "reject",
            Self::LocalLlm(_) => "local_llm",
            Self::CloudRag { .. } => "cloud_rag",
            Self::Fallback(_) => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub intents: usize,
    pub anchor_intents: usize,
    pub anchor_phrases: usize,
    pub static_intents: usize,
    pub handlers: usize,
    pub activities: usize,
}

#[derive(Clone, Debug)]
pub struct RoutingCatalog {
    root: PathBuf,
    roles: IntentRoles,
    anchors: Vec<AnchorPhrases>,
    static_responses: BTreeMap<Intent, Vec<String>>,
    handlers: BTreeMap<Intent, HandlerRule>,
    fallback: Vec<String>,
    messages: Messages,
    classifier_options: GenerationOptions,
    personas: BTreeMap<String, Persona>,
    rag_options: BTreeMap<String, GenerationOptions>,
    renderer: PromptRenderer,
    library: ReferenceLibrary,
    known_intents: Vec<Intent>,
}

impl RoutingCatalog {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let root = dir.as_ref().to_path_buf();
        let routing: RoutingFile = read_toml(&root.join(ROUTING_FILE))?;
        let prompts: PromptsFile = read_toml(&root.join(PROMPTS_FILE))?;

        let activities_path = root.join(ACTIVITIES_FILE);
        let activities: ActivitiesFile = if activities_path.exists() {
            read_toml(&activities_path)?
        } else {
            ActivitiesFile::default()
        };
        let library = ReferenceLibrary::load(&root, activities)?;

        Self::assemble(root, routing, prompts, library)
    }

    fn assemble(
        root: PathBuf,
        routing: RoutingFile,
        prompts: PromptsFile,
        library: ReferenceLibrary,
    ) -> Result<Self, CatalogError> {
        let roles = IntentRoles {
            sensitive: parse_intent("intents.sensitive", &routing.intents.sensitive)?,
            benign_override: parse_intent(
                "intents.benign_override",
                &routing.intents.benign_override,
            )?,
            unknown: parse_intent("intents.unknown", &routing.intents.unknown)?,
        };

        let anchors = merge_anchors(routing.anchors)?;

        let mut static_responses = BTreeMap::new();
        for (name, responses) in routing.static_responses {
            let intent = parse_intent("static_responses", &name)?;
            let responses = non_blank(responses);
            if responses.is_empty() {
                return Err(CatalogError::Validation(format!(
                    "static_responses.{intent} must contain at least one non-empty response"
                )));
            }
            static_responses.insert(intent, responses);
        }

        let mut handlers = BTreeMap::new();
        for (name, rule) in routing.handlers {
            let intent = parse_intent("handlers", &name)?;
            if static_responses.contains_key(&intent) {
                tracing::warn!(
                    event_name = "catalog.handler.shadowed",
                    correlation_id = "bootstrap",
                    intent = %intent,
                    "handler is shadowed by a static response entry"
                );
            }
            handlers.insert(intent, rule);
        }

        let fallback = non_blank(routing.fallback.responses);
        if fallback.is_empty() {
            return Err(CatalogError::Validation(
                "fallback.responses must contain at least one non-empty response".to_string(),
            ));
        }

        let messages = Messages {
            generation_failure: routing
                .messages
                .generation_failure
                .unwrap_or_else(|| DEFAULT_GENERATION_FAILURE.to_string()),
            local_failure: routing
                .messages
                .local_failure
                .unwrap_or_else(|| DEFAULT_LOCAL_FAILURE.to_string()),
            reference_unavailable: routing
                .messages
                .reference_unavailable
                .unwrap_or_else(|| DEFAULT_REFERENCE_UNAVAILABLE.to_string()),
        };

        let mut renderer = PromptRenderer::new();
        renderer.register(CLASSIFIER_TEMPLATE, &prompts.classifier.system_prompt)?;
        let classifier_options =
            prompts.classifier.options.resolve(GenerationOptions::classifier(), true);

        let personas = prompts
            .personas
            .into_iter()
            .map(|(name, entry)| {
                let persona = Persona {
                    name: name.clone(),
                    system_prompt: entry.system_prompt,
                    options: entry.options.resolve(GenerationOptions::persona(), false),
                };
                (name, persona)
            })
            .collect::<BTreeMap<_, _>>();

        let mut rag_options = BTreeMap::new();
        for (name, entry) in prompts.rag {
            renderer.register(&rag_template_name(&name), &entry.template)?;
            rag_options.insert(name, entry.options.resolve(GenerationOptions::rag(), false));
        }

        let known_intents =
            collect_known_intents(&roles, &anchors, &static_responses, &handlers);

        let catalog = Self {
            root,
            roles,
            anchors,
            static_responses,
            handlers,
            fallback,
            messages,
            classifier_options,
            personas,
            rag_options,
            renderer,
            library,
            known_intents,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for group in &self.anchors {
            if !self.is_routable(&group.intent) {
                return Err(CatalogError::Validation(format!(
                    "anchor intent `{}` has neither a static response nor a handler",
                    group.intent
                )));
            }
        }

        if !self.is_routable(&self.roles.benign_override) {
            return Err(CatalogError::Validation(format!(
                "intents.benign_override `{}` has neither a static response nor a handler",
                self.roles.benign_override
            )));
        }

        for (intent, rule) in &self.handlers {
            match rule {
                HandlerRule::Reject { response } if response.trim().is_empty() => {
                    return Err(CatalogError::Validation(format!(
                        "handlers.{intent} reject response must not be empty"
                    )));
                }
                HandlerRule::LocalLlm { persona } if !self.personas.contains_key(persona) => {
                    return Err(CatalogError::Validation(format!(
                        "handlers.{intent} references unknown persona `{persona}`"
                    )));
                }
                HandlerRule::CloudRag { template, topic_intent } => {
                    if !self.rag_options.contains_key(template) {
                        return Err(CatalogError::Validation(format!(
                            "handlers.{intent} references unknown template `{template}`"
                        )));
                    }
                    if let Some(topic) = topic_intent {
                        if !self.known_intents.contains(topic) {
                            return Err(CatalogError::Validation(format!(
                                "handlers.{intent} topic_intent `{topic}` is not a known intent"
                            )));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn is_routable(&self, intent: &Intent) -> bool {
        self.static_responses.contains_key(intent) || self.handlers.contains_key(intent)
    }

    /// Static bank first, then the handler table, then the fallback pool.
    pub fn resolve<'a>(&'a self, intent: &'a Intent) -> DispatchRule<'a> {
        if let Some(responses) = self.static_responses.get(intent) {
            return DispatchRule::Static(responses);
        }

        match self.handlers.get(intent) {
            Some(HandlerRule::Reject { response }) => DispatchRule::Reject(response),
            Some(HandlerRule::LocalLlm { persona }) => match self.personas.get(persona) {
                Some(persona) => DispatchRule::LocalLlm(persona),
                None => DispatchRule::Fallback(&self.fallback),
            },
            Some(HandlerRule::CloudRag { template, topic_intent }) => {
                match self.rag_options.get(template) {
                    Some(options) => DispatchRule::CloudRag {
                        template,
                        topic_intent: topic_intent.as_ref().unwrap_or(intent),
                        options,
                    },
                    None => DispatchRule::Fallback(&self.fallback),
                }
            }
            None => DispatchRule::Fallback(&self.fallback),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn roles(&self) -> &IntentRoles {
        &self.roles
    }

    pub fn anchors(&self) -> &[AnchorPhrases] {
        &self.anchors
    }

    pub fn known_intents(&self) -> &[Intent] {
        &self.known_intents
    }

    /// Maps a label to its catalog spelling, ignoring case and whitespace.
    pub fn canonical_intent(&self, label: &str) -> Option<&Intent> {
        let label = label.trim();
        self.known_intents.iter().find(|intent| intent.as_str().eq_ignore_ascii_case(label))
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn classifier_options(&self) -> &GenerationOptions {
        &self.classifier_options
    }

    pub fn renderer(&self) -> &PromptRenderer {
        &self.renderer
    }

    pub fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            intents: self.known_intents.len(),
            anchor_intents: self.anchors.len(),
            anchor_phrases: self.anchors.iter().map(|group| group.phrases.len()).sum(),
            static_intents: self.static_responses.len(),
            handlers: self.handlers.len(),
            activities: self.library.activities().len(),
        }
    }
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CatalogError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| CatalogError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| CatalogError::ParseFile { path: path.to_path_buf(), source })
}

fn parse_intent(field: &str, raw: &str) -> Result<Intent, CatalogError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(CatalogError::Validation(format!(
            "{field} contains an invalid intent name `{raw}`"
        )));
    }
    Ok(Intent::from(trimmed))
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values.into_iter().filter(|value| !value.trim().is_empty()).collect()
}

fn merge_anchors(entries: Vec<AnchorEntry>) -> Result<Vec<AnchorPhrases>, CatalogError> {
    let mut merged: Vec<AnchorPhrases> = Vec::new();

    for entry in entries {
        let intent = parse_intent("anchors.intent", &entry.intent)?;
        let phrases: Vec<String> = entry
            .phrases
            .into_iter()
            .map(|phrase| phrase.trim().to_string())
            .filter(|phrase| !phrase.is_empty())
            .collect();
        if phrases.is_empty() {
            return Err(CatalogError::Validation(format!(
                "anchors for `{intent}` must contain at least one phrase"
            )));
        }

        match merged.iter_mut().find(|group| group.intent == intent) {
            Some(group) => {
                for phrase in phrases {
                    if !group.phrases.contains(&phrase) {
                        group.phrases.push(phrase);
                    }
                }
            }
            None => {
                let mut unique = Vec::with_capacity(phrases.len());
                for phrase in phrases {
                    if !unique.contains(&phrase) {
                        unique.push(phrase);
                    }
                }
                merged.push(AnchorPhrases { intent, phrases: unique });
            }
        }
    }

    Ok(merged)
}

fn collect_known_intents(
    roles: &IntentRoles,
    anchors: &[AnchorPhrases],
    static_responses: &BTreeMap<Intent, Vec<String>>,
    handlers: &BTreeMap<Intent, HandlerRule>,
) -> Vec<Intent> {
    let mut seen = BTreeSet::new();
    anchors
        .iter()
        .map(|group| &group.intent)
        .chain(static_responses.keys())
        .chain(handlers.keys())
        .chain([&roles.sensitive, &roles.benign_override, &roles.unknown])
        .filter(|intent| seen.insert((*intent).clone()))
        .cloned()
        .collect()
}

#[derive(Debug, Deserialize)]
struct RoutingFile {
    #[serde(default)]
    intents: IntentsSection,
    #[serde(default)]
    anchors: Vec<AnchorEntry>,
    #[serde(default)]
    static_responses: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    handlers: BTreeMap<String, HandlerRule>,
    #[serde(default)]
    fallback: FallbackSection,
    #[serde(default)]
    messages: MessagesSection,
}

#[derive(Debug, Deserialize)]
struct IntentsSection {
    #[serde(default = "default_sensitive")]
    sensitive: String,
    #[serde(default = "default_benign_override")]
    benign_override: String,
    #[serde(default = "default_unknown")]
    unknown: String,
}

impl Default for IntentsSection {
    fn default() -> Self {
        Self {
            sensitive: default_sensitive(),
            benign_override: default_benign_override(),
            unknown: default_unknown(),
        }
    }
}

fn default_sensitive() -> String {
    "SENSITIVE".to_string()
}

fn default_benign_override() -> String {
    "RULES".to_string()
}

fn default_unknown() -> String {
    Intent::UNKNOWN.to_string()
}

#[derive(Debug, Deserialize)]
struct AnchorEntry {
    intent: String,
    #[serde(default)]
    phrases: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FallbackSection {
    #[serde(default)]
    responses: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesSection {
    generation_failure: Option<String>,
    local_failure: Option<String>,
    reference_unavailable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptsFile {
    classifier: ClassifierSection,
    #[serde(default)]
    personas: BTreeMap<String, PersonaSection>,
    #[serde(default)]
    rag: BTreeMap<String, RagSection>,
}

#[derive(Debug, Default, Deserialize)]
struct OptionsPatch {
    temperature: Option<f32>,
    num_ctx: Option<u32>,
    num_predict: Option<u32>,
}

impl OptionsPatch {
    fn resolve(self, defaults: GenerationOptions, json: bool) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            num_ctx: self.num_ctx.or(defaults.num_ctx),
            num_predict: self.num_predict.or(defaults.num_predict),
            json,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifierSection {
    system_prompt: String,
    #[serde(flatten)]
    options: OptionsPatch,
}

#[derive(Debug, Deserialize)]
struct PersonaSection {
    system_prompt: String,
    #[serde(flatten)]
    options: OptionsPatch,
}

#[derive(Debug, Deserialize)]
struct RagSection {
    template: String,
    #[serde(flatten)]
    options: OptionsPatch,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::{CatalogError, DispatchRule, RoutingCatalog};
    use crate::domain::intent::Intent;

    pub(crate) const ROUTING: &str = r#"
[intents]
sensitive = "SENSITIVE"
benign_override = "RULES"

[[anchors]]
intent = "STORE_WIFI"
phrases = ["wifi密碼", "網路密碼"]

[[anchors]]
intent = "RULES"
phrases = ["規則怎麼玩"]

[[anchors]]
intent = "STORE_WIFI"
phrases = ["wifi密碼", "無線網路"]

[static_responses]
STORE_WIFI = ["WiFi 名稱 BoardGame_Guest，密碼 playmoregames。"]
STORE_FEE = ["平日每人 150 元可玩 4 小時。"]

[handlers.SENSITIVE]
kind = "reject"
response = "這個問題我不方便回答喔。"

[handlers.RULES]
kind = "cloud_rag"
template = "rules"

[handlers.CHITCHAT]
kind = "local_llm"
persona = "chitchat"

[fallback]
responses = ["不好意思，可以換個方式問嗎？"]
"#;

    pub(crate) const PROMPTS: &str = r#"
[classifier]
system_prompt = "Classify into one of: {{ intents }}"

[personas.chitchat]
system_prompt = "你是桌遊店的店員。"

[rag.rules]
template = "{{ activity }}\n{{ reference }}\n{{ history }}"
temperature = 0.4
"#;

    pub(crate) const ACTIVITIES: &str = r#"
default = "avalon"

[[activity]]
id = "avalon"
display_name = "阿瓦隆"
allowlist = ["阿瓦隆", "刺客"]
"#;

    pub(crate) fn write_catalog(dir: &Path, routing: &str, prompts: &str, activities: &str) {
        fs::write(dir.join(super::ROUTING_FILE), routing).expect("write routing");
        fs::write(dir.join(super::PROMPTS_FILE), prompts).expect("write prompts");
        fs::write(dir.join(super::ACTIVITIES_FILE), activities).expect("write activities");
    }

    fn load(routing: &str, prompts: &str) -> Result<RoutingCatalog, CatalogError> {
        let dir = TempDir::new().expect("tempdir");
        write_catalog(dir.path(), routing, prompts, ACTIVITIES);
        RoutingCatalog::load(dir.path())
    }

    #[test]
    fn duplicate_anchor_blocks_merge_in_declaration_order() {
        let catalog = load(ROUTING, PROMPTS).expect("catalog should load");
        let anchors = catalog.anchors();

        assert_eq!(anchors.len(), 2);
        assert!(anchors[0].intent.is("STORE_WIFI"));
        assert_eq!(anchors[0].phrases, vec!["wifi密碼", "網路密碼", "無線網路"]);
        assert!(anchors[1].intent.is("RULES"));
    }

    #[test]
    fn resolve_prefers_static_then_handlers_then_fallback() {
        let catalog = load(ROUTING, PROMPTS).expect("catalog should load");

        assert!(matches!(catalog.resolve(&"STORE_FEE".into()), DispatchRule::Static(_)));
        assert!(matches!(catalog.resolve(&"SENSITIVE".into()), DispatchRule::Reject(_)));
        assert!(matches!(catalog.resolve(&"CHITCHAT".into()), DispatchRule::LocalLlm(_)));
        assert!(matches!(catalog.resolve(&"UNKNOWN".into()), DispatchRule::Fallback(_)));
        assert!(matches!(catalog.resolve(&"NOT_DECLARED".into()), DispatchRule::Fallback(_)));

        match catalog.resolve(&"RULES".into()) {
            DispatchRule::CloudRag { template, topic_intent, options } => {
                assert_eq!(template, "rules");
                assert!(topic_intent.is("RULES"));
                assert_eq!(options.temperature, 0.4);
            }
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn cloud_rag_topic_defaults_to_the_caller_intent() {
        let catalog = load(ROUTING, PROMPTS).expect("catalog should load");
        let requested = Intent::new(String::from("RULES"));

        let topic = match catalog.resolve(&requested) {
            DispatchRule::CloudRag { topic_intent, .. } => topic_intent.clone(),
            other => panic!("unexpected rule {other:?}"),
        };
        assert_eq!(topic, requested);
    }

    #[test]
    fn anchor_without_route_is_a_configuration_error() {
        let routing = ROUTING.replace("intent = \"RULES\"\nphrases", "intent = \"GHOST\"\nphrases");
        let error = load(&routing, PROMPTS).expect_err("catalog should be rejected");
        assert!(matches!(error, CatalogError::Validation(ref m) if m.contains("GHOST")));
    }

    #[test]
    fn unknown_persona_is_a_configuration_error() {
        let prompts = PROMPTS.replace("[personas.chitchat]", "[personas.other]");
        let error = load(ROUTING, &prompts).expect_err("catalog should be rejected");
        assert!(matches!(error, CatalogError::Validation(ref m) if m.contains("chitchat")));
    }

    #[test]
    fn broken_template_is_reported_by_name() {
        let prompts = PROMPTS.replace("{{ activity }}", "{{ activity ");
        let error = load(ROUTING, &prompts).expect_err("catalog should be rejected");
        assert!(matches!(error, CatalogError::Template { ref name, .. } if name == "rag/rules"));
    }

    #[test]
    fn known_intents_are_canonicalised_case_insensitively() {
        let catalog = load(ROUTING, PROMPTS).expect("catalog should load");

        assert_eq!(catalog.canonical_intent(" store_fee ").map(|i| i.as_str()), Some("STORE_FEE"));
        assert!(catalog.canonical_intent("MADE_UP").is_none());
        assert_eq!(catalog.known_intents().last().map(|i| i.as_str()), Some("UNKNOWN"));
        assert_eq!(catalog.summary().anchor_phrases, 4);
    }
}
