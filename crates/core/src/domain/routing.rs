use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ActivityContext, ConversationTurn};
use crate::domain::intent::Intent;

/// Telemetry tag attached to a result when a generation backend failed.
pub const GENERATION_ERROR_TAG: &str = "GENERATION_ERROR";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Fastpath,
    LlmRouter,
    Fallback,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fastpath => "fastpath",
            Self::LlmRouter => "llm_router",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterResult {
    pub intent: Intent,
    pub confidence: f32,
    pub source: RouteSource,
}

impl RouterResult {
    pub fn new(intent: Intent, confidence: f32, source: RouteSource) -> Self {
        Self { intent, confidence: confidence.clamp(0.0, 1.0), source }
    }

    /// Zero-confidence verdict for the catalog's unknown intent.
    pub fn fallback(unknown: Intent) -> Self {
        Self { intent: unknown, confidence: 0.0, source: RouteSource::Fallback }
    }
}

/// Handler a logic intent is bound to in the dispatch table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerRule {
    Reject {
        response: String,
    },
    LocalLlm {
        persona: String,
    },
    CloudRag {
        template: String,
        #[serde(default)]
        topic_intent: Option<Intent>,
    },
}

impl HandlerRule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reject { .. } => "reject",
            Self::LocalLlm { .. } => "local_llm",
            Self::CloudRag { .. } => "cloud_rag",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    ContentStatic,
    Reject,
    LocalLlmGen,
    CloudGen,
    Fallback,
    Error,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentStatic => "content_static",
            Self::Reject => "reject",
            Self::LocalLlmGen => "local_llm_gen",
            Self::CloudGen => "cloud_gen",
            Self::Fallback => "fallback",
            Self::Error => "error",
        }
    }

    /// Source label reported to the caller; fastpath hits are prefixed.
    pub fn label(&self, via_fastpath: bool) -> String {
        if via_fastpath {
            format!("fastpath_{}", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOutcome {
    pub response: String,
    pub source: ResponseSource,
    pub intent_override: Option<Intent>,
}

impl DispatchOutcome {
    pub fn new(response: impl Into<String>, source: ResponseSource) -> Self {
        Self { response: response.into(), source, intent_override: None }
    }

    pub fn generation_failure(apology: impl Into<String>) -> Self {
        Self {
            response: apology.into(),
            source: ResponseSource::Error,
            intent_override: Some(Intent::from(GENERATION_ERROR_TAG)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub activity_context: ActivityContext,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub response: String,
    pub intent: Intent,
    pub confidence: f32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_override: Option<Intent>,
}
