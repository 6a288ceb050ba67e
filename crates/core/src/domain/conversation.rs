use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One prior exchange supplied by the caller. Assistant turns carry the
/// intent a previous pipeline invocation reported for them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), intent: None }
    }

    pub fn assistant(content: impl Into<String>, intent: Option<Intent>) -> Self {
        Self { role: Role::Assistant, content: content.into(), intent }
    }

    pub fn is_tagged(&self, intent: &Intent) -> bool {
        self.intent.as_ref() == Some(intent)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ActivityContext {
    pub fn for_activity(activity_id: impl Into<String>) -> Self {
        Self { activity_id: Some(activity_id.into()), extra: BTreeMap::new() }
    }

    pub fn activity_id(&self) -> Option<&str> {
        self.activity_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}
