use akka_core::catalog::RoutingCatalog;
use akka_core::domain::intent::Intent;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Keep,
    Override { intent: Intent, keyword: String },
}

/// Safety filter: a sensitive verdict on an utterance that mentions any
/// allowlisted activity term is routed to the benign rules intent instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    sensitive: Intent,
    benign_override: Intent,
    allowlist: Vec<String>,
}

impl GuardrailPolicy {
    pub fn new(sensitive: Intent, benign_override: Intent, allowlist: Vec<String>) -> Self {
        Self { sensitive, benign_override, allowlist }
    }

    pub fn from_catalog(catalog: &RoutingCatalog) -> Self {
        let roles = catalog.roles();
        Self::new(
            roles.sensitive.clone(),
            roles.benign_override.clone(),
            catalog.library().allowlist(),
        )
    }

    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    /// Raw substring matching; short keywords can over-match.
    pub fn evaluate(&self, intent: &Intent, query: &str) -> GuardrailDecision {
        if intent != &self.sensitive {
            return GuardrailDecision::Keep;
        }

        match self.allowlist.iter().find(|keyword| query.contains(keyword.as_str())) {
            Some(keyword) => GuardrailDecision::Override {
                intent: self.benign_override.clone(),
                keyword: keyword.clone(),
            },
            None => GuardrailDecision::Keep,
        }
    }
}
