pub mod anchors;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod prompt;
pub mod reference;

pub use anchors::{cosine_similarity, AnchorGroup, AnchorIndex, IntentScore};
pub use catalog::{CatalogError, CatalogSummary, DispatchRule, RoutingCatalog};
pub use config::{AppConfig, ConfigError, LoadOptions, RoutingSettings};
pub use domain::conversation::{ActivityContext, ConversationTurn, Role};
pub use domain::intent::Intent;
pub use domain::routing::{
    DispatchOutcome, HandlerRule, PipelineRequest, PipelineResult, ResponseSource, RouteSource,
    RouterResult,
};
pub use errors::{ApplicationError, BackendError, EmbeddingError, InterfaceError};
pub use prompt::{ClassifierPrompt, GenerationOptions, PromptRenderer};
pub use reference::{Activity, ReferenceLibrary, ReferenceProvider};
