//! Agent Runtime - hybrid intent routing for the front-of-house assistant
//!
//! This crate turns one utterance into one answer:
//! - Tries the embedding fastpath against catalog anchors (`similarity`)
//! - Falls back to a local LLM classifier enriched with context (`classifier`)
//! - Applies the allowlist override to sensitive verdicts (`guardrails`)
//! - Dispatches to static text, a local persona or cloud rules answers
//!   (`dispatch`, `rules`)
//!
//! # Key Types
//!
//! - `AgentRuntime` - Orchestrator owning the reloadable routing snapshot
//! - `LlmClient` / `Embedder` - Pluggable backend traits (Ollama, Gemini, fastembed)
//! - `GuardrailPolicy` - Sensitive-intent allowlist override
//!
//! # Failure Principle
//!
//! Backend failures never reach the caller. Every request produces a
//! `PipelineResult`; failures become apologies or the unknown intent.

pub mod classifier;
pub mod conversation;
pub mod dispatch;
pub mod embedding;
pub mod guardrails;
pub mod llm;
pub mod rules;
pub mod runtime;
pub mod similarity;

#[cfg(test)]
mod testing;

pub use runtime::{AgentRuntime, Backends, RoutingSnapshot, RuntimeOptions, RuntimeStatus};
