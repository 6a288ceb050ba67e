use std::time::Duration;

use akka_core::errors::BackendError;
use akka_core::prompt::GenerationOptions;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError>;

    async fn generate_json(
        &self,
        system_prompt: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Value, BackendError> {
        let options = GenerationOptions { json: true, ..options.clone() };
        let raw = self.generate(system_prompt, prompt, &options).await?;
        parse_json_reply(self.name(), &raw)
    }
}

/// Parses a JSON object out of a model reply, tolerating markdown fences.
pub fn parse_json_reply(backend: &'static str, raw: &str) -> Result<Value, BackendError> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str::<Value>(unfenced)
        .map_err(|error| BackendError::MalformedOutput { backend, message: error.to_string() })
}

fn http_client(backend: &'static str, timeout_secs: u64) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| BackendError::Transport { backend, message: error.to_string() })
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    backend: &'static str,
    response: reqwest::Response,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status { backend, status: status.as_u16(), body });
    }

    response
        .json::<T>()
        .await
        .map_err(|error| BackendError::MalformedOutput { backend, message: error.to_string() })
}

fn transport(backend: &'static str) -> impl Fn(reqwest::Error) -> BackendError {
    move |error| BackendError::Transport { backend, message: error.to_string() }
}

/// Local generative backend speaking the Ollama chat API.
#[derive(Clone, Debug)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    const BACKEND: &'static str = "ollama";

    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            http: http_client(Self::BACKEND, timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaReplyMessage,
}

#[derive(Deserialize)]
struct OllamaReplyMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &'static str {
        Self::BACKEND
    }

    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage { role: "system", content: system_prompt });
        }
        messages.push(ChatMessage { role: "user", content: prompt });

        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: options.json.then_some("json"),
            options: OllamaOptions {
                temperature: options.temperature,
                num_ctx: options.num_ctx,
                num_predict: options.num_predict,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(transport(Self::BACKEND))?;

        let reply: OllamaChatResponse = read_json(Self::BACKEND, response).await?;
        Ok(reply.message.content.trim().to_string())
    }
}

/// Cloud generative backend speaking the Gemini `generateContent` API.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl GeminiClient {
    const BACKEND: &'static str = "gemini";

    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            http: http_client(Self::BACKEND, timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn name(&self) -> &'static str {
        Self::BACKEND
    }

    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let request = GeminiRequest {
            system_instruction: (!system_prompt.is_empty()).then(|| GeminiContent {
                role: None,
                parts: vec![GeminiRequestPart { text: system_prompt }],
            }),
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiRequestPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.num_predict,
                response_mime_type: options.json.then_some("application/json"),
            },
        };

        let response = self
            .http
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(transport(Self::BACKEND))?;

        let reply: GeminiResponse = read_json(Self::BACKEND, response).await?;
        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().map(|part| part.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BackendError::MalformedOutput {
                backend: Self::BACKEND,
                message: "response contained no candidate text".to_string(),
            });
        }

        Ok(text.trim().to_string())
    }
}
