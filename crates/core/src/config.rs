use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub local_llm: LocalLlmConfig,
    pub cloud_llm: CloudLlmConfig,
    pub embedding: EmbeddingConfig,
    pub routing: RoutingSettings,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub admin_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LocalLlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CloudLlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl CloudLlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_ref().map(|key| !key.expose_secret().trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub query_prefix: String,
    pub workers: usize,
    pub timeout_secs: u64,
}

/// Tunables of the routing pipeline that are not catalog data.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingSettings {
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub context_window: usize,
    pub context_max_length: usize,
    pub keyword_limit: usize,
    pub rag_history_limit: usize,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            top_k: 3,
            context_window: 3,
            context_max_length: 80,
            keyword_limit: 20,
            rag_history_limit: 6,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Ollama,
    Fastembed,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub catalog_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub local_llm_base_url: Option<String>,
    pub local_llm_model: Option<String>,
    pub cloud_llm_api_key: Option<String>,
    pub embedding_provider: Option<EmbeddingProvider>,
    pub similarity_threshold: Option<f32>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                admin_token: None,
            },
            local_llm: LocalLlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "qwen3:4b-instruct".to_string(),
                timeout_secs: 30,
            },
            cloud_llm: CloudLlmConfig {
                api_key: None,
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.5-flash".to_string(),
                timeout_secs: 60,
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Ollama,
                base_url: "http://localhost:11434".to_string(),
                model: "jeffh/intfloat-multilingual-e5-small:f16".to_string(),
                query_prefix: "query: ".to_string(),
                workers: 2,
                timeout_secs: 15,
            },
            routing: RoutingSettings::default(),
            catalog: CatalogConfig { dir: PathBuf::from("config/catalog") },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "fastembed" => Ok(Self::Fastembed),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported embedding provider `{other}` (expected ollama|fastembed|disabled)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("akka.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(admin_token_value) = server.admin_token {
                self.server.admin_token = Some(secret_value(admin_token_value));
            }
        }

        if let Some(local_llm) = patch.local_llm {
            if let Some(base_url) = local_llm.base_url {
                self.local_llm.base_url = base_url;
            }
            if let Some(model) = local_llm.model {
                self.local_llm.model = model;
            }
            if let Some(timeout_secs) = local_llm.timeout_secs {
                self.local_llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(cloud_llm) = patch.cloud_llm {
            if let Some(api_key_value) = cloud_llm.api_key {
                self.cloud_llm.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = cloud_llm.base_url {
                self.cloud_llm.base_url = base_url;
            }
            if let Some(model) = cloud_llm.model {
                self.cloud_llm.model = model;
            }
            if let Some(timeout_secs) = cloud_llm.timeout_secs {
                self.cloud_llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(embedding) = patch.embedding {
            if let Some(provider) = embedding.provider {
                self.embedding.provider = provider;
            }
            if let Some(base_url) = embedding.base_url {
                self.embedding.base_url = base_url;
            }
            if let Some(model) = embedding.model {
                self.embedding.model = model;
            }
            if let Some(query_prefix) = embedding.query_prefix {
                self.embedding.query_prefix = query_prefix;
            }
            if let Some(workers) = embedding.workers {
                self.embedding.workers = workers;
            }
            if let Some(timeout_secs) = embedding.timeout_secs {
                self.embedding.timeout_secs = timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(similarity_threshold) = routing.similarity_threshold {
                self.routing.similarity_threshold = similarity_threshold;
            }
            if let Some(top_k) = routing.top_k {
                self.routing.top_k = top_k;
            }
            if let Some(context_window) = routing.context_window {
                self.routing.context_window = context_window;
            }
            if let Some(context_max_length) = routing.context_max_length {
                self.routing.context_max_length = context_max_length;
            }
            if let Some(keyword_limit) = routing.keyword_limit {
                self.routing.keyword_limit = keyword_limit;
            }
            if let Some(rag_history_limit) = routing.rag_history_limit {
                self.routing.rag_history_limit = rag_history_limit;
            }
        }

        if let Some(catalog) = patch.catalog {
            if let Some(dir) = catalog.dir {
                self.catalog.dir = dir;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AKKA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("AKKA_SERVER_PORT") {
            self.server.port = parse_u16("AKKA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("AKKA_SERVER_ADMIN_TOKEN") {
            self.server.admin_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("AKKA_LOCAL_LLM_BASE_URL") {
            self.local_llm.base_url = value;
        }
        if let Some(value) = read_env("AKKA_LOCAL_LLM_MODEL") {
            self.local_llm.model = value;
        }
        if let Some(value) = read_env("AKKA_LOCAL_LLM_TIMEOUT_SECS") {
            self.local_llm.timeout_secs = parse_u64("AKKA_LOCAL_LLM_TIMEOUT_SECS", &value)?;
        }

        let cloud_key = read_env("AKKA_CLOUD_LLM_API_KEY").or_else(|| read_env("GEMINI_API_KEY"));
        if let Some(value) = cloud_key {
            self.cloud_llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AKKA_CLOUD_LLM_BASE_URL") {
            self.cloud_llm.base_url = value;
        }
        if let Some(value) = read_env("AKKA_CLOUD_LLM_MODEL") {
            self.cloud_llm.model = value;
        }
        if let Some(value) = read_env("AKKA_CLOUD_LLM_TIMEOUT_SECS") {
            self.cloud_llm.timeout_secs = parse_u64("AKKA_CLOUD_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AKKA_EMBEDDING_PROVIDER") {
            self.embedding.provider = value.parse()?;
        }
        if let Some(value) = read_env("AKKA_EMBEDDING_BASE_URL") {
            self.embedding.base_url = value;
        }
        if let Some(value) = read_env("AKKA_EMBEDDING_MODEL") {
            self.embedding.model = value;
        }
        if let Some(value) = read_env("AKKA_EMBEDDING_WORKERS") {
            self.embedding.workers = parse_usize("AKKA_EMBEDDING_WORKERS", &value)?;
        }

        if let Some(value) = read_env("AKKA_ROUTING_SIMILARITY_THRESHOLD") {
            self.routing.similarity_threshold =
                parse_f32("AKKA_ROUTING_SIMILARITY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("AKKA_ROUTING_TOP_K") {
            self.routing.top_k = parse_usize("AKKA_ROUTING_TOP_K", &value)?;
        }

        if let Some(value) = read_env("AKKA_CATALOG_DIR") {
            self.catalog.dir = PathBuf::from(value);
        }

        let log_level = read_env("AKKA_LOGGING_LEVEL").or_else(|| read_env("AKKA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("AKKA_LOGGING_FORMAT").or_else(|| read_env("AKKA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(catalog_dir) = overrides.catalog_dir {
            self.catalog.dir = catalog_dir;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.local_llm_base_url {
            self.local_llm.base_url = base_url;
        }
        if let Some(model) = overrides.local_llm_model {
            self.local_llm.model = model;
        }
        if let Some(api_key) = overrides.cloud_llm_api_key {
            self.cloud_llm.api_key = Some(secret_value(api_key));
        }
        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(threshold) = overrides.similarity_threshold {
            self.routing.similarity_threshold = threshold;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_local_llm(&self.local_llm)?;
        validate_cloud_llm(&self.cloud_llm)?;
        validate_embedding(&self.embedding)?;
        validate_routing(&self.routing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("akka.toml"), PathBuf::from("config/akka.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if let Some(token) = &server.admin_token {
        if token.expose_secret().trim().len() < 8 {
            return Err(ConfigError::Validation(
                "server.admin_token must be at least 8 characters when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn validate_timeout(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > 300 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
    }
    Ok(())
}

fn validate_local_llm(local_llm: &LocalLlmConfig) -> Result<(), ConfigError> {
    validate_http_url("local_llm.base_url", &local_llm.base_url)?;
    validate_timeout("local_llm.timeout_secs", local_llm.timeout_secs)?;
    if local_llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("local_llm.model is required".to_string()));
    }
    Ok(())
}

fn validate_cloud_llm(cloud_llm: &CloudLlmConfig) -> Result<(), ConfigError> {
    validate_http_url("cloud_llm.base_url", &cloud_llm.base_url)?;
    validate_timeout("cloud_llm.timeout_secs", cloud_llm.timeout_secs)?;
    if cloud_llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("cloud_llm.model is required".to_string()));
    }
    Ok(())
}

fn validate_embedding(embedding: &EmbeddingConfig) -> Result<(), ConfigError> {
    if embedding.provider == EmbeddingProvider::Disabled {
        return Ok(());
    }

    if embedding.provider == EmbeddingProvider::Ollama {
        validate_http_url("embedding.base_url", &embedding.base_url)?;
    }
    validate_timeout("embedding.timeout_secs", embedding.timeout_secs)?;

    if embedding.model.trim().is_empty() {
        return Err(ConfigError::Validation("embedding.model is required".to_string()));
    }
    if embedding.workers == 0 || embedding.workers > 64 {
        return Err(ConfigError::Validation(
            "embedding.workers must be in range 1..=64".to_string(),
        ));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingSettings) -> Result<(), ConfigError> {
    let threshold = routing.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "routing.similarity_threshold must be in range (0, 1]".to_string(),
        ));
    }
    if routing.top_k == 0 {
        return Err(ConfigError::Validation(
            "routing.top_k must be greater than zero".to_string(),
        ));
    }
    if routing.context_window == 0 {
        return Err(ConfigError::Validation(
            "routing.context_window must be greater than zero".to_string(),
        ));
    }
    if routing.context_max_length == 0 {
        return Err(ConfigError::Validation(
            "routing.context_max_length must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    local_llm: Option<LocalLlmPatch>,
    cloud_llm: Option<CloudLlmPatch>,
    embedding: Option<EmbeddingPatch>,
    routing: Option<RoutingPatch>,
    catalog: Option<CatalogPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalLlmPatch {
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudLlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingPatch {
    provider: Option<EmbeddingProvider>,
    base_url: Option<String>,
    model: Option<String>,
    query_prefix: Option<String>,
    workers: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    similarity_threshold: Option<f32>,
    top_k: Option<usize>,
    context_window: Option<usize>,
    context_max_length: Option<usize>,
    keyword_limit: Option<usize>,
    rag_history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
