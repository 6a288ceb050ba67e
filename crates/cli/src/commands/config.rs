use std::env;
use std::fs;
use std::path::Path;

use akka_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run(options: LoadOptions) -> String {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let catalog_overridden = options.overrides.catalog_dir.is_some();

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", &["AKKA_SERVER_BIND_ADDRESS"]),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", &["AKKA_SERVER_PORT"]),
    ));
    lines.push(render_line(
        "server.admin_token",
        &redact_secret(config.server.admin_token.as_ref()),
        source("server.admin_token", &["AKKA_SERVER_ADMIN_TOKEN"]),
    ));

    lines.push(render_line(
        "local_llm.base_url",
        &config.local_llm.base_url,
        source("local_llm.base_url", &["AKKA_LOCAL_LLM_BASE_URL"]),
    ));
    lines.push(render_line(
        "local_llm.model",
        &config.local_llm.model,
        source("local_llm.model", &["AKKA_LOCAL_LLM_MODEL"]),
    ));
    lines.push(render_line(
        "local_llm.timeout_secs",
        &config.local_llm.timeout_secs.to_string(),
        source("local_llm.timeout_secs", &["AKKA_LOCAL_LLM_TIMEOUT_SECS"]),
    ));

    lines.push(render_line(
        "cloud_llm.api_key",
        &redact_secret(config.cloud_llm.api_key.as_ref()),
        source("cloud_llm.api_key", &["AKKA_CLOUD_LLM_API_KEY", "GEMINI_API_KEY"]),
    ));
    lines.push(render_line(
        "cloud_llm.base_url",
        &config.cloud_llm.base_url,
        source("cloud_llm.base_url", &["AKKA_CLOUD_LLM_BASE_URL"]),
    ));
    lines.push(render_line(
        "cloud_llm.model",
        &config.cloud_llm.model,
        source("cloud_llm.model", &["AKKA_CLOUD_LLM_MODEL"]),
    ));

    lines.push(render_line(
        "embedding.provider",
        &format!("{:?}", config.embedding.provider),
        source("embedding.provider", &["AKKA_EMBEDDING_PROVIDER"]),
    ));
    lines.push(render_line(
        "embedding.base_url",
        &config.embedding.base_url,
        source("embedding.base_url", &["AKKA_EMBEDDING_BASE_URL"]),
    ));
    lines.push(render_line(
        "embedding.model",
        &config.embedding.model,
        source("embedding.model", &["AKKA_EMBEDDING_MODEL"]),
    ));
    lines.push(render_line(
        "embedding.query_prefix",
        &format!("{:?}", config.embedding.query_prefix),
        source("embedding.query_prefix", &[]),
    ));
    lines.push(render_line(
        "embedding.workers",
        &config.embedding.workers.to_string(),
        source("embedding.workers", &["AKKA_EMBEDDING_WORKERS"]),
    ));

    lines.push(render_line(
        "routing.similarity_threshold",
        &config.routing.similarity_threshold.to_string(),
        source("routing.similarity_threshold", &["AKKA_ROUTING_SIMILARITY_THRESHOLD"]),
    ));
    lines.push(render_line(
        "routing.top_k",
        &config.routing.top_k.to_string(),
        source("routing.top_k", &["AKKA_ROUTING_TOP_K"]),
    ));
    lines.push(render_line(
        "routing.context_window",
        &config.routing.context_window.to_string(),
        source("routing.context_window", &[]),
    ));
    lines.push(render_line(
        "routing.context_max_length",
        &config.routing.context_max_length.to_string(),
        source("routing.context_max_length", &[]),
    ));
    lines.push(render_line(
        "routing.keyword_limit",
        &config.routing.keyword_limit.to_string(),
        source("routing.keyword_limit", &[]),
    ));
    lines.push(render_line(
        "routing.rag_history_limit",
        &config.routing.rag_history_limit.to_string(),
        source("routing.rag_history_limit", &[]),
    ));

    let catalog_source = if catalog_overridden {
        "override (--catalog)".to_string()
    } else {
        source("catalog.dir", &["AKKA_CATALOG_DIR"])
    };
    let catalog_dir = config.catalog.dir.display().to_string();
    lines.push(render_line("catalog.dir", &catalog_dir, catalog_source));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["AKKA_LOGGING_LEVEL", "AKKA_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", &["AKKA_LOGGING_FORMAT", "AKKA_LOG_FORMAT"]),
    ));

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().len()) {
        None => "<unset>".to_string(),
        Some(0) => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::redact_secret;

    #[test]
    fn secrets_never_render_their_value() {
        let secret = SecretString::from("gem-secret-value".to_string());
        assert_eq!(redact_secret(Some(&secret)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&SecretString::from(" ".to_string()))), "<empty>");
    }
}
