use std::time::Duration;

use akka_core::catalog::RoutingCatalog;
use akka_core::config::{AppConfig, EmbeddingProvider, LoadOptions};
use serde::Serialize;

use crate::commands::{async_runtime, CommandResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_catalog(&config));
            checks.extend(check_backends(&config));
            checks.push(check_cloud_key(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            let dependent = [
                "catalog_validation",
                "local_llm_reachability",
                "embedding_backend",
                "cloud_llm_key",
            ];
            for name in dependent {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_catalog(config: &AppConfig) -> DoctorCheck {
    match RoutingCatalog::load(&config.catalog.dir) {
        Ok(catalog) => {
            let summary = catalog.summary();
            DoctorCheck {
                name: "catalog_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "{} intents and {} anchor phrases loaded from `{}`",
                    summary.intents,
                    summary.anchor_phrases,
                    config.catalog.dir.display()
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "catalog_validation",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_backends(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck {
                    name: "local_llm_reachability",
                    status: CheckStatus::Fail,
                    details: details.clone(),
                },
                DoctorCheck { name: "embedding_backend", status: CheckStatus::Fail, details },
            ];
        }
    };

    runtime.block_on(async {
        let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
            Ok(client) => client,
            Err(error) => {
                let details = format!("failed to build http client: {error}");
                return vec![
                    DoctorCheck {
                        name: "local_llm_reachability",
                        status: CheckStatus::Fail,
                        details: details.clone(),
                    },
                    DoctorCheck { name: "embedding_backend", status: CheckStatus::Fail, details },
                ];
            }
        };

        let local = probe_ollama(
            &client,
            "local_llm_reachability",
            &config.local_llm.base_url,
            &config.local_llm.model,
        )
        .await;
        let embedding = match config.embedding.provider {
            EmbeddingProvider::Disabled => DoctorCheck::skipped(
                "embedding_backend",
                "embeddings disabled; every query goes to the classifier",
            ),
            EmbeddingProvider::Fastembed => DoctorCheck::skipped(
                "embedding_backend",
                format!("in-process model `{}` is loaded at startup", config.embedding.model),
            ),
            EmbeddingProvider::Ollama => {
                probe_ollama(
                    &client,
                    "embedding_backend",
                    &config.embedding.base_url,
                    &config.embedding.model,
                )
                .await
            }
        };

        vec![local, embedding]
    })
}

/// Lists the models an Ollama server has pulled and checks the configured one is among them.
async fn probe_ollama(
    client: &reqwest::Client,
    name: &'static str,
    base_url: &str,
    model: &str,
) -> DoctorCheck {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let fail = |details: String| DoctorCheck { name, status: CheckStatus::Fail, details };

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(error) => return fail(format!("could not reach `{url}`: {error}")),
    };
    if !response.status().is_success() {
        return fail(format!("`{url}` answered with status {}", response.status()));
    }

    let tags = match response.json::<serde_json::Value>().await {
        Ok(tags) => tags,
        Err(error) => return fail(format!("`{url}` returned an unreadable model list: {error}")),
    };
    let pulled = tags["models"]
        .as_array()
        .map(|models| {
            models.iter().any(|entry| {
                entry["name"].as_str().is_some_and(|candidate| {
                    candidate == model || candidate.strip_suffix(":latest") == Some(model)
                })
            })
        })
        .unwrap_or(false);

    if pulled {
        DoctorCheck {
            name,
            status: CheckStatus::Pass,
            details: format!("model `{model}` available at `{base_url}`"),
        }
    } else {
        fail(format!("`{base_url}` is reachable but model `{model}` has not been pulled"))
    }
}

fn check_cloud_key(config: &AppConfig) -> DoctorCheck {
    if config.cloud_llm.is_enabled() {
        DoctorCheck {
            name: "cloud_llm_key",
            status: CheckStatus::Pass,
            details: format!("cloud model `{}` configured", config.cloud_llm.model),
        }
    } else {
        DoctorCheck::skipped(
            "cloud_llm_key",
            "no cloud api key; rules questions will receive the generation-failure apology",
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
