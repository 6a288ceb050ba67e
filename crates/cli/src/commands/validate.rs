use akka_core::catalog::{CatalogSummary, RoutingCatalog};
use akka_core::config::{AppConfig, LoadOptions};
use akka_core::domain::intent::Intent;
use serde::Serialize;

use crate::commands::CommandResult;

const COMMAND: &str = "validate";

#[derive(Debug, Serialize)]
struct AnchorStat {
    intent: Intent,
    phrases: usize,
}

#[derive(Debug, Serialize)]
struct RouteStat {
    intent: Intent,
    handler: &'static str,
}

#[derive(Debug, Serialize)]
struct ValidateReport {
    command: &'static str,
    status: &'static str,
    catalog_dir: String,
    summary: CatalogSummary,
    anchors: Vec<AnchorStat>,
    routes: Vec<RouteStat>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };

    let catalog = match RoutingCatalog::load(&config.catalog.dir) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure(COMMAND, "catalog_validation", error.to_string(), 3)
        }
    };

    let report = ValidateReport {
        command: COMMAND,
        status: "ok",
        catalog_dir: config.catalog.dir.display().to_string(),
        summary: catalog.summary(),
        anchors: catalog
            .anchors()
            .iter()
            .map(|group| AnchorStat { intent: group.intent.clone(), phrases: group.phrases.len() })
            .collect(),
        routes: catalog
            .known_intents()
            .iter()
            .map(|intent| RouteStat {
                intent: intent.clone(),
                handler: catalog.resolve(intent).kind(),
            })
            .collect(),
    };

    if json_output {
        return match serde_json::to_string_pretty(&report) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
        };
    }

    CommandResult { exit_code: 0, output: render_human(&report) }
}

fn render_human(report: &ValidateReport) -> String {
    let summary = &report.summary;
    let mut lines = vec![
        format!("catalog `{}` is valid", report.catalog_dir),
        format!(
            "- {} intents, {} static, {} handlers, {} activities",
            summary.intents, summary.static_intents, summary.handlers, summary.activities
        ),
        format!(
            "- {} anchor phrases across {} intents",
            summary.anchor_phrases, summary.anchor_intents
        ),
    ];

    for anchor in &report.anchors {
        lines.push(format!("  - {}: {} phrases", anchor.intent, anchor.phrases));
    }
    lines.push("routes:".to_string());
    for route in &report.routes {
        lines.push(format!("  - {} -> {}", route.intent, route.handler));
    }

    lines.join("\n")
}
