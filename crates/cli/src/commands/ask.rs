use std::fs;
use std::path::Path;

use akka_agent::runtime::AgentRuntime;
use akka_core::config::{AppConfig, LoadOptions};
use akka_core::domain::conversation::{ActivityContext, ConversationTurn};
use akka_core::domain::routing::PipelineRequest;

use crate::commands::{async_runtime, CommandResult};

const COMMAND: &str = "ask";

pub fn run(
    options: LoadOptions,
    query: &str,
    activity: Option<&str>,
    history_path: Option<&Path>,
) -> CommandResult {
    if query.trim().is_empty() {
        return CommandResult::failure(COMMAND, "bad_request", "query must not be empty", 2);
    }

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };

    let history = match history_path.map(read_history).transpose() {
        Ok(history) => history.unwrap_or_default(),
        Err(message) => return CommandResult::failure(COMMAND, "invalid_history", message, 2),
    };

    let request = PipelineRequest {
        query: query.to_string(),
        history,
        activity_context: activity.map(ActivityContext::for_activity).unwrap_or_default(),
    };

    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                1,
            )
        }
    };

    let outcome = runtime.block_on(async {
        let agent = AgentRuntime::from_config(&config).await?;
        Ok::<_, akka_core::errors::ApplicationError>(agent.handle(&request).await)
    });

    match outcome {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
        },
        Err(error) => CommandResult::failure(COMMAND, "startup", error.to_string(), 3),
    }
}

fn read_history(path: &Path) -> Result<Vec<ConversationTurn>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read history file `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("history file `{}` is not a turn list: {error}", path.display()))
}
