pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use akka_core::config::{ConfigOverrides, LoadOptions};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "akka",
    about = "Akka front-of-house routing CLI",
    long_about = "Route single questions through the pipeline, validate the routing catalog, inspect configuration, and check backend readiness.",
    after_help = "Examples:\n  akka ask \"wifi密碼多少\"\n  akka ask \"刺客可以殺誰\" --activity avalon --history turns.json\n  akka validate --json\n  akka doctor --json"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Path to akka.toml (defaults to ./akka.toml or ./config/akka.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the routing catalog directory")]
    catalog: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Route one query through the pipeline and print the result as JSON")]
    Ask {
        query: String,
        #[arg(long, help = "Activity id or alias used for rule lookups")]
        activity: Option<String>,
        #[arg(long, help = "JSON file holding prior conversation turns")]
        history: Option<PathBuf>,
    },
    #[command(about = "Validate the routing catalog and report anchor statistics")]
    Validate {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration with source attribution and redaction")]
    Config,
    #[command(about = "Check config, catalog, and backend reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                catalog_dir: self.catalog.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Ask { query, activity, history } => {
            commands::ask::run(options, &query, activity.as_deref(), history.as_deref())
        }
        Command::Validate { json } => commands::validate::run(options, json),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
