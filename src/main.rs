//! sqlsentry CLI Entry Point
//!
//! Subcommands:
//! - `ask` - Answer a question through the guarded pipeline
//! - `check` - Run the SQL guard only
//! - `introspect` - Print the schema snapshot
//! - `init-db` - Run an initialization script against the database file
//! - `configure` - Interactive configuration
//! - `mcp` - MCP server mode (hidden)
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::{Input, Select};

use sqlsentry::config::{config_path, load_config, resolve_config, save_config, AppConfig, ConfigLocation};
use sqlsentry::engine::sqlite::seed_database;
use sqlsentry::engine::Executor;
use sqlsentry::output::{ErrorEnvelope, ErrorInfo};
use sqlsentry::pipeline::{executor_from_config, SqlitePipeline};
use sqlsentry::{SentryError, SqlDialect, SqlGuard};

/// sqlsentry - guarded natural-language queries over SQL databases
#[derive(Parser)]
#[command(name = "sqlsentry")]
#[command(about = "Ask questions about a database; only read-only SELECTs ever run")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use this config file instead of the local/global pair
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a natural-language question
    Ask {
        /// The question
        text: String,
    },

    /// Check whether a SQL statement would be allowed (never executes it)
    Check {
        /// SQL text
        sql: String,

        /// Override the configured dialect
        #[arg(long)]
        dialect: Option<SqlDialect>,
    },

    /// Print the database schema snapshot
    Introspect,

    /// Run an SQL initialization script against the configured database
    InitDb {
        /// Path to the script
        #[arg(long)]
        script: PathBuf,
    },

    /// Interactively create or update a config file
    Configure,

    /// Start MCP server (hidden from help, for AI agent integration)
    #[command(hide = true)]
    Mcp,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = sqlsentry::logging::init(cli.verbose) {
        eprintln!("Failed to initialize logging: {e:#}");
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            print_json(&failure_envelope(&e));
            1
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Configure => configure(),
        command => {
            let config = resolve_config(cli.config.as_deref())?;
            dispatch(command, &config).await
        }
    }
}

async fn dispatch(command: Commands, config: &AppConfig) -> anyhow::Result<i32> {
    match command {
        Commands::Ask { text } => {
            let pipeline = SqlitePipeline::from_config(config)?;
            let response = pipeline.handle(&text).await.into_response();
            print_json(&response.body);
            Ok(response.class.exit_code())
        }
        Commands::Check { sql, dialect } => {
            let guard = SqlGuard::new(dialect.unwrap_or(config.guard.dialect));
            let verdict = guard.validate(&sql);
            print_json(&verdict);
            Ok(if verdict.is_safe { 0 } else { 2 })
        }
        Commands::Introspect => {
            let executor = executor_from_config(config);
            let limit = Duration::from_millis(config.limits.execution_timeout_ms);
            let schema = tokio::time::timeout(limit, executor.introspect_schema())
                .await
                .unwrap_or_else(|_| Err(SentryError::timeout("Schema introspection timed out")))?;
            print_json(&schema);
            Ok(0)
        }
        Commands::InitDb { script } => {
            let sql = std::fs::read_to_string(&script)
                .with_context(|| format!("Could not read script {}", script.display()))?;
            let file = config.database.file.clone();
            tokio::task::spawn_blocking(move || seed_database(&file, &sql)).await??;
            print_json(&serde_json::json!({
                "ok": true,
                "database": config.database.file,
                "script": script,
            }));
            Ok(0)
        }
        Commands::Mcp => {
            let pipeline = SqlitePipeline::from_config(config)?;
            sqlsentry::mcp::serve(&pipeline).await?;
            Ok(0)
        }
        Commands::Configure => configure(),
    }
}

/// Prompt for settings and save them
fn configure() -> anyhow::Result<i32> {
    let locations = ["local (.sqlsentry/config.json)", "global (user config directory)"];
    let location = match Select::new()
        .with_prompt("Where should the configuration be saved?")
        .items(&locations)
        .default(0)
        .interact()?
    {
        0 => ConfigLocation::Local,
        _ => ConfigLocation::Global,
    };

    let mut config = load_config(&config_path(location)?)?;

    config.database.file = PathBuf::from(
        Input::<String>::new()
            .with_prompt("SQLite database file")
            .default(config.database.file.display().to_string())
            .interact_text()?,
    );

    let dialects: Vec<&str> = SqlDialect::ALL.iter().map(SqlDialect::as_str).collect();
    let current = SqlDialect::ALL.iter().position(|d| *d == config.guard.dialect).unwrap_or(0);
    let picked = Select::new()
        .with_prompt("SQL dialect for the guard")
        .items(&dialects)
        .default(current)
        .interact()?;
    config.guard.dialect = SqlDialect::ALL[picked];

    config.ai.endpoint = Input::<String>::new()
        .with_prompt("Chat completions endpoint")
        .default(config.ai.endpoint.clone())
        .interact_text()?;

    config.ai.model_id = Input::<String>::new()
        .with_prompt("Model id")
        .default(config.ai.model_id.clone())
        .interact_text()?;

    let key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key (blank for none)")
        .default(config.ai.api_key_env.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    config.ai.api_key_env = Some(key_env).filter(|s| !s.trim().is_empty());

    let path = save_config(&config, location)?;
    print_json(&serde_json::json!({ "ok": true, "saved_to": path }));
    Ok(0)
}

/// Envelope for command failures outside the ask flow
fn failure_envelope(e: &anyhow::Error) -> ErrorEnvelope {
    let info = match e.downcast_ref::<SentryError>() {
        Some(err) => ErrorInfo::new(err.error_code(), err.message()),
        None => ErrorInfo::new("INTERNAL_ERROR", format!("{e:#}")),
    };
    ErrorEnvelope { error: info }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Could not serialize output"),
    }
}
