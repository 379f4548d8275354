//! Command-line interface.
//!
//! `serve` (the default) runs the stdio MCP server. The other commands are
//! one-shot operator tools: run a query, list sources, or validate the
//! configuration document.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::client::SourceClient;
use crate::dispatch::Payload;
use crate::registry::{load_file, RoutingStrategy, SecretProvider};
use crate::routing::Query;

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "source-router", version, about = "Route queries to external information sources")]
pub struct Cli {
    /// Configuration document path (overrides SOURCES_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the MCP server over stdio
    Serve,

    /// Run one query and print the result
    Query {
        /// Query text
        text: String,

        /// Query these sources instead of routing (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Routing strategy: auto, manual or multi
        #[arg(long)]
        strategy: Option<RoutingStrategy>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured sources and load warnings
    Sources,

    /// Validate the configuration document and exit
    Check,
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute the query command.
pub async fn execute_query(
    client: &SourceClient,
    text: String,
    sources: Vec<String>,
    strategy: Option<RoutingStrategy>,
    json: bool,
) -> CliResult {
    let mut query = Query::new(text).with_sources(sources);
    query.requested_strategy = strategy;

    let outcome = match client.search(&query).await {
        Ok(outcome) => outcome,
        Err(e) => return CliResult::error(format!("Query failed: {}", e)),
    };

    if json {
        return match serde_json::to_string_pretty(&outcome) {
            Ok(text) => CliResult::success(text),
            Err(e) => CliResult::error(format!("Failed to serialize outcome: {}", e)),
        };
    }

    let mut output = match &outcome.payload {
        Payload::Single { source, text } => format!("[{}]\n{}", source, text),
        Payload::Multi { .. } => outcome.render(),
    };
    if !outcome.errors.is_empty() {
        output.push_str("\n\nFailed sources:\n");
        for failure in &outcome.errors {
            output.push_str(&format!(
                "  {} ({}): {}\n",
                failure.source, failure.kind, failure.message
            ));
        }
    }
    CliResult::success(output.trim_end().to_string())
}

/// Execute the sources command.
pub fn execute_sources(client: &SourceClient) -> CliResult {
    let mut output = String::new();

    output.push_str("\nConfigured Sources\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════════════\n\n");

    for source in client.list_sources() {
        let status = if source.enabled { "enabled " } else { "disabled" };
        output.push_str(&format!(
            "  {:<20} {:<20} {}  timeout {:.0}s",
            source.name,
            source.kind.as_str(),
            status,
            source.timeout_seconds
        ));
        if !source.capabilities.is_empty() {
            output.push_str(&format!("  [{}]", source.capabilities.join(", ")));
        }
        output.push('\n');
    }

    let hints = client.routing_hints();
    output.push_str(&format!(
        "\nDefault source: {}  Strategy: {}\n",
        hints.default_source, hints.default_strategy
    ));
    if !hints.fallback_sources.is_empty() {
        output.push_str(&format!("Fallbacks: {}\n", hints.fallback_sources.join(" → ")));
    }

    if !client.warnings().is_empty() {
        output.push_str("\nWarnings:\n");
        for warning in client.warnings() {
            output.push_str(&format!("  {}: {}\n", warning.source, warning.message));
        }
    }

    CliResult::success(output)
}

/// Execute the check command.
pub fn execute_check(path: &Path, secrets: &dyn SecretProvider) -> CliResult {
    match load_file(path, secrets) {
        Ok(loaded) => {
            let mut output = format!(
                "{}: OK ({} sources, {} enabled, {} rules)",
                path.display(),
                loaded.registry.len(),
                loaded.registry.enabled_names().len(),
                loaded.routing.rules.len()
            );
            for warning in &loaded.warnings {
                output.push_str(&format!("\n  warning: {}: {}", warning.source, warning.message));
            }
            CliResult::success(output)
        }
        Err(e) => CliResult::error(format!("{}: {}", path.display(), e)),
    }
}
