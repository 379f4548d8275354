use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use source_router::{
    cli::{execute_check, execute_query, execute_sources, Cli, CliResult, Commands},
    client::SourceClient,
    config::{Config, LogFormat},
    registry::{load_file, EnvSecrets},
    server::{AppState, McpServer},
    sources::{HandlerTable, HttpTransport},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.config {
        config.sources_path = Some(path);
    }

    // Initialize logging
    init_logging(&config);

    let sources_path = match config.resolve_sources_path() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "No source configuration document");
            return Err(e.into());
        }
    };

    let command = cli.command.unwrap_or(Commands::Serve);
    if command == Commands::Check {
        finish(execute_check(&sources_path, &EnvSecrets));
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %sources_path.display(),
        "Source router starting..."
    );

    let loaded = match load_file(&sources_path, &EnvSecrets) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to load source configuration");
            return Err(e.into());
        }
    };
    for warning in &loaded.warnings {
        warn!(source = %warning.source, "{}", warning.message);
    }

    let transport = match HttpTransport::new(&config.request) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "Failed to initialize HTTP transport");
            return Err(e.into());
        }
    };

    let client = SourceClient::from_loaded(loaded, HandlerTable::standard(transport), &config);
    info!(
        enabled = ?client.list_enabled_sources(),
        "Source registry loaded"
    );

    match command {
        Commands::Query {
            text,
            sources,
            strategy,
            json,
        } => finish(execute_query(&client, text, sources, strategy, json).await),
        Commands::Sources => finish(execute_sources(&client)),
        Commands::Check | Commands::Serve => {}
    }

    let sessions = Arc::clone(client.sessions());
    let reaper = sessions.spawn_reaper();

    // Create application state
    let state = Arc::new(AppState::new(config, client));

    // Start MCP server
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    let result = server.run().await;

    sessions.shutdown().await;
    reaper.join().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Print a one-shot command's output and exit with its code.
fn finish(result: CliResult) -> ! {
    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code);
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
