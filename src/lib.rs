//! # Source Router
//!
//! Routes natural-language queries to a configured set of external information
//! sources and returns their textual answers. Exposed to agents as a Model
//! Context Protocol (MCP) server over stdio, and to operators as a small CLI.
//!
//! ## Features
//!
//! - **Declarative registry**: sources, routing rules and fallbacks come from one
//!   JSON document, with `${VAR}` credential placeholders resolved at load time
//! - **Routing strategies**: `auto` (first matching topic rule), `manual`
//!   (default source only) and `multi` (fan out to every relevant source)
//! - **Bounded dispatch**: a global concurrency budget, a per-source timeout
//!   and an ordered fallback chain for single-source queries
//! - **Partial results**: multi-source queries return whatever succeeded plus a
//!   per-source failure list
//! - **Sessions**: capped conversation history with idle expiry
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → McpServer → SourceClient → Router → Dispatcher → SourceHandler (HTTP)
//!                              ↓
//!                       SessionRegistry (memory)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::path::Path;
//! use source_router::{Config, Query, SourceClient};
//! use source_router::registry::{load_file, EnvSecrets};
//! use source_router::sources::{HandlerTable, HttpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let loaded = load_file(Path::new("sources.json"), &EnvSecrets)?;
//!     let handlers = HandlerTable::standard(HttpTransport::new(&config.request)?);
//!     let client = SourceClient::from_loaded(loaded, handlers, &config);
//!     let outcome = client.search(&Query::new("latest rust release")).await?;
//!     println!("{}", outcome.render());
//!     Ok(())
//! }
//! ```

/// Command-line entry points.
pub mod cli;
/// Query and session facade used by the server and CLI.
pub mod client;
/// Process configuration from environment variables.
pub mod config;
/// Concurrent execution of resolved queries.
pub mod dispatch;
/// Error types and result aliases for the application.
pub mod error;
/// Source definitions, routing rules and configuration loading.
pub mod registry;
/// Query to source-list resolution.
pub mod routing;
/// MCP server implementation and request handling.
pub mod server;
/// In-memory conversation sessions.
pub mod sessions;
/// Per-kind source handlers.
pub mod sources;

pub use client::SourceClient;
pub use config::Config;
pub use dispatch::QueryOutcome;
pub use error::{AppError, AppResult};
pub use routing::Query;
pub use server::{AppState, McpServer, SharedState};
