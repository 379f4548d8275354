//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers for search, sessions and routing hints
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::client::SourceClient;
use crate::config::Config;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Query and session facade.
    pub client: SourceClient,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, client: SourceClient) -> Self {
        tracing::info!(
            sources = client.list_sources().len(),
            enabled = client.list_enabled_sources().len(),
            max_concurrent_calls = config.dispatch.max_concurrent_calls,
            "AppState initialized"
        );
        Self { config, client }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::load_str;
    use crate::sources::HandlerTable;
    use std::collections::HashMap;

    fn create_test_state() -> AppState {
        let loaded = load_str(
            r#"{
                "sources": {"ddg": {"kind": "web-search", "endpoint": "https://ddg.example"}},
                "defaultSource": "ddg"
            }"#,
            &HashMap::<String, String>::new(),
        )
        .unwrap();
        let config = Config::default();
        let client = SourceClient::from_loaded(loaded, HandlerTable::empty(), &config);
        AppState::new(config, client)
    }

    #[test]
    fn test_app_state_new() {
        let state = create_test_state();
        assert_eq!(state.client.list_enabled_sources(), vec!["ddg"]);
        assert_eq!(state.config.dispatch.max_concurrent_calls, 3);
    }

    #[test]
    fn test_shared_state_type() {
        let shared: SharedState = Arc::new(create_test_state());

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
