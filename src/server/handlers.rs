use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::registry::RoutingStrategy;
use crate::routing::Query;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "search" => handle_search(state, arguments).await,
        "session_create" => handle_session_create(state, arguments).await,
        "session_append" => handle_session_append(state, arguments).await,
        "session_history" => handle_session_history(state, arguments).await,
        "session_end" => handle_session_end(state, arguments).await,
        "routing_hints" => handle_routing_hints(state).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Arguments of the `search` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub strategy: Option<RoutingStrategy>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SearchParams {
    pub fn into_query(self) -> Query {
        Query {
            text: self.query,
            requested_sources: self.sources,
            requested_strategy: self.strategy,
            session_id: self.session_id,
        }
    }
}

/// Handle search tool call
async fn handle_search(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("search", arguments, |params: SearchParams| async move {
        state.client.search(&params.into_query()).await
    })
    .await
}

/// Handle session_create - explicit session creation
async fn handle_session_create(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct CreateParams {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
    }

    // All fields are optional, so a bare call is allowed.
    let arguments = arguments.or_else(|| Some(json!({})));
    execute_handler("session_create", arguments, |params: CreateParams| async move {
        let id = params
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        state
            .client
            .sessions()
            .create_with_metadata(id, params.user_id, params.metadata)
            .await
    })
    .await
}

#[derive(Debug, Serialize)]
struct AppendResult {
    session_id: String,
    message_count: usize,
}

/// Handle session_append - add one message to a session
async fn handle_session_append(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct AppendParams {
        session_id: String,
        role: String,
        content: String,
    }

    execute_handler("session_append", arguments, |params: AppendParams| async move {
        state
            .client
            .append_message(&params.session_id, &params.role, &params.content)
            .await?;
        let info = state.client.sessions().info(&params.session_id).await?;
        Ok::<_, crate::error::SessionError>(AppendResult {
            session_id: info.id,
            message_count: info.message_count,
        })
    })
    .await
}

/// Handle session_history - ordered messages, optionally the most recent N
async fn handle_session_history(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct HistoryParams {
        session_id: String,
        #[serde(default)]
        limit: Option<usize>,
    }

    let params: HistoryParams = parse_arguments("session_history", arguments)?;
    let messages = state
        .client
        .get_history(&params.session_id, params.limit)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    Ok(json!({
        "session_id": params.session_id,
        "messages": messages,
    }))
}

/// Handle session_end - idempotent purge
async fn handle_session_end(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct EndParams {
        session_id: String,
    }

    let params: EndParams = parse_arguments("session_end", arguments)?;
    let ended = state.client.end_session(&params.session_id).await;

    Ok(json!({
        "session_id": params.session_id,
        "ended": ended,
    }))
}

/// Handle routing_hints - sources, rules and strategies for manual selection
async fn handle_routing_hints(state: &SharedState) -> McpResult<Value> {
    serde_json::to_value(state.client.routing_hints()).map_err(McpError::Json)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Generic handler that executes an operation with consistent error handling.
///
/// Parses typed arguments, converts the operation's error into
/// `McpError::ExecutionFailed`, and serializes the result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SourceClient;
    use crate::config::Config;
    use crate::error::SourceResult;
    use crate::registry::{load_str, SourceConfig, SourceKind};
    use crate::server::AppState;
    use crate::sources::{HandlerTable, SourceHandler};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestParams {
        content: String,
        value: i32,
    }

    struct Echo;

    #[async_trait]
    impl SourceHandler for Echo {
        async fn call(
            &self,
            source: &SourceConfig,
            query: &str,
            _timeout: Duration,
        ) -> SourceResult<String> {
            Ok(format!("{} says {}", source.name, query))
        }
    }

    fn state() -> SharedState {
        let loaded = load_str(
            r#"{
                "sources": {
                    "ddg": {"kind": "web-search", "endpoint": "https://ddg.example"},
                    "wiki": {"kind": "encyclopedic", "endpoint": "https://wiki.example"}
                },
                "defaultSource": "ddg",
                "strategy": "manual"
            }"#,
            &HashMap::<String, String>::new(),
        )
        .unwrap();
        let handlers = HandlerTable::empty()
            .with_handler(SourceKind::WebSearch, Arc::new(Echo))
            .with_handler(SourceKind::Encyclopedic, Arc::new(Echo));
        let config = Config::default();
        let client = SourceClient::from_loaded(loaded, handlers, &config);
        Arc::new(AppState::new(config, client))
    }

    #[test]
    fn test_parse_arguments_success() {
        let args = Some(json!({
            "content": "test content",
            "value": 42
        }));

        let result: McpResult<TestParams> = parse_arguments("test.tool", args);
        let params = result.unwrap();
        assert_eq!(params.content, "test content");
        assert_eq!(params.value, 42);
    }

    #[test]
    fn test_parse_arguments_missing_arguments() {
        let result: McpResult<TestParams> = parse_arguments("test.tool", None);
        let err = result.unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
        assert!(err.to_string().contains("Missing arguments"));
        assert!(err.to_string().contains("test.tool"));
    }

    #[test]
    fn test_parse_arguments_wrong_type() {
        let args = Some(json!({
            "content": "test",
            "value": "not a number"
        }));

        let result: McpResult<TestParams> = parse_arguments("test.tool", args);
        assert!(matches!(
            result.unwrap_err(),
            McpError::InvalidParameters { .. }
        ));
    }

    #[test]
    fn test_search_params_into_query() {
        let params: SearchParams = serde_json::from_value(json!({
            "query": "rust",
            "sources": ["wiki"],
            "strategy": "multi",
            "session_id": "s1"
        }))
        .unwrap();
        let query = params.into_query();
        assert_eq!(query.text, "rust");
        assert_eq!(query.requested_sources, vec!["wiki"]);
        assert_eq!(query.requested_strategy, Some(RoutingStrategy::Multi));
        assert_eq!(query.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_search_tool_single_payload() {
        let state = state();
        let result = handle_tool_call(&state, "search", Some(json!({"query": "hello"})))
            .await
            .unwrap();
        assert_eq!(result["payload"]["type"], "single");
        assert_eq!(result["payload"]["source"], "ddg");
        assert_eq!(result["payload"]["text"], "ddg says hello");
    }

    #[tokio::test]
    async fn test_search_tool_explicit_sources_multi_payload() {
        let state = state();
        let result = handle_tool_call(
            &state,
            "search",
            Some(json!({"query": "hello", "sources": ["wiki", "ddg"]})),
        )
        .await
        .unwrap();
        assert_eq!(result["payload"]["type"], "multi");
        assert_eq!(result["payload"]["results"][0]["source"], "wiki");
        assert_eq!(result["payload"]["results"][1]["source"], "ddg");
    }

    #[tokio::test]
    async fn test_search_tool_empty_query_fails() {
        let state = state();
        let err = handle_tool_call(&state, "search", Some(json!({"query": "  "})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Query text cannot be empty"));
    }

    #[tokio::test]
    async fn test_session_lifecycle_tools() {
        let state = state();

        let created = handle_tool_call(&state, "session_create", None).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let appended = handle_tool_call(
            &state,
            "session_append",
            Some(json!({"session_id": id, "role": "user", "content": "hi"})),
        )
        .await
        .unwrap();
        assert_eq!(appended["message_count"], 1);

        let history = handle_tool_call(
            &state,
            "session_history",
            Some(json!({"session_id": id})),
        )
        .await
        .unwrap();
        assert_eq!(history["messages"][0]["content"], "hi");

        let ended = handle_tool_call(&state, "session_end", Some(json!({"session_id": id})))
            .await
            .unwrap();
        assert_eq!(ended["ended"], true);

        let again = handle_tool_call(&state, "session_end", Some(json!({"session_id": id})))
            .await
            .unwrap();
        assert_eq!(again["ended"], false);

        let err = handle_tool_call(
            &state,
            "session_history",
            Some(json!({"session_id": id})),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Session not found"));
    }

    #[tokio::test]
    async fn test_duplicate_session_create_fails() {
        let state = state();
        let args = json!({"session_id": "fixed"});
        handle_tool_call(&state, "session_create", Some(args.clone()))
            .await
            .unwrap();
        let err = handle_tool_call(&state, "session_create", Some(args))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_routing_hints_tool() {
        let state = state();
        let hints = handle_tool_call(&state, "routing_hints", None).await.unwrap();
        assert_eq!(hints["default_strategy"], "manual");
        assert_eq!(hints["available_sources"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let state = state();
        let err = handle_tool_call(&state, "translate", None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
    }
}
