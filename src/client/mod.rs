//! `SourceClient`: the query and session API consumed by outer layers.
//!
//! Bundles the registry, router, dispatcher and session registry behind one
//! handle. Sessions are addressed by id on every call; there is no ambient
//! "current session".

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::dispatch::{Dispatcher, QueryOutcome};
use crate::error::{AppResult, SessionResult};
use crate::registry::{
    LoadWarning, LoadedConfig, RoutingRule, RoutingStrategy, SourceKind, SourceSummary,
};
use crate::routing::Query;
use crate::sessions::{Message, SessionInfo, SessionRegistry};
use crate::sources::HandlerTable;

/// What a caller needs to pick sources and strategies by hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingHints {
    pub available_sources: Vec<SourceSummary>,
    pub rules: Vec<RoutingRule>,
    pub strategies: Vec<RoutingStrategy>,
    pub default_strategy: RoutingStrategy,
    pub default_source: String,
    pub fallback_sources: Vec<String>,
}

/// Query and session facade.
pub struct SourceClient {
    dispatcher: Dispatcher,
    sessions: Arc<SessionRegistry>,
    warnings: Vec<LoadWarning>,
}

impl SourceClient {
    pub fn new(dispatcher: Dispatcher, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            dispatcher,
            sessions,
            warnings: Vec::new(),
        }
    }

    /// Build every component from a loaded document and process configuration.
    pub fn from_loaded(loaded: LoadedConfig, handlers: HandlerTable, config: &Config) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::new(loaded.registry),
            Arc::new(loaded.routing),
            handlers,
            &config.dispatch,
        );
        let sessions = Arc::new(SessionRegistry::new(config.session.clone()));
        Self::new(dispatcher, sessions).with_warnings(loaded.warnings)
    }

    pub fn with_warnings(mut self, warnings: Vec<LoadWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Warnings recorded while loading the configuration document.
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    /// Run a query. With a session id, the query and the rendered result are
    /// appended to that session, which is created on first use.
    pub async fn search(&self, query: &Query) -> AppResult<QueryOutcome> {
        let outcome = self.dispatcher.search(query).await?;

        if let Some(session_id) = &query.session_id {
            let recorded = async {
                self.sessions.ensure(session_id).await?;
                self.sessions
                    .append(session_id, "user", query.text.trim())
                    .await?;
                self.sessions
                    .append(session_id, "assistant", outcome.render())
                    .await
            };
            // The result is still returned if the session vanished meanwhile.
            if let Err(e) = recorded.await {
                warn!(session_id = %session_id, error = %e, "Failed to record search in session");
            }
        }

        Ok(outcome)
    }

    pub async fn create_session(
        &self,
        id: &str,
        user_id: Option<String>,
    ) -> SessionResult<SessionInfo> {
        self.sessions.create(id, user_id).await
    }

    pub async fn append_message(&self, id: &str, role: &str, content: &str) -> SessionResult<()> {
        self.sessions.append(id, role, content).await
    }

    pub async fn get_history(&self, id: &str, limit: Option<usize>) -> SessionResult<Vec<Message>> {
        self.sessions.read(id, limit).await
    }

    /// End a session; a no-op for unknown ids.
    pub async fn end_session(&self, id: &str) -> bool {
        self.sessions.end(id).await
    }

    pub fn list_sources(&self) -> Vec<SourceSummary> {
        self.dispatcher
            .registry()
            .iter()
            .map(|s| s.summary())
            .collect()
    }

    pub fn list_enabled_sources(&self) -> Vec<String> {
        self.dispatcher.registry().enabled_names()
    }

    pub fn source_info(&self, name: &str) -> Option<SourceSummary> {
        self.dispatcher.registry().get(name).map(|s| s.summary())
    }

    pub fn sources_by_capability(&self, capability: &str) -> Vec<String> {
        self.dispatcher.registry().by_capability(capability)
    }

    pub fn sources_by_kind(&self, kind: SourceKind) -> Vec<String> {
        self.dispatcher.registry().by_kind(kind)
    }

    pub fn routing_hints(&self) -> RoutingHints {
        let routing = self.dispatcher.routing();
        RoutingHints {
            available_sources: self.list_sources(),
            rules: routing.rules.clone(),
            strategies: RoutingStrategy::ALL.to_vec(),
            default_strategy: routing.strategy,
            default_source: routing.default_source.clone(),
            fallback_sources: routing.fallback_sources.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, DispatchError, SourceResult};
    use crate::registry::{load_str, SourceConfig};
    use crate::sources::SourceHandler;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl SourceHandler for Upper {
        async fn call(
            &self,
            source: &SourceConfig,
            query: &str,
            _timeout: Duration,
        ) -> SourceResult<String> {
            Ok(format!("{}: {}", source.name, query.to_uppercase()))
        }
    }

    const DOC: &str = r#"{
        "sources": {
            "wiki": {"kind": "encyclopedic", "endpoint": "https://wiki.example", "capabilities": ["factual"]},
            "ddg": {"kind": "web-search", "endpoint": "https://ddg.example", "capabilities": ["general"]},
            "news": {"kind": "news", "endpoint": "https://news.example", "credentialRef": "${NEWS_KEY}"}
        },
        "defaultSource": "ddg",
        "strategy": "auto",
        "fallbackSources": ["wiki"],
        "rules": {"factual": ["wiki"]}
    }"#;

    fn client() -> SourceClient {
        let loaded = load_str(DOC, &HashMap::<String, String>::new()).unwrap();
        let handlers = HandlerTable::empty()
            .with_handler(SourceKind::Encyclopedic, Arc::new(Upper))
            .with_handler(SourceKind::WebSearch, Arc::new(Upper));
        SourceClient::from_loaded(loaded, handlers, &Config::default())
    }

    #[tokio::test]
    async fn test_search_records_session_history() {
        let client = client();
        let outcome = client
            .search(&Query::new("factual thing").with_session("s1"))
            .await
            .unwrap();
        assert_eq!(outcome.text(), Some("wiki: FACTUAL THING"));

        let history = client.get_history("s1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content, "factual thing");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, "wiki: FACTUAL THING");
    }

    #[tokio::test]
    async fn test_failed_search_leaves_session_untouched() {
        let client = client();
        let err = client
            .search(&Query::new("x").with_sources(["news"]).with_session("s"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::NoEligibleSource { .. })
        ));
        assert!(client.get_history("s", None).await.is_err());
    }

    #[test]
    fn test_introspection() {
        let client = client();
        assert_eq!(client.list_sources().len(), 3);
        assert_eq!(client.list_enabled_sources(), vec!["wiki", "ddg"]);
        assert_eq!(client.sources_by_capability("factual"), vec!["wiki"]);
        assert_eq!(client.sources_by_kind(SourceKind::News), Vec::<String>::new());
        assert!(!client.source_info("news").unwrap().enabled);
        assert!(client.source_info("ghost").is_none());
        assert_eq!(client.warnings().len(), 1);
        assert_eq!(client.warnings()[0].source, "news");
    }

    #[test]
    fn test_routing_hints() {
        let hints = client().routing_hints();
        assert_eq!(hints.default_strategy, RoutingStrategy::Auto);
        assert_eq!(hints.default_source, "ddg");
        assert_eq!(hints.fallback_sources, vec!["wiki"]);
        assert_eq!(hints.strategies.len(), 3);

        let json = serde_json::to_value(&hints).unwrap();
        assert_eq!(json["rules"][0]["topic"], "factual");
        assert_eq!(json["available_sources"][0]["name"], "wiki");
    }
}
