//! Source handlers: one adapter per [`SourceKind`].
//!
//! A handler turns a query string into a backend-specific request and extracts
//! a text payload. Handlers never retry, and every handler enforces the timeout
//! it is given for the whole exchange.
//!
//! ```text
//! Dispatcher ──► HandlerTable[kind] ──► SourceHandler::call ──► backend (HTTP)
//! ```

mod browser;
mod feeds;
mod http;
mod knowledge;
mod local_model;
mod search;

pub use browser::BrowserAutomationHandler;
pub use feeds::{FinanceHandler, NewsHandler, WeatherHandler};
pub use http::{within, HttpTransport};
pub use knowledge::{EncyclopedicHandler, KnowledgeGraphHandler, PaperIndexHandler};
pub use local_model::LocalModelHandler;
pub use search::{CodeSearchHandler, WebSearchHandler};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SourceError, SourceResult};
use crate::registry::{Credential, SourceConfig, SourceKind};

/// Adapter for one backend family.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// Call the source once and extract its text payload.
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String>;
}

/// Kind → handler lookup, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<SourceKind, Arc<dyn SourceHandler>>,
}

impl HandlerTable {
    /// Table with the built-in HTTP handler for every kind.
    pub fn standard(transport: HttpTransport) -> Self {
        let handlers = SourceKind::ALL
            .into_iter()
            .map(|kind| (kind, builtin_handler(kind, transport.clone())))
            .collect();
        Self { handlers }
    }

    /// Table with no handlers; every call is `Unsupported`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Install or replace the handler for a kind.
    pub fn with_handler(mut self, kind: SourceKind, handler: Arc<dyn SourceHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn SourceHandler>> {
        self.handlers.get(&kind)
    }

    /// Call the handler registered for the source's kind.
    pub async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        match self.get(source.kind) {
            Some(handler) => handler.call(source, query, timeout).await,
            None => Err(SourceError::Unsupported {
                message: format!("No handler for source kind '{}'", source.kind),
            }),
        }
    }
}

fn builtin_handler(kind: SourceKind, transport: HttpTransport) -> Arc<dyn SourceHandler> {
    match kind {
        SourceKind::LocalModel => Arc::new(LocalModelHandler::new(transport)),
        SourceKind::WebSearch => Arc::new(WebSearchHandler::new(transport)),
        SourceKind::KnowledgeGraph => Arc::new(KnowledgeGraphHandler::new(transport)),
        SourceKind::Encyclopedic => Arc::new(EncyclopedicHandler::new(transport)),
        SourceKind::PaperIndex => Arc::new(PaperIndexHandler::new(transport)),
        SourceKind::News => Arc::new(NewsHandler::new(transport)),
        SourceKind::CodeSearch => Arc::new(CodeSearchHandler::new(transport)),
        SourceKind::Finance => Arc::new(FinanceHandler::new(transport)),
        SourceKind::Weather => Arc::new(WeatherHandler::new(transport)),
        SourceKind::BrowserAutomation => Arc::new(BrowserAutomationHandler::new(transport)),
    }
}

/// The credential a kind cannot work without.
pub(crate) fn required_credential(source: &SourceConfig) -> SourceResult<&Credential> {
    source
        .credential
        .as_ref()
        .ok_or_else(|| SourceError::Unsupported {
            message: format!(
                "Source '{}' has no credential configured{}",
                source.name,
                source
                    .credential_ref
                    .as_deref()
                    .map(|v| format!(" (set {})", v))
                    .unwrap_or_default()
            ),
        })
}

pub(crate) fn result_limit(source: &SourceConfig) -> u32 {
    source.max_results.unwrap_or(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;

    struct Echo;

    #[async_trait]
    impl SourceHandler for Echo {
        async fn call(
            &self,
            source: &SourceConfig,
            query: &str,
            _timeout: Duration,
        ) -> SourceResult<String> {
            Ok(format!("{}:{}", source.name, query))
        }
    }

    #[test]
    fn test_standard_table_covers_every_kind() {
        let transport = HttpTransport::new(&RequestConfig::default()).unwrap();
        let table = HandlerTable::standard(transport);
        for kind in SourceKind::ALL {
            assert!(table.get(kind).is_some(), "missing handler for {}", kind);
        }
    }

    #[tokio::test]
    async fn test_empty_table_is_unsupported() {
        let table = HandlerTable::empty();
        let source = SourceConfig::new("f", SourceKind::Finance, "http://f");
        let result = table.call(&source, "AAPL", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SourceError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_override_replaces_handler() {
        let table = HandlerTable::empty().with_handler(SourceKind::Finance, Arc::new(Echo));
        let source = SourceConfig::new("f", SourceKind::Finance, "http://f");
        let result = table.call(&source, "AAPL", Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), "f:AAPL");
    }

    #[test]
    fn test_required_credential_message_names_variable() {
        let mut source = SourceConfig::new("n", SourceKind::News, "http://n");
        source.credential_ref = Some("NEWS_API_KEY".to_string());
        let err = required_credential(&source).unwrap_err();
        assert!(err.to_string().contains("NEWS_API_KEY"));
    }
}
