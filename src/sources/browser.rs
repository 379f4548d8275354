use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::http::{join, within, HttpTransport};
use super::SourceHandler;
use crate::error::SourceResult;
use crate::registry::SourceConfig;

/// Handler for a browser-automation bridge that runs a search and returns
/// the page text verbatim.
pub struct BrowserAutomationHandler {
    transport: HttpTransport,
}

impl BrowserAutomationHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for BrowserAutomationHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let url = join(&source.endpoint, "search");
        within(timeout, async {
            let request = self
                .transport
                .client()
                .post(&url)
                .json(&json!({ "query": query }));
            self.transport.text(request, timeout).await
        })
        .await
    }
}
