use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::http::{join, str_at, within, HttpTransport};
use super::{result_limit, SourceHandler};
use crate::error::SourceResult;
use crate::registry::SourceConfig;

/// Handler for instant-answer web search (DuckDuckGo API shape).
pub struct WebSearchHandler {
    transport: HttpTransport,
}

impl WebSearchHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for WebSearchHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        within(timeout, async {
            let request = self.transport.client().get(&source.endpoint).query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ]);
            let data = self.transport.json(request, timeout).await?;
            Ok(render_instant_answer(&data))
        })
        .await
    }
}

fn render_instant_answer(data: &Value) -> String {
    let mut lines = Vec::new();
    if let Some(summary) = str_at(data, "/Abstract").filter(|s| !s.is_empty()) {
        lines.push(format!("Summary: {}", summary));
    }

    let related: Vec<&str> = data
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .map(|topics| {
            topics
                .iter()
                .take(3)
                .filter_map(|t| t.get("Text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if !related.is_empty() {
        lines.push(format!("Related: {}", related.join("; ")));
    }

    if lines.is_empty() {
        "No specific instant answer found.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Handler for code-hosting repository search (GitHub API shape).
pub struct CodeSearchHandler {
    transport: HttpTransport,
}

impl CodeSearchHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for CodeSearchHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let url = join(&source.endpoint, "search/repositories");
        let per_page = result_limit(source).to_string();

        within(timeout, async {
            let mut request = self.transport.client().get(&url).query(&[
                ("q", query),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
            ]);
            // Anonymous search works, with a lower rate limit.
            if let Some(credential) = &source.credential {
                request = request.header("Authorization", format!("token {}", credential.expose()));
            }
            let data = self.transport.json(request, timeout).await?;
            Ok(render_repositories(&data))
        })
        .await
    }
}

fn render_repositories(data: &Value) -> String {
    let lines: Vec<String> = data
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .take(3)
                .map(|repo| {
                    format!(
                        "{} ({} stars): {}",
                        str_at(repo, "/full_name").unwrap_or_default(),
                        repo.get("stargazers_count")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                        str_at(repo, "/description").unwrap_or("No description"),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        "No repositories found for this query.".to_string()
    } else {
        lines.join("\n")
    }
}
