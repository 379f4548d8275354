//! Integration tests for the built-in source handlers
//!
//! Tests each handler against a wiremock backend speaking that kind's wire shape.

use std::time::Duration;

use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use source_router::config::RequestConfig;
use source_router::error::FailureKind;
use source_router::registry::{Credential, SourceConfig, SourceKind};
use source_router::sources::{HandlerTable, HttpTransport};

const TIMEOUT: Duration = Duration::from_secs(5);

fn handlers() -> HandlerTable {
    HandlerTable::standard(
        HttpTransport::new(&RequestConfig::default()).expect("Failed to create transport"),
    )
}

#[cfg(test)]
mod local_model_tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_posts_prompt_and_returns_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "llama2",
                "prompt": "Please provide comprehensive information about: why is the sky blue",
                "stream": false,
                "options": {}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama2",
                "response": "Rayleigh scattering.",
                "done": true
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("ollama", SourceKind::LocalModel, mock_server.uri());
        let text = handlers()
            .call(&source, "why is the sky blue", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(text, "Rayleigh scattering.");
    }

    #[tokio::test]
    async fn test_missing_response_field_is_bad_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("ollama", SourceKind::LocalModel, mock_server.uri());
        let err = handlers().call(&source, "hi", TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BadResponse);
    }
}

#[cfg(test)]
mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_web_search_renders_instant_answer() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("q", "rust language"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Abstract": "Rust is a systems programming language.",
                "RelatedTopics": [{"Text": "Cargo"}, {"Text": "Ferris"}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("ddg", SourceKind::WebSearch, mock_server.uri());
        let text = handlers().call(&source, "rust language", TIMEOUT).await.unwrap();
        assert!(text.starts_with("Summary: Rust is a systems programming language."));
        assert!(text.contains("Related: Cargo; Ferris"));
    }

    #[tokio::test]
    async fn test_code_search_sends_token_when_configured() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .and(query_param("per_page", "2"))
            .and(header("Authorization", "token gh-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"full_name": "tokio-rs/tokio", "stargazers_count": 25000, "description": "Async runtime"},
                    {"full_name": "serde-rs/serde", "stargazers_count": 9000, "description": null}
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("github", SourceKind::CodeSearch, mock_server.uri())
            .with_credential(Credential::new("gh-secret"))
            .with_max_results(2);
        let text = handlers().call(&source, "async", TIMEOUT).await.unwrap();
        assert_eq!(
            text,
            "tokio-rs/tokio (25000 stars): Async runtime\nserde-rs/serde (9000 stars): No description"
        );
    }
}

#[cfg(test)]
mod knowledge_tests {
    use super::*;

    #[tokio::test]
    async fn test_encyclopedic_returns_title_and_extract() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/page/summary/Rust_language"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "Rust (programming language)",
                "extract": "Rust is a general-purpose programming language."
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("wiki", SourceKind::Encyclopedic, mock_server.uri());
        let text = handlers().call(&source, "Rust language", TIMEOUT).await.unwrap();
        assert_eq!(
            text,
            "Rust (programming language): Rust is a general-purpose programming language."
        );
    }

    #[tokio::test]
    async fn test_encyclopedic_not_found_is_not_a_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("wiki", SourceKind::Encyclopedic, mock_server.uri());
        let text = handlers().call(&source, "Zzyzx", TIMEOUT).await.unwrap();
        assert_eq!(text, "No encyclopedia article found for this query.");
    }

    #[tokio::test]
    async fn test_knowledge_graph_renders_bindings() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {"bindings": [{
                    "item": {"value": "http://www.wikidata.org/entity/Q575650"},
                    "itemLabel": {"value": "Rust"},
                    "itemDescription": {"value": "programming language"}
                }]}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("wikidata", SourceKind::KnowledgeGraph, mock_server.uri());
        let text = handlers().call(&source, "Rust", TIMEOUT).await.unwrap();
        assert!(text.contains("Rust (Q575650): programming language"));
    }

    #[tokio::test]
    async fn test_paper_index_parses_atom_feed() {
        let mock_server = MockServer::start().await;

        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query</title>
  <entry>
    <title>Attention Is All
      You Need</title>
    <summary>The dominant sequence transduction models are based on recurrent networks.</summary>
  </entry>
</feed>"#;

        Mock::given(method("GET"))
            .and(query_param("search_query", "all:transformers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("arxiv", SourceKind::PaperIndex, mock_server.uri());
        let text = handlers().call(&source, "transformers", TIMEOUT).await.unwrap();
        assert_eq!(
            text,
            "Attention Is All You Need: The dominant sequence transduction models are based on recurrent networks."
        );
    }
}

#[cfg(test)]
mod feed_tests {
    use super::*;

    #[tokio::test]
    async fn test_news_passes_api_key_as_query_param() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/everything"))
            .and(query_param("q", "rust"))
            .and(query_param("apiKey", "news-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "articles": [{
                    "source": {"name": "The Register"},
                    "title": "Rust 2.0 announced",
                    "description": "Not really."
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("news", SourceKind::News, mock_server.uri())
            .with_credential(Credential::new("news-key"));
        let text = handlers().call(&source, "rust", TIMEOUT).await.unwrap();
        assert_eq!(text, "The Register: Rust 2.0 announced - Not really.");
    }

    #[tokio::test]
    async fn test_news_without_credential_is_unsupported() {
        let source = SourceConfig::new("news", SourceKind::News, "http://127.0.0.1:9");
        let err = handlers().call(&source, "rust", TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unsupported);
    }

    #[tokio::test]
    async fn test_finance_renders_quote() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": {"result": [{"meta": {
                    "symbol": "AAPL",
                    "regularMarketPrice": 110.0,
                    "previousClose": 100.0
                }}]}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let endpoint = format!("{}/v8/finance/chart", mock_server.uri());
        let source = SourceConfig::new("yahoo", SourceKind::Finance, endpoint);
        let text = handlers().call(&source, "aapl", TIMEOUT).await.unwrap();
        assert_eq!(text, "AAPL: $110.00 (+10.00, +10.00%)");
    }

    #[tokio::test]
    async fn test_weather_renders_conditions() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("appid", "wx-key"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Oslo",
                "sys": {"country": "NO"},
                "main": {"temp": 4.5},
                "weather": [{"description": "light rain"}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("weather", SourceKind::Weather, mock_server.uri())
            .with_credential(Credential::new("wx-key"));
        let text = handlers().call(&source, "Oslo", TIMEOUT).await.unwrap();
        assert_eq!(text, "Oslo, NO: 4.5°C, Light Rain");
    }
}

#[cfg(test)]
mod browser_tests {
    use super::*;

    #[tokio::test]
    async fn test_browser_posts_query_and_returns_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_json(json!({"query": "rendered page"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("Page text"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source =
            SourceConfig::new("browser", SourceKind::BrowserAutomation, mock_server.uri());
        let text = handlers().call(&source, "rendered page", TIMEOUT).await.unwrap();
        assert_eq!(text, "Page text");
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"Abstract": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("ddg", SourceKind::WebSearch, mock_server.uri());
        let err = handlers()
            .call(&source, "q", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_server_error_is_bad_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("ddg", SourceKind::WebSearch, mock_server.uri());
        let err = handlers().call(&source, "q", TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BadResponse);
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&mock_server)
            .await;

        let source = SourceConfig::new("ddg", SourceKind::WebSearch, mock_server.uri());
        let err = handlers().call(&source, "q", TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BadResponse);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_failed() {
        let source = SourceConfig::new("ddg", SourceKind::WebSearch, "http://127.0.0.1:9");
        let err = handlers().call(&source, "q", TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ConnectionFailed);
    }
}
