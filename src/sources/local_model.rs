use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{join, within, HttpTransport};
use super::SourceHandler;
use crate::error::{SourceError, SourceResult};
use crate::registry::SourceConfig;

const DEFAULT_MODEL: &str = "llama2";

/// Generation request for an Ollama-style `/api/generate` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerateOptions,
}

/// Sampling options; unset values are omitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl GenerateRequest {
    pub fn for_source(source: &SourceConfig, query: &str) -> Self {
        Self {
            model: source
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            prompt: format!("Please provide comprehensive information about: {}", query),
            stream: false,
            options: GenerateOptions {
                temperature: source.temperature,
                num_predict: source.max_output_tokens,
            },
        }
    }
}

/// Handler for local model servers.
pub struct LocalModelHandler {
    transport: HttpTransport,
}

impl LocalModelHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for LocalModelHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let url = join(&source.endpoint, "api/generate");
        let body = GenerateRequest::for_source(source, query);

        within(timeout, async {
            let request = self.transport.client().post(&url).json(&body);
            let value = self.transport.json(request, timeout).await?;
            let parsed: GenerateResponse =
                serde_json::from_value(value).map_err(|e| SourceError::BadResponse {
                    message: format!("Unexpected generate response: {}", e),
                })?;
            parsed.response.ok_or_else(|| SourceError::BadResponse {
                message: "Generate response has no 'response' field".to_string(),
            })
        })
        .await
    }
}
