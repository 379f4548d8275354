//! Live-data handlers: news articles, market quotes, and current weather.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::http::{join, str_at, with_segments, within, HttpTransport};
use super::{required_credential, result_limit, SourceHandler};
use crate::error::SourceResult;
use crate::registry::SourceConfig;

/// Handler for news article search (NewsAPI shape). Needs a credential.
pub struct NewsHandler {
    transport: HttpTransport,
}

impl NewsHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for NewsHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let credential = required_credential(source)?;
        let url = join(&source.endpoint, "everything");
        let page_size = result_limit(source).to_string();

        within(timeout, async {
            let request = self.transport.client().get(&url).query(&[
                ("q", query),
                ("apiKey", credential.expose()),
                ("pageSize", page_size.as_str()),
                ("sortBy", "publishedAt"),
            ]);
            let data = self.transport.json(request, timeout).await?;
            Ok(render_articles(&data))
        })
        .await
    }
}

fn render_articles(data: &Value) -> String {
    let lines: Vec<String> = data
        .get("articles")
        .and_then(Value::as_array)
        .map(|articles| {
            articles
                .iter()
                .take(3)
                .map(|a| {
                    format!(
                        "{}: {} - {}",
                        str_at(a, "/source/name").unwrap_or("Unknown"),
                        str_at(a, "/title").unwrap_or_default(),
                        str_at(a, "/description").unwrap_or("No description"),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        "No news articles found for this query.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Handler for market quotes (Yahoo chart API shape).
pub struct FinanceHandler {
    transport: HttpTransport,
}

impl FinanceHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

/// Ticker symbol for a query: uppercased, whitespace removed.
pub fn ticker_symbol(query: &str) -> String {
    query
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[async_trait]
impl SourceHandler for FinanceHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let symbol = ticker_symbol(query);
        let url = with_segments(&source.endpoint, &[&symbol])?;

        within(timeout, async {
            let request = self
                .transport
                .client()
                .get(url)
                .query(&[("interval", "1d"), ("range", "1d")]);
            let data = self.transport.json(request, timeout).await?;
            Ok(render_quote(&data, query))
        })
        .await
    }
}

fn render_quote(data: &Value, query: &str) -> String {
    let meta = match data.pointer("/chart/result/0/meta") {
        Some(meta) => meta,
        None => return format!("No financial data found for '{}'", query),
    };
    let price = meta.get("regularMarketPrice").and_then(Value::as_f64);
    let previous = meta
        .get("previousClose")
        .or_else(|| meta.get("chartPreviousClose"))
        .and_then(Value::as_f64);
    let symbol = str_at(meta, "/symbol")
        .map(str::to_string)
        .unwrap_or_else(|| ticker_symbol(query));

    match (price, previous) {
        (Some(price), Some(previous)) if previous != 0.0 => {
            let change = price - previous;
            let percent = change / previous * 100.0;
            format!(
                "{}: ${:.2} ({:+.2}, {:+.2}%)",
                symbol, price, change, percent
            )
        }
        (Some(price), _) => format!("{}: ${:.2}", symbol, price),
        (None, _) => format!("No financial data found for '{}'", query),
    }
}

/// Handler for current weather (OpenWeatherMap shape). Needs a credential.
pub struct WeatherHandler {
    transport: HttpTransport,
}

impl WeatherHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for WeatherHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let credential = required_credential(source)?;
        let url = join(&source.endpoint, "weather");

        within(timeout, async {
            let request = self.transport.client().get(&url).query(&[
                ("q", query),
                ("appid", credential.expose()),
                ("units", "metric"),
            ]);
            let data = self.transport.json(request, timeout).await?;
            Ok(render_weather(&data, query))
        })
        .await
    }
}

fn render_weather(data: &Value, query: &str) -> String {
    let temp = data.pointer("/main/temp").and_then(Value::as_f64);
    let description = str_at(data, "/weather/0/description").unwrap_or_default();
    let city = str_at(data, "/name").unwrap_or(query);

    let place = match str_at(data, "/sys/country") {
        Some(country) => format!("{}, {}", city, country),
        None => city.to_string(),
    };

    match temp {
        Some(temp) => format!("{}: {}°C, {}", place, temp, title_case(description)),
        None => format!("No weather data found for '{}'", query),
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
