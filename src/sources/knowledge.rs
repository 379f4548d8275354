//! Reference-knowledge handlers: encyclopedia summaries, knowledge-graph
//! entity search, and the academic paper index.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::StatusCode;
use serde_json::Value;

use super::http::{str_at, truncate, with_segments, within, HttpTransport};
use super::{result_limit, SourceHandler};
use crate::error::{SourceError, SourceResult};
use crate::registry::SourceConfig;

/// Handler for encyclopedia page summaries (Wikipedia REST shape).
pub struct EncyclopedicHandler {
    transport: HttpTransport,
}

impl EncyclopedicHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for EncyclopedicHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let title = query.trim().replace(' ', "_");
        let url = with_segments(&source.endpoint, &["page", "summary", &title])?;

        within(timeout, async {
            let response = self
                .transport
                .client()
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| super::http::map_reqwest_error(e, timeout))?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok("No encyclopedia article found for this query.".to_string());
            }
            if !response.status().is_success() {
                return Err(SourceError::BadResponse {
                    message: format!("HTTP {}", response.status().as_u16()),
                });
            }

            let data: Value = response
                .json()
                .await
                .map_err(|e| super::http::map_reqwest_error(e, timeout))?;
            match str_at(&data, "/extract").filter(|s| !s.is_empty()) {
                Some(extract) => match str_at(&data, "/title") {
                    Some(title) => Ok(format!("{}: {}", title, extract)),
                    None => Ok(extract.to_string()),
                },
                None => Ok("No encyclopedia article found for this query.".to_string()),
            }
        })
        .await
    }
}

/// Handler for knowledge-graph entity search over a SPARQL endpoint.
pub struct KnowledgeGraphHandler {
    transport: HttpTransport,
}

impl KnowledgeGraphHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

/// Entity search query; at most three hits with English labels.
pub fn entity_search_sparql(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        r#"SELECT ?item ?itemLabel ?itemDescription WHERE {{
  SERVICE wikibase:mwapi {{
    bd:serviceParam wikibase:api "EntitySearch" .
    bd:serviceParam wikibase:endpoint "www.wikidata.org" .
    bd:serviceParam mwapi:search "{}" .
    bd:serviceParam mwapi:language "en" .
    ?item wikibase:apiOutputItem mwapi:item .
  }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}
LIMIT 3"#,
        escaped
    )
}

#[async_trait]
impl SourceHandler for KnowledgeGraphHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let sparql = entity_search_sparql(query);

        within(timeout, async {
            let request = self
                .transport
                .client()
                .get(&source.endpoint)
                .header("Accept", "application/sparql-results+json")
                .query(&[("query", sparql.as_str()), ("format", "json")]);
            let data = self.transport.json(request, timeout).await?;
            Ok(render_bindings(&data))
        })
        .await
    }
}

fn render_bindings(data: &Value) -> String {
    let lines: Vec<String> = data
        .pointer("/results/bindings")
        .and_then(Value::as_array)
        .map(|bindings| {
            bindings
                .iter()
                .map(|b| {
                    let id = str_at(b, "/item/value")
                        .and_then(|v| v.rsplit('/').next())
                        .unwrap_or_default();
                    format!(
                        "{} ({}): {}",
                        str_at(b, "/itemLabel/value").unwrap_or("Unknown"),
                        id,
                        str_at(b, "/itemDescription/value").unwrap_or("No description"),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        "No knowledge graph entities found for this query.".to_string()
    } else {
        format!("Knowledge graph entities:\n{}", lines.join("\n"))
    }
}

/// Handler for the academic paper index (arXiv Atom API shape).
pub struct PaperIndexHandler {
    transport: HttpTransport,
}

impl PaperIndexHandler {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SourceHandler for PaperIndexHandler {
    async fn call(
        &self,
        source: &SourceConfig,
        query: &str,
        timeout: Duration,
    ) -> SourceResult<String> {
        let search = format!("all:{}", query);
        let max_results = result_limit(source).to_string();

        within(timeout, async {
            let request = self.transport.client().get(&source.endpoint).query(&[
                ("search_query", search.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ]);
            let body = self.transport.text(request, timeout).await?;
            let papers = parse_atom_entries(&body)?;
            if papers.is_empty() {
                return Ok("No papers found for this query.".to_string());
            }
            Ok(papers
                .iter()
                .take(3)
                .map(|p| format!("{}: {}", p.title, truncate(&p.summary, 200)))
                .collect::<Vec<_>>()
                .join("\n"))
        })
        .await
    }
}

/// Title and abstract of one Atom entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paper {
    pub title: String,
    pub summary: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Title,
    Summary,
}

/// Extract `<entry>` titles and summaries from an Atom feed.
pub fn parse_atom_entries(xml: &str) -> SourceResult<Vec<Paper>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut current: Option<Paper> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    current = Some(Paper {
                        title: String::new(),
                        summary: String::new(),
                    })
                }
                b"title" if current.is_some() => field = Field::Title,
                b"summary" if current.is_some() => field = Field::Summary,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(paper) = current.as_mut() {
                    let text = t.unescape().map_err(|e| SourceError::BadResponse {
                        message: format!("Malformed Atom text: {}", e),
                    })?;
                    match field {
                        Field::Title => paper.title.push_str(&text),
                        Field::Summary => paper.summary.push_str(&text),
                        Field::None => {}
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(mut paper) = current.take() {
                        paper.title = collapse_whitespace(&paper.title);
                        paper.summary = collapse_whitespace(&paper.summary);
                        if !paper.title.is_empty() {
                            papers.push(paper);
                        }
                    }
                    field = Field::None;
                }
                b"title" | b"summary" => field = Field::None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::BadResponse {
                    message: format!("Malformed Atom feed: {}", e),
                })
            }
            _ => {}
        }
    }

    Ok(papers)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query: all:transformers</title>
  <entry>
    <title>Attention Is All
      You Need</title>
    <summary>The dominant sequence transduction models are based on complex
      recurrent or convolutional neural networks &amp; attention.</summary>
  </entry>
  <entry>
    <title>BERT</title>
    <summary>Pre-training of deep bidirectional transformers.</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_entries_skips_feed_title() {
        let papers = parse_atom_entries(FEED).unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].title, "Attention Is All You Need");
        assert!(papers[0].summary.ends_with("neural networks & attention."));
        assert_eq!(papers[1].title, "BERT");
    }

    #[test]
    fn test_parse_atom_rejects_garbage() {
        assert!(parse_atom_entries("<feed><entry></feed>").is_err());
    }

    #[test]
    fn test_sparql_escapes_quotes() {
        let sparql = entity_search_sparql(r#"say "hi""#);
        assert!(sparql.contains(r#"mwapi:search "say \"hi\"""#));
        assert!(sparql.ends_with("LIMIT 3"));
    }

    #[test]
    fn test_render_bindings() {
        let data = json!({
            "results": {"bindings": [
                {
                    "item": {"value": "http://www.wikidata.org/entity/Q42"},
                    "itemLabel": {"value": "Douglas Adams"},
                    "itemDescription": {"value": "English writer"}
                },
                {"item": {"value": "http://www.wikidata.org/entity/Q1"}}
            ]}
        });
        assert_eq!(
            render_bindings(&data),
            "Knowledge graph entities:\nDouglas Adams (Q42): English writer\nUnknown (Q1): No description"
        );
        assert_eq!(
            render_bindings(&json!({"results": {"bindings": []}})),
            "No knowledge graph entities found for this query."
        );
    }
}
