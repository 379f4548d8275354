//! Source registry: typed descriptions of every reachable backend and the
//! routing policy that selects among them.
//!
//! The registry is immutable after load. Sources keep the order in which they
//! appear in the configuration document.

mod loader;
mod secrets;

pub use loader::{load_file, load_str, LoadWarning, LoadedConfig};
pub use secrets::{Credential, EnvSecrets, SecretProvider};

#[cfg(test)]
pub use secrets::MockSecretProvider;

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Backend family of a source. Each kind has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Local model server (Ollama-style generate API)
    LocalModel,
    /// Instant-answer web search
    WebSearch,
    /// Structured entity lookup (Wikidata/DBpedia style)
    KnowledgeGraph,
    /// Encyclopedia page summaries
    Encyclopedic,
    /// Academic paper index (Atom feed)
    PaperIndex,
    /// News article search
    News,
    /// Code-hosting repository search
    CodeSearch,
    /// Market quotes
    Finance,
    /// Current weather
    Weather,
    /// Remote browser automation service
    BrowserAutomation,
}

impl SourceKind {
    /// Every kind, in declaration order.
    pub const ALL: [SourceKind; 10] = [
        SourceKind::LocalModel,
        SourceKind::WebSearch,
        SourceKind::KnowledgeGraph,
        SourceKind::Encyclopedic,
        SourceKind::PaperIndex,
        SourceKind::News,
        SourceKind::CodeSearch,
        SourceKind::Finance,
        SourceKind::Weather,
        SourceKind::BrowserAutomation,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LocalModel => "local-model",
            SourceKind::WebSearch => "web-search",
            SourceKind::KnowledgeGraph => "knowledge-graph",
            SourceKind::Encyclopedic => "encyclopedic",
            SourceKind::PaperIndex => "paper-index",
            SourceKind::News => "news",
            SourceKind::CodeSearch => "code-search",
            SourceKind::Finance => "finance",
            SourceKind::Weather => "weather",
            SourceKind::BrowserAutomation => "browser-automation",
        }
    }

    /// Timeout applied when a source does not configure `timeoutSeconds`.
    pub fn default_timeout(&self) -> Duration {
        match self {
            SourceKind::LocalModel => Duration::from_secs(60),
            SourceKind::BrowserAutomation => Duration::from_secs(60),
            SourceKind::PaperIndex => Duration::from_secs(30),
            SourceKind::KnowledgeGraph | SourceKind::CodeSearch => Duration::from_secs(20),
            SourceKind::WebSearch | SourceKind::Encyclopedic | SourceKind::News => {
                Duration::from_secs(15)
            }
            SourceKind::Finance | SourceKind::Weather => Duration::from_secs(10),
        }
    }

    /// Whether a source of this kind is unusable without a resolved credential.
    pub fn requires_credential(&self) -> bool {
        matches!(self, SourceKind::News | SourceKind::Weather)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "local-model" | "ollama" => Ok(SourceKind::LocalModel),
            "web-search" => Ok(SourceKind::WebSearch),
            "knowledge-graph" | "wikidata" | "dbpedia" => Ok(SourceKind::KnowledgeGraph),
            "encyclopedic" | "wikipedia" => Ok(SourceKind::Encyclopedic),
            "paper-index" | "arxiv" => Ok(SourceKind::PaperIndex),
            "news" => Ok(SourceKind::News),
            "code-search" | "github" => Ok(SourceKind::CodeSearch),
            "finance" => Ok(SourceKind::Finance),
            "weather" => Ok(SourceKind::Weather),
            "browser-automation" | "playwright" => Ok(SourceKind::BrowserAutomation),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

/// How many and which sources a query is routed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Select sources from topic rules matched against the query text
    #[default]
    Auto,
    /// Always use the default source
    Manual,
    /// Query every capability-matching source and merge the results
    Multi,
}

impl RoutingStrategy {
    /// All strategies, in declaration order.
    pub const ALL: [RoutingStrategy; 3] = [
        RoutingStrategy::Auto,
        RoutingStrategy::Manual,
        RoutingStrategy::Multi,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::Auto => "auto",
            RoutingStrategy::Manual => "manual",
            RoutingStrategy::Multi => "multi",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(RoutingStrategy::Auto),
            "manual" => Ok(RoutingStrategy::Manual),
            "multi" => Ok(RoutingStrategy::Multi),
            _ => Err(format!("Unknown routing strategy: {}", s)),
        }
    }
}

/// One external backend.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Unique registry key.
    pub name: String,
    pub kind: SourceKind,
    /// Base URL of the backend.
    pub endpoint: String,
    pub enabled: bool,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Generation cap, local-model only.
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature, local-model only.
    pub temperature: Option<f64>,
    /// Model name, local-model only.
    pub model: Option<String>,
    /// Result cap for list-style backends.
    pub max_results: Option<u32>,
    /// Name of the secret the credential was resolved from.
    pub credential_ref: Option<String>,
    /// Resolved credential, if any.
    pub credential: Option<Credential>,
    /// Routing tags, e.g. "factual" or "current_events".
    pub capabilities: Vec<String>,
    pub description: String,
    /// Why the loader disabled this source, when it did.
    pub disabled_reason: Option<String>,
}

impl SourceConfig {
    /// Create an enabled source with kind defaults.
    pub fn new(name: impl Into<String>, kind: SourceKind, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            enabled: true,
            timeout: kind.default_timeout(),
            max_output_tokens: None,
            temperature: None,
            model: None,
            max_results: None,
            credential_ref: None,
            credential: None,
            capabilities: Vec::new(),
            description: String::new(),
            disabled_reason: None,
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the routing capability tags.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a resolved credential.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the result cap.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Mark the source disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this source advertises the given capability tag.
    pub fn has_capability(&self, tag: &str) -> bool {
        let wanted = normalize_tag(tag);
        self.capabilities.iter().any(|c| normalize_tag(c) == wanted)
    }

    /// Display summary, without credentials.
    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            name: self.name.clone(),
            kind: self.kind,
            description: self.description.clone(),
            capabilities: self.capabilities.clone(),
            enabled: self.enabled,
            timeout_seconds: self.timeout.as_secs_f64(),
            disabled_reason: self.disabled_reason.clone(),
        }
    }
}

/// Credential-free view of a source for UIs and tool listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub name: String,
    pub kind: SourceKind,
    pub description: String,
    pub capabilities: Vec<String>,
    pub enabled: bool,
    pub timeout_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

/// Normalize a topic or capability tag: lowercase, `-` and spaces folded to `_`.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Validated set of sources, in document order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<SourceConfig>,
    index: HashMap<String, usize>,
}

impl SourceRegistry {
    /// Build a registry, rejecting duplicate names, empty endpoints and
    /// non-positive timeouts.
    pub fn new(sources: Vec<SourceConfig>) -> ConfigResult<Self> {
        let mut index = HashMap::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            if source.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    context: format!("source '{}'", source.name),
                    field: "endpoint".to_string(),
                });
            }
            if source.timeout.is_zero() {
                return Err(ConfigError::OutOfRange {
                    source_name: source.name.clone(),
                    field: "timeoutSeconds".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
            if index.insert(source.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateSource {
                    name: source.name.clone(),
                });
            }
        }
        Ok(Self { sources, index })
    }

    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.index.get(name).map(|&i| &self.sources[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// True only for sources that exist and are enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|s| s.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// All source names, in document order.
    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    /// Enabled source names, in document order.
    pub fn enabled_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Enabled sources advertising the given capability.
    pub fn by_capability(&self, capability: &str) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.enabled && s.has_capability(capability))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Enabled sources of the given kind.
    pub fn by_kind(&self, kind: SourceKind) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.enabled && s.kind == kind)
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Topic rule: when the topic matches a query, route to `sources` in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub topic: String,
    pub sources: Vec<String>,
}

impl RoutingRule {
    pub fn new<I, S>(topic: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topic: topic.into(),
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    /// Keywords derived from the topic: `current_events` → `current`, `events`.
    pub fn keywords(&self) -> Vec<String> {
        self.topic
            .to_lowercase()
            .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Case-insensitive substring match of any keyword against the query.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.keywords().iter().any(|k| query.contains(k.as_str()))
    }
}

/// Selection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub default_source: String,
    pub strategy: RoutingStrategy,
    /// Tried in order when the sole source of a Manual/Auto request fails.
    pub fallback_sources: Vec<String>,
    /// Scanned in document order under Auto and Multi.
    pub rules: Vec<RoutingRule>,
}

impl RoutingConfig {
    pub fn new(default_source: impl Into<String>, strategy: RoutingStrategy) -> Self {
        Self {
            default_source: default_source.into(),
            strategy,
            fallback_sources: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_fallbacks<I, S>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_sources = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Every referenced source name must exist in the registry.
    pub fn validate(&self, registry: &SourceRegistry) -> ConfigResult<()> {
        if !registry.contains(&self.default_source) {
            return Err(ConfigError::DanglingReference {
                context: "defaultSource".to_string(),
                name: self.default_source.clone(),
            });
        }
        for name in &self.fallback_sources {
            if !registry.contains(name) {
                return Err(ConfigError::DanglingReference {
                    context: "fallbackSources".to_string(),
                    name: name.clone(),
                });
            }
        }
        for rule in &self.rules {
            for name in &rule.sources {
                if !registry.contains(name) {
                    return Err(ConfigError::DanglingReference {
                        context: format!("routing rule '{}'", rule.topic),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rules whose topic matches the query, in document order.
    pub fn matching_rules<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a RoutingRule> {
        self.rules.iter().filter(move |r| r.matches(query))
    }
}
