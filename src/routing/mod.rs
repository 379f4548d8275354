//! Query routing: turn a [`Query`] into an ordered list of enabled sources.
//!
//! Resolution order:
//! 1. explicit `requested_sources`, intersected with enabled sources
//! 2. Manual: `default_source` alone
//! 3. Auto: first matching rule with an enabled source, else `default_source`
//! 4. Multi: matching rules plus capability matches, else `fallback_sources`
//!
//! Matching is a case-insensitive keyword scan of the query text. The output
//! order is always the order of the rule, registry, or fallback list it was
//! taken from.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::registry::{normalize_tag, RoutingConfig, RoutingStrategy, SourceRegistry};

/// One retrieval request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Explicit override; takes precedence over every strategy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_strategy: Option<RoutingStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.requested_strategy = Some(strategy);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// The router's answer for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Enabled sources to call, in deterministic order.
    pub sources: Vec<String>,
    /// The strategy in effect for this request.
    pub strategy: RoutingStrategy,
}

impl Resolution {
    /// Whether a failure of the sole source may consult the fallback chain.
    pub fn allows_fallback(&self) -> bool {
        self.sources.len() == 1
            && matches!(
                self.strategy,
                RoutingStrategy::Manual | RoutingStrategy::Auto
            )
    }
}

/// Stateless resolver over a registry and routing policy.
pub struct Router<'a> {
    registry: &'a SourceRegistry,
    routing: &'a RoutingConfig,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a SourceRegistry, routing: &'a RoutingConfig) -> Self {
        Self { registry, routing }
    }

    /// Resolve a query to an ordered, non-empty list of enabled sources.
    pub fn resolve(&self, query: &Query) -> DispatchResult<Resolution> {
        let strategy = query.requested_strategy.unwrap_or(self.routing.strategy);

        let sources = if !query.requested_sources.is_empty() {
            self.requested(&query.requested_sources)?
        } else {
            match strategy {
                RoutingStrategy::Manual => self.manual()?,
                RoutingStrategy::Auto => self.auto(&query.text)?,
                RoutingStrategy::Multi => self.multi(&query.text)?,
            }
        };

        debug!(
            strategy = strategy.as_str(),
            sources = ?sources,
            "Query resolved"
        );

        Ok(Resolution { sources, strategy })
    }

    fn requested(&self, requested: &[String]) -> DispatchResult<Vec<String>> {
        let sources = self.enabled_unique(requested.iter());
        if sources.is_empty() {
            return Err(DispatchError::NoEligibleSource {
                reason: format!(
                    "none of the requested sources are enabled: {}",
                    requested.join(", ")
                ),
            });
        }
        Ok(sources)
    }

    fn manual(&self) -> DispatchResult<Vec<String>> {
        self.default_only()
    }

    fn auto(&self, text: &str) -> DispatchResult<Vec<String>> {
        // A matching rule whose sources are all disabled does not stop the scan.
        for rule in self.routing.matching_rules(text) {
            let sources = self.enabled_unique(rule.sources.iter());
            if !sources.is_empty() {
                return Ok(sources);
            }
        }
        self.default_only()
    }

    fn multi(&self, text: &str) -> DispatchResult<Vec<String>> {
        let matched: Vec<_> = self.routing.matching_rules(text).collect();

        let mut candidates: Vec<&String> = matched.iter().flat_map(|r| r.sources.iter()).collect();
        let topics: Vec<String> = matched.iter().map(|r| normalize_tag(&r.topic)).collect();
        candidates.extend(
            self.registry
                .iter()
                .filter(|s| topics.iter().any(|t| s.has_capability(t)))
                .map(|s| &s.name),
        );

        let sources = self.enabled_unique(candidates.into_iter());
        if !sources.is_empty() {
            return Ok(sources);
        }

        let fallbacks = self.enabled_unique(self.routing.fallback_sources.iter());
        if fallbacks.is_empty() {
            return Err(DispatchError::NoEligibleSource {
                reason: "no rule or capability matched and no fallback source is enabled"
                    .to_string(),
            });
        }
        Ok(fallbacks)
    }

    fn default_only(&self) -> DispatchResult<Vec<String>> {
        let default = &self.routing.default_source;
        if self.registry.is_enabled(default) {
            Ok(vec![default.clone()])
        } else {
            Err(DispatchError::NoEligibleSource {
                reason: format!("default source '{}' is disabled", default),
            })
        }
    }

    /// Keep enabled names only, first occurrence wins.
    fn enabled_unique<'n>(&self, names: impl Iterator<Item = &'n String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            if self.registry.is_enabled(name) && !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RoutingRule, SourceConfig, SourceKind};
    use pretty_assertions::assert_eq;

    fn registry() -> SourceRegistry {
        SourceRegistry::new(vec![
            SourceConfig::new("llama", SourceKind::LocalModel, "http://l")
                .with_capabilities(["general"]),
            SourceConfig::new("wiki", SourceKind::Encyclopedic, "http://w")
                .with_capabilities(["factual"]),
            SourceConfig::new("wikidata", SourceKind::KnowledgeGraph, "http://kg")
                .with_capabilities(["factual"]),
            SourceConfig::new("news", SourceKind::News, "http://n")
                .with_capabilities(["current-events"])
                .disabled(),
            SourceConfig::new("ddg", SourceKind::WebSearch, "http://d")
                .with_capabilities(["current-events", "general"]),
            SourceConfig::new("arxiv", SourceKind::PaperIndex, "http://a")
                .with_capabilities(["research"]),
        ])
        .unwrap()
    }

    fn routing(strategy: RoutingStrategy) -> RoutingConfig {
        RoutingConfig::new("llama", strategy)
            .with_fallbacks(["ddg", "wiki"])
            .with_rule(RoutingRule::new("current_events", ["news", "ddg"]))
            .with_rule(RoutingRule::new("factual", ["wiki", "wikidata"]))
            .with_rule(RoutingRule::new("research", ["arxiv", "wiki"]))
    }

    fn resolve(strategy: RoutingStrategy, query: Query) -> DispatchResult<Resolution> {
        let registry = registry();
        let routing = routing(strategy);
        Router::new(&registry, &routing).resolve(&query)
    }

    #[test]
    fn test_manual_uses_default_only() {
        let r = resolve(RoutingStrategy::Manual, Query::new("factual research")).unwrap();
        assert_eq!(r.sources, vec!["llama"]);
        assert!(r.allows_fallback());
    }

    #[test]
    fn test_requested_sources_override_strategy() {
        let q = Query::new("anything").with_sources(["wiki", "news", "ghost", "wiki", "arxiv"]);
        let r = resolve(RoutingStrategy::Manual, q).unwrap();
        assert_eq!(r.sources, vec!["wiki", "arxiv"]);
        assert_eq!(r.strategy, RoutingStrategy::Manual);
    }

    #[test]
    fn test_requested_sources_all_disabled() {
        let q = Query::new("x").with_sources(["news"]);
        let err = resolve(RoutingStrategy::Auto, q).unwrap_err();
        assert!(matches!(err, DispatchError::NoEligibleSource { .. }));
    }

    #[test]
    fn test_auto_first_matching_rule_filtered() {
        let r = resolve(RoutingStrategy::Auto, Query::new("latest EVENTS in tech")).unwrap();
        assert_eq!(r.sources, vec!["ddg"]);
        assert!(r.allows_fallback());
    }

    #[test]
    fn test_auto_multiple_sources_from_rule() {
        let r = resolve(RoutingStrategy::Auto, Query::new("a factual question")).unwrap();
        assert_eq!(r.sources, vec!["wiki", "wikidata"]);
        assert!(!r.allows_fallback());
    }

    #[test]
    fn test_auto_skips_rule_with_only_disabled_sources() {
        let registry = registry();
        let routing = RoutingConfig::new("llama", RoutingStrategy::Auto)
            .with_rule(RoutingRule::new("news", ["news"]))
            .with_rule(RoutingRule::new("today", ["ddg"]));
        let r = Router::new(&registry, &routing)
            .resolve(&Query::new("news today"))
            .unwrap();
        assert_eq!(r.sources, vec!["ddg"]);
    }

    #[test]
    fn test_auto_no_match_uses_default() {
        let r = resolve(RoutingStrategy::Auto, Query::new("write a poem")).unwrap();
        assert_eq!(r.sources, vec!["llama"]);
    }

    #[test]
    fn test_multi_unions_rules_and_capabilities() {
        let r = resolve(RoutingStrategy::Multi, Query::new("research on current events")).unwrap();
        // Rule order first (current_events, research), then capability matches.
        assert_eq!(r.sources, vec!["ddg", "arxiv", "wiki"]);
        assert!(!r.allows_fallback());
    }

    #[test]
    fn test_multi_no_match_uses_fallbacks() {
        let r = resolve(RoutingStrategy::Multi, Query::new("write a poem")).unwrap();
        assert_eq!(r.sources, vec!["ddg", "wiki"]);
    }

    #[test]
    fn test_multi_without_fallbacks_is_error() {
        let registry = registry();
        let routing = RoutingConfig::new("llama", RoutingStrategy::Multi);
        let err = Router::new(&registry, &routing)
            .resolve(&Query::new("poem"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoEligibleSource { .. }));
    }

    #[test]
    fn test_requested_strategy_overrides_config() {
        let q = Query::new("factual").with_strategy(RoutingStrategy::Manual);
        let r = resolve(RoutingStrategy::Multi, q).unwrap();
        assert_eq!(r.sources, vec!["llama"]);
        assert_eq!(r.strategy, RoutingStrategy::Manual);
    }

    #[test]
    fn test_disabled_default_is_no_eligible_source() {
        let registry = SourceRegistry::new(vec![
            SourceConfig::new("a", SourceKind::WebSearch, "http://a").disabled(),
            SourceConfig::new("b", SourceKind::WebSearch, "http://b"),
        ])
        .unwrap();
        let routing = RoutingConfig::new("a", RoutingStrategy::Manual);
        let err = Router::new(&registry, &routing)
            .resolve(&Query::new("x"))
            .unwrap_err();
        assert!(err.to_string().contains("'a' is disabled"));
    }

    #[test]
    fn test_query_builders() {
        let q = Query::new("hello")
            .with_sources(["a"])
            .with_strategy(RoutingStrategy::Multi)
            .with_session("s1");
        assert_eq!(q.requested_sources, vec!["a"]);
        assert_eq!(q.requested_strategy, Some(RoutingStrategy::Multi));
        assert_eq!(q.session_id.as_deref(), Some("s1"));
    }
}
