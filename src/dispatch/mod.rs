//! Bounded-concurrency execution of resolved sources.
//!
//! One process-wide [`Semaphore`] caps outbound calls across every request.
//! Each resolved source becomes a unit that acquires a permit, calls its
//! handler under the source's own timeout, and drops the permit on every exit
//! path. Units of one request are awaited jointly with `join_all` and are not
//! spawned, so dropping the request future cancels all of them.
//!
//! ```text
//! Pending ──acquire──► Running ──► Succeeded | TimedOut | Failed
//! ```

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{
    DispatchError, DispatchResult, SourceError, SourceFailure, SourceResult,
};
use crate::registry::{RoutingConfig, RoutingStrategy, SourceRegistry};
use crate::routing::{Query, Resolution, Router};
use crate::sources::{within, HandlerTable};

/// Lifecycle of one dispatched unit. Terminal states are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Running,
    Succeeded,
    TimedOut,
    Failed,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::Running => "running",
            UnitState::Succeeded => "succeeded",
            UnitState::TimedOut => "timed_out",
            UnitState::Failed => "failed",
        }
    }

    /// Terminal state for a finished call.
    pub fn from_result<T>(result: &SourceResult<T>) -> Self {
        match result {
            Ok(_) => UnitState::Succeeded,
            Err(SourceError::Timeout { .. }) => UnitState::TimedOut,
            Err(_) => UnitState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Succeeded | UnitState::TimedOut | UnitState::Failed
        )
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text returned by one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    pub source: String,
    pub text: String,
}

/// Successful payload of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Exactly one source was resolved (possibly answered by a fallback).
    Single { source: String, text: String },
    /// Several sources were resolved; entries follow the resolved order and
    /// failed sources are omitted.
    Multi { results: Vec<SourceText> },
}

/// Result of one request: the payload plus the failures that did not abort it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub strategy: RoutingStrategy,
    pub payload: Payload,
    /// Sources that were attempted and failed.
    #[serde(default)]
    pub errors: Vec<SourceFailure>,
    /// Every source actually called, fallbacks included, in call order.
    pub attempted: Vec<String>,
}

impl QueryOutcome {
    /// The single text payload, if this is a single-source outcome.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Single { text, .. } => Some(text),
            Payload::Multi { .. } => None,
        }
    }

    /// Text returned by the named source, if it succeeded.
    pub fn get(&self, source: &str) -> Option<&str> {
        match &self.payload {
            Payload::Single { source: s, text } if s == source => Some(text),
            Payload::Single { .. } => None,
            Payload::Multi { results } => results
                .iter()
                .find(|r| r.source == source)
                .map(|r| r.text.as_str()),
        }
    }

    /// Names of the sources that answered, in payload order.
    pub fn succeeded(&self) -> Vec<&str> {
        match &self.payload {
            Payload::Single { source, .. } => vec![source.as_str()],
            Payload::Multi { results } => results.iter().map(|r| r.source.as_str()).collect(),
        }
    }

    /// Whether the named source was attempted and failed.
    pub fn failed(&self, source: &str) -> bool {
        self.errors.iter().any(|f| f.source == source)
    }

    /// Plain-text rendering used for session history and the CLI.
    pub fn render(&self) -> String {
        match &self.payload {
            Payload::Single { text, .. } => text.clone(),
            Payload::Multi { results } => results
                .iter()
                .map(|r| format!("[{}]\n{}", r.source, r.text))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Executes queries against the registry under the global concurrency budget.
pub struct Dispatcher {
    registry: Arc<SourceRegistry>,
    routing: Arc<RoutingConfig>,
    handlers: HandlerTable,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher with its own semaphore sized from configuration.
    pub fn new(
        registry: Arc<SourceRegistry>,
        routing: Arc<RoutingConfig>,
        handlers: HandlerTable,
        config: &DispatchConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self::with_semaphore(registry, routing, handlers, semaphore)
    }

    /// Create a dispatcher that shares an existing concurrency budget.
    pub fn with_semaphore(
        registry: Arc<SourceRegistry>,
        routing: Arc<RoutingConfig>,
        handlers: HandlerTable,
        semaphore: Arc<Semaphore>,
    ) -> Self {
        Self {
            registry,
            routing,
            handlers,
            semaphore,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Permits currently free in the global budget.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Resolve a query without executing it.
    pub fn resolve(&self, query: &Query) -> DispatchResult<Resolution> {
        Router::new(&self.registry, &self.routing).resolve(query)
    }

    /// Validate, route and execute one query.
    pub async fn search(&self, query: &Query) -> DispatchResult<QueryOutcome> {
        let text = query.text.trim();
        if text.is_empty() {
            return Err(DispatchError::EmptyQuery);
        }
        let resolution = self.resolve(query)?;
        self.execute(&resolution, text).await
    }

    /// Call every resolved source concurrently and merge the results in
    /// resolved order.
    pub async fn execute(
        &self,
        resolution: &Resolution,
        text: &str,
    ) -> DispatchResult<QueryOutcome> {
        if resolution.sources.is_empty() {
            return Err(DispatchError::NoEligibleSource {
                reason: "resolution contains no sources".to_string(),
            });
        }

        let results = join_all(
            resolution
                .sources
                .iter()
                .map(|name| self.run_unit(name, text)),
        )
        .await;

        let attempted = resolution.sources.clone();
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in resolution.sources.iter().zip(results) {
            match result {
                Ok(text) => successes.push(SourceText {
                    source: name.clone(),
                    text,
                }),
                Err(e) => failures.push(SourceFailure::new(name.clone(), &e)),
            }
        }

        if successes.is_empty() {
            if resolution.allows_fallback() {
                return self
                    .fallback(resolution.strategy, text, attempted, failures)
                    .await;
            }
            return Err(DispatchError::AllSourcesFailed { failures });
        }

        let payload = if resolution.sources.len() == 1 {
            let SourceText { source, text } = successes.remove(0);
            Payload::Single { source, text }
        } else {
            Payload::Multi { results: successes }
        };

        Ok(QueryOutcome {
            strategy: resolution.strategy,
            payload,
            errors: failures,
            attempted,
        })
    }

    /// Walk the fallback chain one source at a time until one answers.
    async fn fallback(
        &self,
        strategy: RoutingStrategy,
        text: &str,
        mut attempted: Vec<String>,
        mut failures: Vec<SourceFailure>,
    ) -> DispatchResult<QueryOutcome> {
        for name in &self.routing.fallback_sources {
            if attempted.contains(name) || !self.registry.is_enabled(name) {
                continue;
            }

            warn!(
                failed = ?attempted,
                fallback = %name,
                "Source failed, trying fallback"
            );
            attempted.push(name.clone());

            match self.run_unit(name, text).await {
                Ok(answer) => {
                    return Ok(QueryOutcome {
                        strategy,
                        payload: Payload::Single {
                            source: name.clone(),
                            text: answer,
                        },
                        errors: failures,
                        attempted,
                    })
                }
                Err(e) => failures.push(SourceFailure::new(name.clone(), &e)),
            }
        }

        Err(DispatchError::AllSourcesFailed { failures })
    }

    /// One unit: permit, handler call under timeout, permit release.
    async fn run_unit(&self, name: &str, text: &str) -> SourceResult<String> {
        let source = self
            .registry
            .get(name)
            .ok_or_else(|| SourceError::Unsupported {
                message: format!("Unknown source '{}'", name),
            })?;

        debug!(source = %name, state = %UnitState::Pending, "Waiting for dispatch slot");
        // Released on drop, including when the request is cancelled.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SourceError::Unsupported {
                message: "dispatcher is shutting down".to_string(),
            })?;

        debug!(
            source = %name,
            kind = %source.kind,
            state = %UnitState::Running,
            timeout_ms = source.timeout.as_millis() as u64,
            "Source request"
        );
        let start = Instant::now();
        let result = within(source.timeout, self.handlers.call(source, text, source.timeout)).await;
        let state = UnitState::from_result(&result);
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(body) => info!(
                source = %name,
                kind = %source.kind,
                state = %state,
                latency_ms,
                bytes = body.len(),
                "Source response"
            ),
            Err(e) => warn!(
                source = %name,
                kind = %source.kind,
                state = %state,
                latency_ms,
                error = %e,
                "Source response"
            ),
        }

        result
    }
}
