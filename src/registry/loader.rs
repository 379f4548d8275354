//! Configuration document loading and validation.
//!
//! Validation runs in a fixed order and stops at the first structural error:
//! placeholder substitution, required fields, enum membership, numeric
//! ranges, referential integrity, then credential resolution. A missing
//! credential never fails the load; it disables the source with a warning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::secrets::{placeholder_name, substitute};
use super::{
    Credential, RoutingConfig, RoutingRule, RoutingStrategy, SecretProvider, SourceConfig,
    SourceKind, SourceRegistry,
};
use crate::error::{ConfigError, ConfigResult};

/// Fields that carry credentials. They are never substituted in place.
const CREDENTIAL_FIELDS: &[&str] = &["credentialRef", "credential_ref", "api_key", "apiKey"];

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub registry: SourceRegistry,
    pub routing: RoutingConfig,
    /// Non-fatal problems, one per auto-disabled source.
    pub warnings: Vec<LoadWarning>,
}

/// A non-fatal load problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadWarning {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    #[serde(alias = "servers")]
    sources: Option<Map<String, Value>>,
    #[serde(alias = "default_source", alias = "default_server")]
    default_source: Option<String>,
    #[serde(alias = "server_selection_strategy")]
    strategy: Option<String>,
    #[serde(default, alias = "fallback_sources", alias = "fallback_servers")]
    fallback_sources: Vec<String>,
    #[serde(alias = "routing_rules")]
    rules: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    #[serde(alias = "type")]
    kind: Option<String>,
    #[serde(alias = "url")]
    endpoint: Option<String>,
    enabled: Option<bool>,
    #[serde(alias = "timeout", alias = "timeout_seconds")]
    timeout_seconds: Option<f64>,
    #[serde(alias = "max_tokens", alias = "max_output_tokens")]
    max_output_tokens: Option<i64>,
    temperature: Option<f64>,
    model: Option<String>,
    #[serde(alias = "max_results")]
    max_results: Option<i64>,
    #[serde(alias = "credential_ref", alias = "api_key", alias = "apiKey")]
    credential_ref: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Load and validate a configuration document from disk.
pub fn load_file(path: &Path, secrets: &dyn SecretProvider) -> ConfigResult<LoadedConfig> {
    let content = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), "Loading source configuration");
    load_str(&content, secrets)
}

/// Load and validate a configuration document.
pub fn load_str(content: &str, secrets: &dyn SecretProvider) -> ConfigResult<LoadedConfig> {
    let mut document: Value = serde_json::from_str(content)?;
    resolve_placeholders(&mut document, "document", secrets)?;
    let raw: RawDocument = serde_json::from_value(document)?;

    // Required fields
    let raw_sources = raw.sources.ok_or_else(|| ConfigError::MissingField {
        context: "configuration document".to_string(),
        field: "sources".to_string(),
    })?;
    let default_source = raw.default_source.ok_or_else(|| ConfigError::MissingField {
        context: "configuration document".to_string(),
        field: "defaultSource".to_string(),
    })?;

    let mut parsed = Vec::with_capacity(raw_sources.len());
    for (name, value) in raw_sources {
        let source: RawSource = serde_json::from_value(value)?;
        let context = format!("source '{}'", name);
        let endpoint = source
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingField {
                context: context.clone(),
                field: "endpoint".to_string(),
            })?;
        if source.kind.is_none() && name.parse::<SourceKind>().is_err() {
            return Err(ConfigError::MissingField {
                context,
                field: "kind".to_string(),
            });
        }
        parsed.push((name, endpoint, source));
    }

    let mut rules = Vec::new();
    for (topic, value) in raw.rules.unwrap_or_default() {
        let sources: Vec<String> = serde_json::from_value(value)?;
        rules.push(RoutingRule { topic, sources });
    }

    // Enum membership
    let mut kinds = Vec::with_capacity(parsed.len());
    for (name, _, source) in &parsed {
        let declared = source.kind.as_deref().unwrap_or(name);
        let kind = declared
            .parse::<SourceKind>()
            .map_err(|_| ConfigError::UnknownKind {
                source_name: name.clone(),
                value: declared.to_string(),
            })?;
        kinds.push(kind);
    }
    let strategy = match raw.strategy.as_deref() {
        None => RoutingStrategy::default(),
        Some(value) => value
            .parse::<RoutingStrategy>()
            .map_err(|_| ConfigError::UnknownStrategy {
                value: value.to_string(),
            })?,
    };

    // Numeric ranges
    for (name, _, source) in &parsed {
        check_ranges(name, source)?;
    }

    let mut configs = Vec::with_capacity(parsed.len());
    for ((name, endpoint, source), kind) in parsed.into_iter().zip(kinds) {
        let mut config = SourceConfig::new(name, kind, endpoint);
        config.enabled = source.enabled.unwrap_or(true);
        if let Some(timeout) = source
            .timeout_seconds
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            config.timeout = timeout;
        }
        config.max_output_tokens = source.max_output_tokens.map(|v| v as u32);
        config.temperature = source.temperature;
        config.model = source.model;
        config.max_results = source.max_results.map(|v| v as u32);
        config.credential_ref = source.credential_ref;
        config.capabilities = source.capabilities;
        config.description = source.description.unwrap_or_default();
        configs.push(config);
    }

    // Referential integrity
    let routing = RoutingConfig {
        default_source,
        strategy,
        fallback_sources: raw.fallback_sources,
        rules,
    };
    let names: Vec<SourceConfig> = configs.clone();
    routing.validate(&SourceRegistry::new(names)?)?;

    // Credential resolution
    let mut warnings = Vec::new();
    for config in &mut configs {
        if let Some(warning) = resolve_credential(config, secrets)? {
            warn!(
                source = %warning.source,
                kind = %config.kind,
                "{}",
                warning.message
            );
            warnings.push(warning);
        }
    }

    let registry = SourceRegistry::new(configs)?;
    info!(
        sources = registry.len(),
        enabled = registry.enabled_names().len(),
        strategy = %routing.strategy,
        default_source = %routing.default_source,
        "Source registry loaded"
    );

    Ok(LoadedConfig {
        registry,
        routing,
        warnings,
    })
}

/// Substitute `${VAR}` in every string of the document except credential fields.
fn resolve_placeholders(
    value: &mut Value,
    context: &str,
    secrets: &dyn SecretProvider,
) -> ConfigResult<()> {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute(s, secrets).map_err(|var| ConfigError::UnresolvedPlaceholder {
                    context: context.to_string(),
                    var,
                })?;
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item, context, secrets)?;
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if CREDENTIAL_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                resolve_placeholders(item, &format!("{}.{}", context, key), secrets)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_ranges(name: &str, source: &RawSource) -> ConfigResult<()> {
    let out_of_range = |field: &str, message: &str| ConfigError::OutOfRange {
        source_name: name.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    };

    if let Some(secs) = source.timeout_seconds {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(out_of_range("timeoutSeconds", "must be greater than 0"));
        }
        if Duration::try_from_secs_f64(secs).is_err() {
            return Err(out_of_range("timeoutSeconds", "is too large"));
        }
    }
    if let Some(temperature) = source.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(out_of_range("temperature", "must be between 0 and 2"));
        }
    }
    if let Some(tokens) = source.max_output_tokens {
        if tokens <= 0 || tokens > i64::from(u32::MAX) {
            return Err(out_of_range("maxOutputTokens", "must be a positive integer"));
        }
    }
    if let Some(results) = source.max_results {
        if results <= 0 || results > i64::from(u32::MAX) {
            return Err(out_of_range("maxResults", "must be a positive integer"));
        }
    }
    Ok(())
}

/// Resolve the credential reference of one source.
///
/// Literal secrets are a hard error. An unresolvable reference on a kind that
/// requires a credential disables the source and yields a warning.
fn resolve_credential(
    config: &mut SourceConfig,
    secrets: &dyn SecretProvider,
) -> ConfigResult<Option<LoadWarning>> {
    let var = match config.credential_ref.as_deref() {
        Some(reference) => Some(
            placeholder_name(reference)
                .ok_or_else(|| ConfigError::LiteralSecret {
                    source_name: config.name.clone(),
                    field: "credentialRef".to_string(),
                })?
                .to_string(),
        ),
        None => None,
    };
    config.credential_ref = var.clone();

    let resolved = var.as_deref().and_then(|v| secrets.resolve(v));
    match resolved {
        Some(value) => {
            config.credential = Some(Credential::new(value));
            Ok(None)
        }
        None if config.kind.requires_credential() => {
            let message = match &var {
                Some(v) => format!(
                    "Credential '{}' is not set; source disabled",
                    v
                ),
                None => "No credentialRef configured; source disabled".to_string(),
            };
            let was_enabled = config.enabled;
            config.enabled = false;
            config.disabled_reason = Some(message.clone());
            if was_enabled {
                Ok(Some(LoadWarning {
                    source: config.name.clone(),
                    message,
                }))
            } else {
                Ok(None)
            }
        }
        None => {
            if let Some(v) = &var {
                debug!(source = %config.name, credential = %v, "Optional credential not set");
            }
            Ok(None)
        }
    }
}
