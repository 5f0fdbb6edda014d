#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-config** – Layered configuration loading and per-module
//! validation.
//!
//! The YAML document format and its on-disk location are an external
//! concern (§1, "the YAML configuration loader" is named out of scope as a
//! connector-adjacent collaborator); what belongs to the CORE is the
//! validated, already-typed configuration each module receives through its
//! [`ModuleConfig`] at `initialize(context)` time, and the defaulting /
//! error-reporting rules that produce it.
//!
//! Configuration is loaded in layers, lowest to highest precedence:
//! 1. compiled-in defaults (per module, supplied by the module itself),
//! 2. a YAML/TOML file on disk,
//! 3. environment variables prefixed `WARDEN__`, double-underscore
//!    separated (e.g. `WARDEN__MODULES__ANOMALY__SENSITIVITY=3.0`).
//!
//! This mirrors the `config` crate idiom used across the broader
//! ecosystem for layered service configuration.

use std::path::Path;

use serde::de::DeserializeOwned;
use warden_types::Json;

/// Errors raised while loading or validating configuration. Always
/// initialization-time and fatal to the module/load attempt that
/// triggered them — never a runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(String),
    /// A required field was missing from a module's configuration.
    #[error("missing required config field `{0}`")]
    MissingField(String),
    /// A field was present but of the wrong JSON type.
    #[error("config field `{field}` has the wrong type: expected {expected}")]
    InvalidType {
        /// The offending field's dotted path.
        field: String,
        /// What type was expected.
        expected: String,
    },
    /// A regex field failed to compile.
    #[error("config field `{field}` is not a valid regular expression: {message}")]
    InvalidPattern {
        /// The offending field's dotted path.
        field: String,
        /// The underlying regex compiler error.
        message: String,
    },
}

/// The full, merged configuration document, still keyed by module id.
#[derive(Debug, Clone, Default)]
pub struct WardenConfig {
    document: Json,
}

impl WardenConfig {
    /// Loads configuration from `path` (YAML or TOML, detected by
    /// extension) layered under environment variable overrides prefixed
    /// `WARDEN__`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let built = builder.build().map_err(|e| ConfigError::Load(e.to_string()))?;
        let document: Json = built.try_deserialize().map_err(|e| ConfigError::Load(e.to_string()))?;
        Ok(Self { document })
    }

    /// Builds a document directly from an in-memory JSON value — used by
    /// tests and by callers that already have config (e.g. embedding apps).
    pub fn from_json(document: Json) -> Self {
        Self { document }
    }

    /// Extracts the `modules.<module_id>` sub-document as a [`ModuleConfig`].
    /// Missing sub-documents default to an empty object rather than an
    /// error: most modules have entirely optional configuration.
    pub fn module_config(&self, module_id: &str) -> ModuleConfig {
        let value = self
            .document
            .get("modules")
            .and_then(|m| m.get(module_id))
            .cloned()
            .unwrap_or_else(|| Json::Object(Default::default()));
        ModuleConfig::new(module_id, value)
    }
}

/// An already-extracted, per-module configuration mapping.
///
/// This is what `ModuleContext.config` (§4.2) refers to: by the time a
/// module's `initialize` runs, its configuration has already been merged
/// and handed over as one of these, not as a raw file path.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    module_id: String,
    value: Json,
}

impl ModuleConfig {
    /// Wraps `value` as the validated configuration for `module_id`.
    pub fn new(module_id: impl Into<String>, value: Json) -> Self {
        Self { module_id: module_id.into(), value }
    }

    /// An empty configuration (all fields default) for `module_id`.
    pub fn empty(module_id: impl Into<String>) -> Self {
        Self::new(module_id, Json::Object(Default::default()))
    }

    /// The module id this configuration was validated against.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The raw underlying JSON value.
    pub fn as_json(&self) -> &Json {
        &self.value
    }

    /// Deserializes the whole configuration into `T`, applying `T`'s own
    /// `#[serde(default)]` rules for missing fields.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| ConfigError::InvalidType { field: self.module_id.clone(), expected: e.to_string() })
    }

    /// Fetches a required string field.
    pub fn require_str(&self, field: &str) -> Result<String, ConfigError> {
        self.value
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingField(field.to_string()))
    }

    /// Fetches an optional string field.
    pub fn get_str(&self, field: &str) -> Option<String> {
        self.value.get(field).and_then(|v| v.as_str()).map(str::to_string)
    }

    /// Fetches an optional u64 field, falling back to `default`.
    pub fn get_u64_or(&self, field: &str, default: u64) -> u64 {
        self.value.get(field).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    /// Fetches an optional f64 field, falling back to `default`.
    pub fn get_f64_or(&self, field: &str, default: f64) -> f64 {
        self.value.get(field).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    /// Fetches an optional bool field, falling back to `default`.
    pub fn get_bool_or(&self, field: &str, default: bool) -> bool {
        self.value.get(field).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Compiles an optional regex field, case-insensitively.
    pub fn get_regex_ci(&self, field: &str) -> Result<Option<regex_lite::Regex>, ConfigError> {
        match self.value.get(field).and_then(|v| v.as_str()) {
            None => Ok(None),
            Some(pattern) => regex_lite::Regex::new(&format!("(?i){pattern}"))
                .map(Some)
                .map_err(|e| ConfigError::InvalidPattern { field: field.to_string(), message: e.to_string() }),
        }
    }
}

/// Minimal regex re-export boundary so `warden-config` does not force every
/// downstream crate onto a specific regex crate version; engines that need
/// full `regex` crate features (capture groups, `RegexBuilder`) compile
/// their own patterns directly with the `regex` crate and only use this
/// helper for simple validated-at-load-time config fields.
pub mod regex_lite {
    pub use regex::Regex;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_config_extracts_nested_document() {
        let doc = serde_json::json!({
            "modules": {
                "dedup": { "window_ms": 5000, "max_fingerprints": 10000 }
            }
        });
        let cfg = WardenConfig::from_json(doc).module_config("dedup");
        assert_eq!(cfg.get_u64_or("window_ms", 0), 5000);
        assert_eq!(cfg.get_u64_or("max_fingerprints", 0), 10000);
    }

    #[test]
    fn missing_module_defaults_to_empty() {
        let doc = serde_json::json!({ "modules": {} });
        let cfg = WardenConfig::from_json(doc).module_config("missing");
        assert_eq!(cfg.get_u64_or("x", 42), 42);
    }

    #[test]
    fn require_str_errors_on_missing_field() {
        let cfg = ModuleConfig::empty("m");
        assert!(matches!(cfg.require_str("title"), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn invalid_regex_is_reported_at_load_time() {
        let doc = serde_json::json!({ "title_regex": "(" });
        let cfg = ModuleConfig::new("m", doc);
        assert!(matches!(cfg.get_regex_ci("title_regex"), Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn load_from_yaml_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.yaml");
        std::fs::write(&path, "modules:\n  dedup:\n    window_ms: 5000\n").unwrap();

        let cfg = WardenConfig::load(&path).unwrap();
        let dedup = cfg.module_config("dedup");
        assert_eq!(dedup.get_u64_or("window_ms", 0), 5000);
    }
}
