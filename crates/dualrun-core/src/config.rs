//! Options and configuration for dual operations
//!
//! [`DualOperationOptions`] is the per-call policy. [`FacadeConfig`] is the
//! file-backed form: adapter name, default options and per-operation
//! overrides, loadable from TOML or JSON.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default per-path deadline
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Which implementation a path runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationPath {
    /// The implementation being migrated away from
    Legacy,
    /// The implementation being migrated to
    New,
}

impl ImplementationPath {
    /// Stable label for logs and metric tags
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::New => "new",
        }
    }

    /// The other path
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Legacy => Self::New,
            Self::New => Self::Legacy,
        }
    }
}

impl std::fmt::Display for ImplementationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call policy for a dual operation
///
/// Unknown keys in a config source are ignored. Both snake_case and the
/// camelCase spellings `preferenceLegacy` / `timeoutMs` are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualOperationOptions {
    /// Return the legacy result when true, the new result otherwise
    #[serde(alias = "preferenceLegacy")]
    pub prefer_legacy: bool,
    /// Deadline applied to each path independently
    #[serde(alias = "timeoutMs")]
    pub timeout_ms: u64,
}

impl DualOperationOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With result preference
    #[inline]
    #[must_use]
    pub fn with_prefer_legacy(mut self, prefer_legacy: bool) -> Self {
        self.prefer_legacy = prefer_legacy;
        self
    }

    /// With per-path deadline in milliseconds
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Per-path deadline
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Path whose outcome the caller sees
    #[inline]
    #[must_use]
    pub fn primary(&self) -> ImplementationPath {
        if self.prefer_legacy {
            ImplementationPath::Legacy
        } else {
            ImplementationPath::New
        }
    }

    /// Path that only feeds metrics
    #[inline]
    #[must_use]
    pub fn shadow(&self) -> ImplementationPath {
        self.primary().other()
    }

    /// Reject options that cannot run
    ///
    /// # Errors
    /// - `ConfigError::InvalidTimeout` if `timeout_ms` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_ms));
        }
        Ok(())
    }
}

impl Default for DualOperationOptions {
    fn default() -> Self {
        Self {
            prefer_legacy: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Per-operation override layered over [`FacadeConfig::defaults`]
///
/// Fields left unset inherit the configured defaults, not the built-in ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationOverride {
    /// Result preference for this operation
    #[serde(alias = "preferenceLegacy", skip_serializing_if = "Option::is_none")]
    pub prefer_legacy: Option<bool>,
    /// Per-path deadline for this operation
    #[serde(alias = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl OperationOverride {
    /// Create empty override
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With result preference
    #[inline]
    #[must_use]
    pub fn with_prefer_legacy(mut self, prefer_legacy: bool) -> Self {
        self.prefer_legacy = Some(prefer_legacy);
        self
    }

    /// With per-path deadline in milliseconds
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Fill unset fields from `defaults`
    #[must_use]
    pub fn resolve(&self, defaults: DualOperationOptions) -> DualOperationOptions {
        DualOperationOptions {
            prefer_legacy: self.prefer_legacy.unwrap_or(defaults.prefer_legacy),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
        }
    }
}

impl From<DualOperationOptions> for OperationOverride {
    fn from(options: DualOperationOptions) -> Self {
        Self {
            prefer_legacy: Some(options.prefer_legacy),
            timeout_ms: Some(options.timeout_ms),
        }
    }
}

/// File-backed adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Namespace for metrics and logs
    pub adapter_name: String,
    /// Options used when an operation has no override
    pub defaults: DualOperationOptions,
    /// Per-operation overrides, keyed by operation name
    pub operations: BTreeMap<String, OperationOverride>,
}

impl FacadeConfig {
    /// Create config with default options and no overrides
    #[must_use]
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            ..Self::default()
        }
    }

    /// With default options
    #[must_use]
    pub fn with_defaults(mut self, defaults: DualOperationOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// With an override for one operation
    ///
    /// Passing full [`DualOperationOptions`] pins every field; an
    /// [`OperationOverride`] pins only the fields it sets.
    #[must_use]
    pub fn with_operation(
        mut self,
        operation: impl Into<String>,
        overrides: impl Into<OperationOverride>,
    ) -> Self {
        self.operations.insert(operation.into(), overrides.into());
        self
    }

    /// Resolve the options for `operation`: override fields first, then
    /// `defaults`
    #[must_use]
    pub fn options_for(&self, operation: &str) -> DualOperationOptions {
        self.operations
            .get(operation)
            .map_or(self.defaults, |overrides| overrides.resolve(self.defaults))
    }

    /// Validate adapter name, defaults and every override
    ///
    /// # Errors
    /// - `ConfigError::EmptyAdapterName` for a blank adapter name
    /// - `ConfigError::InvalidTimeout` for bad defaults
    /// - `ConfigError::InvalidOverride` naming the first bad override
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter_name.trim().is_empty() {
            return Err(ConfigError::EmptyAdapterName);
        }
        self.defaults.validate()?;
        for (operation, overrides) in &self.operations {
            if operation.trim().is_empty() {
                return Err(ConfigError::EmptyOperationName);
            }
            overrides
                .resolve(self.defaults)
                .validate()
                .map_err(|source| ConfigError::InvalidOverride {
                    operation: operation.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Toml` if the document does not parse
    /// - any error from [`FacadeConfig::validate`]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    /// - `ConfigError::Json` if the document does not parse
    /// - any error from [`FacadeConfig::validate`]
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::UnsupportedFormat` for any other extension
    /// - parse and validation errors
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&source)?,
            Some("json") => Self::from_json_str(&source)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        tracing::debug!(
            path = %path.display(),
            adapter = %config.adapter_name,
            overrides = config.operations.len(),
            "Loaded facade config"
        );
        Ok(config)
    }
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            adapter_name: "default".to_string(),
            defaults: DualOperationOptions::default(),
            operations: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_prefer_legacy_with_positive_timeout() {
        let options = DualOperationOptions::default();
        assert!(options.prefer_legacy);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(options.primary(), ImplementationPath::Legacy);
        assert_eq!(options.shadow(), ImplementationPath::New);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn prefer_new_swaps_paths() {
        let options = DualOperationOptions::new().with_prefer_legacy(false);
        assert_eq!(options.primary(), ImplementationPath::New);
        assert_eq!(options.shadow(), ImplementationPath::Legacy);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let options = DualOperationOptions::new().with_timeout_ms(0);
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidTimeout(0))
        ));
    }

    #[test]
    fn camel_case_keys_and_unknown_keys() {
        let options: DualOperationOptions = serde_json::from_str(
            r#"{"preferenceLegacy": false, "timeoutMs": 100, "compareResults": true}"#,
        )
        .unwrap();
        assert_eq!(
            options,
            DualOperationOptions {
                prefer_legacy: false,
                timeout_ms: 100,
            }
        );
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let options: DualOperationOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, DualOperationOptions::default());
    }

    #[test]
    fn negative_timeout_in_source_is_a_config_error() {
        let err = FacadeConfig::from_json_str(r#"{"defaults": {"timeoutMs": -1}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn toml_with_overrides() {
        let config = FacadeConfig::from_toml_str(
            r#"
            adapter_name = "billing"

            [defaults]
            timeout_ms = 250

            [operations.get_invoice]
            prefer_legacy = false
            timeout_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.adapter_name, "billing");
        assert_eq!(config.options_for("list_invoices").timeout_ms, 250);
        assert!(config.options_for("list_invoices").prefer_legacy);

        let overridden = config.options_for("get_invoice");
        assert!(!overridden.prefer_legacy);
        assert_eq!(overridden.timeout_ms, 100);
    }

    #[test]
    fn partial_override_inherits_configured_defaults() {
        let config = FacadeConfig::from_toml_str(
            r#"
            [defaults]
            timeout_ms = 250

            [operations.get_user]
            prefer_legacy = false

            [operations.list_users]
            timeoutMs = 80
            "#,
        )
        .unwrap();

        assert_eq!(
            config.options_for("get_user"),
            DualOperationOptions {
                prefer_legacy: false,
                timeout_ms: 250,
            }
        );
        assert_eq!(
            config.options_for("list_users"),
            DualOperationOptions {
                prefer_legacy: true,
                timeout_ms: 80,
            }
        );
    }

    #[test]
    fn override_builder_keeps_unset_fields_open() {
        let config = FacadeConfig::new("users")
            .with_defaults(DualOperationOptions::new().with_timeout_ms(300))
            .with_operation("get_user", OperationOverride::new().with_prefer_legacy(false));

        let options = config.options_for("get_user");
        assert_eq!(options.primary(), ImplementationPath::New);
        assert_eq!(options.timeout_ms, 300);
    }

    #[test]
    fn zero_timeout_override_is_rejected() {
        let err = FacadeConfig::from_toml_str(
            r#"
            [operations.get_user]
            timeout_ms = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidOverride { ref operation, .. } if operation == "get_user"
        ));
    }

    #[test]
    fn bad_override_names_the_operation() {
        let err = FacadeConfig::new("billing")
            .with_operation("get_invoice", DualOperationOptions::new().with_timeout_ms(0))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("get_invoice"));
    }

    #[test]
    fn blank_adapter_name_is_rejected() {
        let err = FacadeConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAdapterName));
    }

    #[test]
    fn load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facade.yaml");
        std::fs::write(&path, "adapter_name: x").unwrap();
        assert!(matches!(
            FacadeConfig::load(&path),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"
        ));
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facade.json");
        std::fs::write(
            &path,
            r#"{"adapter_name": "users", "defaults": {"preferenceLegacy": false}}"#,
        )
        .unwrap();

        let config = FacadeConfig::load(&path).unwrap();
        assert_eq!(config.adapter_name, "users");
        assert_eq!(config.defaults.primary(), ImplementationPath::New);
        assert_eq!(config.defaults.timeout_ms, DEFAULT_TIMEOUT_MS);
    }
}
