//! Runtime configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) yields a usable [`RuntimeConfig`].

use crate::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub privacy: PrivacyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> SandboxResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(raw: &str) -> SandboxResult<Self> {
        let config: RuntimeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SandboxResult<()> {
        self.sandbox.validate()?;
        if self.tools.default_search_limit == 0 {
            return Err(SandboxError::Config(
                "tools.default_search_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Limits and permissions applied to every sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Ceiling on the estimated heap held by script values.
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: usize,

    /// Captured stdout/stderr are truncated beyond this many bytes.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Longer submissions are rejected by the validator.
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,

    #[serde(default)]
    pub allow_network: bool,

    #[serde(default)]
    pub allow_file_write: bool,

    /// Modules that `import` may resolve.
    #[serde(default = "default_allowed_imports")]
    pub allowed_imports: Vec<String>,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn allow_import(mut self, module: &str) -> Self {
        if !self.allowed_imports.iter().any(|m| m == module) {
            self.allowed_imports.push(module.to_string());
        }
        self
    }

    pub fn validate(&self) -> SandboxResult<()> {
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(SandboxError::Config(
                "sandbox.timeout_secs must be a positive number".to_string(),
            ));
        }
        if self.memory_limit_bytes == 0 {
            return Err(SandboxError::Config(
                "sandbox.memory_limit_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config(
                "sandbox.max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_code_length == 0 {
            return Err(SandboxError::Config(
                "sandbox.max_code_length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            memory_limit_bytes: default_memory_limit(),
            max_output_bytes: default_max_output(),
            max_code_length: default_max_code_length(),
            allow_network: false,
            allow_file_write: false,
            allowed_imports: default_allowed_imports(),
        }
    }
}

fn default_timeout_secs() -> f64 {
    30.0
}

fn default_memory_limit() -> usize {
    256 * 1024 * 1024
}

fn default_max_output() -> usize {
    64 * 1024
}

fn default_max_code_length() -> usize {
    100_000
}

fn default_allowed_imports() -> Vec<String> {
    vec![
        "math".to_string(),
        "json".to_string(),
        "statistics".to_string(),
    ]
}

/// Capability discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory holding one subdirectory per provider.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            root: None,
            default_search_limit: default_search_limit(),
        }
    }
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub preserve_format: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preserve_format: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(config.sandbox.timeout(), Duration::from_secs(30));
        assert_eq!(config.sandbox.allowed_imports, vec!["math", "json", "statistics"]);
        assert_eq!(config.tools.default_search_limit, 10);
        assert!(config.privacy.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
            [sandbox]
            timeout_secs = 2.5
            allow_network = true
            allowed_imports = ["math"]

            [tools]
            root = "/srv/tools"

            [privacy]
            preserve_format = false
        "#;
        let config = RuntimeConfig::from_toml(raw).unwrap();
        assert_eq!(config.sandbox.timeout(), Duration::from_millis(2500));
        assert!(config.sandbox.allow_network);
        assert_eq!(config.sandbox.allowed_imports, vec!["math"]);
        assert_eq!(config.tools.root, Some(PathBuf::from("/srv/tools")));
        assert!(!config.privacy.preserve_format);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = RuntimeConfig::from_toml("[sandbox]\nmemory_limit_bytes = 0\n").unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));

        let err = RuntimeConfig::from_toml("[sandbox]\ntimeout_secs = 0.0\n").unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_toml_error() {
        let err = RuntimeConfig::from_toml("[sandbox\n").unwrap_err();
        assert!(matches!(err, SandboxError::TomlError(_)));
    }
}
