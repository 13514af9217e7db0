//! Engine configuration via `docop.toml`
//!
//! The prefetch and fan-out knobs are owned by the deployment, not by the
//! engine. They are read once from a TOML file (or built programmatically)
//! and shared by every operation through an `Arc<EngineConfig>`.

use crate::error::{DocOpError, DocOpResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed next to the executor's data directory.
pub const CONFIG_FILE_NAME: &str = "docop.toml";

fn default_prefetch_limit() -> u64 {
    1024
}

fn default_backward_prefetch_scale_factor() -> f64 {
    0.0625
}

fn default_request_limit() -> usize {
    1024
}

fn default_max_index_nesting_depth() -> usize {
    8
}

/// Engine configuration loaded from `docop.toml`.
///
/// # Example
///
/// ```toml
/// prefetch_limit = 1024
/// backward_prefetch_scale_factor = 0.0625
/// request_limit = 1024
/// max_index_nesting_depth = 8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default number of rows a physical read asks for per round.
    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: u64,
    /// Multiplier applied to `prefetch_limit` for backward scans.
    #[serde(default = "default_backward_prefetch_scale_factor")]
    pub backward_prefetch_scale_factor: f64,
    /// Maximum number of physical sub-operations active in one round.
    #[serde(default = "default_request_limit")]
    pub request_limit: usize,
    /// Bound on the nested index-request chain.
    #[serde(default = "default_max_index_nesting_depth")]
    pub max_index_nesting_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefetch_limit: default_prefetch_limit(),
            backward_prefetch_scale_factor: default_backward_prefetch_scale_factor(),
            request_limit: default_request_limit(),
            max_index_nesting_depth: default_max_index_nesting_depth(),
        }
    }
}

impl EngineConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default prefetch limit
    pub fn with_prefetch_limit(mut self, prefetch_limit: u64) -> Self {
        self.prefetch_limit = prefetch_limit;
        self
    }

    /// Set the backward-scan prefetch scale factor
    pub fn with_backward_prefetch_scale_factor(mut self, factor: f64) -> Self {
        self.backward_prefetch_scale_factor = factor;
        self
    }

    /// Set the per-round sub-operation limit
    pub fn with_request_limit(mut self, request_limit: usize) -> Self {
        self.request_limit = request_limit;
        self
    }

    /// Set the index-request nesting bound
    pub fn with_max_index_nesting_depth(mut self, depth: usize) -> Self {
        self.max_index_nesting_depth = depth;
        self
    }

    /// Check that every knob is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when a limit is zero or the scale factor is
    /// negative or not finite.
    pub fn validate(&self) -> DocOpResult<()> {
        if self.prefetch_limit == 0 {
            return Err(DocOpError::invalid_config("prefetch_limit must be at least 1"));
        }
        if self.request_limit == 0 {
            return Err(DocOpError::invalid_config("request_limit must be at least 1"));
        }
        if self.max_index_nesting_depth == 0 {
            return Err(DocOpError::invalid_config(
                "max_index_nesting_depth must be at least 1",
            ));
        }
        if !self.backward_prefetch_scale_factor.is_finite()
            || self.backward_prefetch_scale_factor < 0.0
        {
            return Err(DocOpError::invalid_config(format!(
                "backward_prefetch_scale_factor must be a non-negative number, got {}",
                self.backward_prefetch_scale_factor
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# docop engine configuration
#
# Rows requested per physical read when the statement does not ask for fewer.
prefetch_limit = 1024

# Backward scans are slower, so they prefetch this fraction of prefetch_limit
# (never fewer than one row).
backward_prefetch_scale_factor = 0.0625

# Maximum physical sub-operations sent in a single round of a fanned-out read.
request_limit = 1024

# Maximum depth of nested index requests (index scan feeding a table fetch).
max_index_nesting_depth = 8
"#
    }

    /// Parse and validate config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str) -> DocOpResult<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| DocOpError::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> DocOpResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocOpError::invalid_config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            DocOpError::InvalidConfig(msg) => {
                DocOpError::invalid_config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> DocOpResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                DocOpError::invalid_config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> DocOpResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DocOpError::invalid_config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            DocOpError::invalid_config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
