//! Site configuration consumed by changeset sources.
//!
//! The only setting the adapters read is the batch-changes policy flag that
//! deletes the source branch after a changeset is closed or merged. Adapters
//! hold a [`SiteConfig`] handle and read it at call time, so reloading the
//! configuration takes effect on the next operation.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SourcesConfig {
    /// Batch-changes settings.
    #[serde(default)]
    pub batch_changes: BatchChangesConfig,
}

/// Batch-changes settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BatchChangesConfig {
    /// Delete the changeset's source branch after it is closed or merged.
    #[serde(default)]
    pub auto_delete_branch: bool,
}

impl SourcesConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Live view of the site configuration.
pub trait SiteConfig: Send + Sync {
    /// Whether to delete the source branch on close and merge.
    fn auto_delete_branch(&self) -> bool;
}

/// Fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteConfig {
    config: SourcesConfig,
}

impl StaticSiteConfig {
    /// Wraps a parsed configuration.
    #[must_use]
    pub const fn new(config: SourcesConfig) -> Self {
        Self { config }
    }

    /// Shorthand for a configuration with only the branch policy set.
    #[must_use]
    pub const fn with_auto_delete_branch(auto_delete_branch: bool) -> Self {
        Self {
            config: SourcesConfig {
                batch_changes: BatchChangesConfig { auto_delete_branch },
            },
        }
    }

    /// Returns the configuration as a shared handle.
    #[must_use]
    pub fn shared(self) -> Arc<dyn SiteConfig> {
        Arc::new(self)
    }
}

impl SiteConfig for StaticSiteConfig {
    fn auto_delete_branch(&self) -> bool {
        self.config.batch_changes.auto_delete_branch
    }
}

/// Configuration that can be swapped or reloaded while sources are live.
#[derive(Debug, Default)]
pub struct ReloadableSiteConfig {
    current: RwLock<SourcesConfig>,
}

impl ReloadableSiteConfig {
    /// Creates a handle holding `config`.
    #[must_use]
    pub const fn new(config: SourcesConfig) -> Self {
        Self {
            current: RwLock::new(config),
        }
    }

    /// Replaces the configuration.
    pub fn replace(&self, config: SourcesConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Reloads the configuration from a TOML file.
    ///
    /// The current configuration is kept when the file cannot be loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn reload(&self, path: &Path) -> Result<(), ConfigError> {
        let config = SourcesConfig::from_file(path)?;
        tracing::info!(path = %path.display(), "reloaded changeset source configuration");
        self.replace(config);
        Ok(())
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn snapshot(&self) -> SourcesConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SiteConfig for ReloadableSiteConfig {
    fn auto_delete_branch(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .batch_changes
            .auto_delete_branch
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_to_keeping_branches() {
        let config = SourcesConfig::from_toml("").expect("empty config should parse");
        assert!(!config.batch_changes.auto_delete_branch);
    }

    #[test]
    fn test_parse_auto_delete_branch() {
        let config = SourcesConfig::from_toml("[batch_changes]\nauto_delete_branch = true\n")
            .expect("config should parse");
        assert!(config.batch_changes.auto_delete_branch);
    }

    #[test]
    fn test_invalid_toml() {
        let result = SourcesConfig::from_toml("[batch_changes\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SourcesConfig {
            batch_changes: BatchChangesConfig {
                auto_delete_branch: true,
            },
        };
        let text = config.to_toml().expect("config should serialize");
        assert_eq!(
            SourcesConfig::from_toml(&text).expect("config should parse"),
            config
        );
    }

    #[test]
    fn test_reload_is_visible_to_readers() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        writeln!(file, "[batch_changes]\nauto_delete_branch = true")
            .expect("temp file should be writable");

        let site = ReloadableSiteConfig::default();
        assert!(!site.auto_delete_branch());
        site.reload(file.path()).expect("reload should succeed");
        assert!(site.auto_delete_branch());
    }

    #[test]
    fn test_failed_reload_keeps_current_config() {
        let site = ReloadableSiteConfig::new(SourcesConfig {
            batch_changes: BatchChangesConfig {
                auto_delete_branch: true,
            },
        });
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let result = site.reload(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
        assert!(site.auto_delete_branch());
    }
}
