//! Registry configuration.
//!
//! Loaded from TOML. Every field is optional:
//!
//! ```toml
//! name = "workbench"
//! dynamic_mutation = true
//!
//! [cache]
//! path = "state/registry.cache"
//! check_timestamp = true
//! write_on_stop = true
//! lazy_threshold = 32
//! lazy_idle_ms = 30000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
	/// Name used in diagnostics and log fields.
	pub name: String,
	/// Allows removal of contributions after startup.
	pub dynamic_mutation: bool,
	pub cache: CacheConfig,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			name: "registry".into(),
			dynamic_mutation: true,
			cache: CacheConfig::default(),
		}
	}
}

/// Persistent cache settings. Caching is off while `path` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
	pub path: Option<PathBuf>,
	/// Reject a cache whose timestamp differs from the registry's.
	pub check_timestamp: bool,
	/// Write the cache when the registry is stopped.
	pub write_on_stop: bool,
	/// Element trees with more elements than this go to the lazy file.
	pub lazy_threshold: usize,
	/// How long the raw lazy file bytes stay in memory after their last use.
	///
	/// Only the file buffer expires. Element trees already paged in from it stay
	/// resident until their extension is removed.
	pub lazy_idle_ms: u64,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			path: None,
			check_timestamp: true,
			write_on_stop: true,
			lazy_threshold: 32,
			lazy_idle_ms: 30_000,
		}
	}
}

impl CacheConfig {
	pub fn lazy_idle(&self) -> Duration {
		Duration::from_millis(self.lazy_idle_ms)
	}
}

impl RegistryConfig {
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(input)?)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml_str(&input)?;
		tracing::debug!(path = %path.display(), name = %config.name, "registry config loaded");
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_input_uses_defaults() {
		assert_eq!(RegistryConfig::from_toml_str("").unwrap(), RegistryConfig::default());
	}

	#[test]
	fn partial_cache_table_keeps_other_defaults() {
		let config = RegistryConfig::from_toml_str(
			r#"
name = "workbench"
dynamic_mutation = false

[cache]
path = "state/registry.cache"
lazy_threshold = 4
"#,
		)
		.unwrap();

		assert_eq!(config.name, "workbench");
		assert!(!config.dynamic_mutation);
		assert_eq!(config.cache.path.as_deref(), Some(Path::new("state/registry.cache")));
		assert_eq!(config.cache.lazy_threshold, 4);
		assert!(config.cache.check_timestamp);
		assert!(config.cache.write_on_stop);
		assert_eq!(config.cache.lazy_idle(), Duration::from_secs(30));
	}

	#[test]
	fn unknown_fields_are_rejected() {
		let err = RegistryConfig::from_toml_str("nmae = \"typo\"").unwrap_err();
		assert!(matches!(err, ConfigError::Toml(_)));
	}

	#[test]
	fn load_reports_missing_files() {
		let dir = tempfile::tempdir().unwrap();
		let err = RegistryConfig::load(&dir.path().join("absent.toml")).unwrap_err();
		assert!(matches!(err, ConfigError::Io { .. }));

		let path = dir.path().join("registry.toml");
		std::fs::write(&path, "name = \"disk\"").unwrap();
		assert_eq!(RegistryConfig::load(&path).unwrap().name, "disk");
	}
}
