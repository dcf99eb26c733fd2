//! Error types for ingestion, mutation, handle access and the persistent cache.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use trellis_registry_spec::{Location, ParseError};

use crate::contributor::ContributorId;
use crate::core::Slot;

/// Kind of registry object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
	ExtensionPoint,
	Extension,
	ConfigurationElement,
}

impl fmt::Display for ObjectKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::ExtensionPoint => "extension point",
			Self::Extension => "extension",
			Self::ConfigurationElement => "configuration element",
		})
	}
}

/// Errors raised by handle accessors.
#[derive(Debug, Error)]
pub enum RegistryError {
	/// The record behind the handle has been removed.
	#[error("invalid registry object: {kind} {slot} is no longer live")]
	InvalidObject { kind: ObjectKind, slot: Slot },

	/// Configuration elements stored in the lazy cache file could not be paged in.
	#[error("failed to page in configuration elements: {0}")]
	LazyLoad(#[from] CacheError),
}

impl RegistryError {
	pub fn is_invalid_object(&self) -> bool {
		matches!(self, Self::InvalidObject { .. })
	}
}

/// Reasons a contribution is refused. The registry is left untouched in every case.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContributionError {
	/// The input could not be parsed.
	#[error(transparent)]
	Parse(#[from] ParseError),

	/// The contributing module is not a singleton.
	#[error("contributor '{contributor}' is not a singleton module and cannot contribute")]
	NonSingleton { contributor: ContributorId },

	/// The contributing fragment is attached to a non-singleton host.
	#[error("fragment '{contributor}' is attached to non-singleton host '{host}'")]
	NonSingletonHost { contributor: ContributorId, host: ContributorId },

	/// A declaration lacks a required attribute.
	#[error("{location}: {node} is missing required attribute '{attribute}'")]
	MissingAttribute {
		location: Location,
		node: &'static str,
		attribute: &'static str,
	},

	/// An identifier is empty or contains illegal characters.
	#[error("{location}: illegal identifier '{id}'")]
	InvalidIdentifier { location: Location, id: String },

	/// A configuration element has an empty or illegal name.
	#[error("{location}: illegal configuration element name '{name}'")]
	InvalidElementName { location: Location, name: String },

	/// A configuration element declares the same attribute twice.
	#[error("{location}: duplicate attribute '{key}'")]
	DuplicateAttribute { location: Location, key: String },

	/// The extension point identifier is already live.
	#[error("extension point '{id}' is already declared by '{owner}'")]
	DuplicateExtensionPoint { id: Arc<str>, owner: ContributorId },

	/// The extension identifier is already live.
	#[error("extension '{id}' is already declared by '{owner}'")]
	DuplicateExtension { id: Arc<str>, owner: ContributorId },

	/// The store cannot address the records this contribution would create.
	#[error(transparent)]
	Capacity(#[from] CapacityExceeded),
}

/// A record arena ran out of addressable slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("registry storage exceeded {} slots", u32::MAX)]
pub struct CapacityExceeded;

/// Errors raised by the mutation surface.
#[derive(Debug, Error)]
pub enum MutationError {
	/// The capability token was not issued by this registry.
	#[error("mutation token was not issued by registry '{registry}'")]
	Unauthorized { registry: Arc<str> },

	/// The registry was built without dynamic mutation.
	#[error("registry '{registry}' does not allow removal")]
	RemovalDisabled { registry: Arc<str> },

	/// The registry has been stopped.
	#[error("registry '{registry}' has been stopped")]
	Stopped { registry: Arc<str> },

	/// The contribution was refused.
	#[error("contribution rejected: {0}")]
	Rejected(#[from] ContributionError),

	/// The handle passed to a removal call is stale.
	#[error(transparent)]
	Invalid(#[from] RegistryError),

	/// Stopping the registry could not write the persistent cache.
	#[error("failed to write registry cache: {0}")]
	Cache(#[from] CacheError),
}

impl MutationError {
	/// The rejection diagnostic, if this is a refused contribution.
	pub fn rejection(&self) -> Option<&ContributionError> {
		match self {
			Self::Rejected(err) => Some(err),
			_ => None,
		}
	}
}

/// Errors reading or writing the persistent cache.
#[derive(Debug, Error)]
pub enum CacheError {
	#[error("I/O error on {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("{path}: not a registry cache file")]
	BadMagic { path: PathBuf },

	#[error("{path}: unsupported cache schema version {found}")]
	SchemaVersion { path: PathBuf, found: u32 },

	#[error("{path}: cache timestamp {found} does not match expected {expected}")]
	TimestampMismatch { path: PathBuf, expected: u64, found: u64 },

	#[error("cache payload could not be encoded or decoded: {0}")]
	Codec(#[from] postcard::Error),

	#[error("cache is corrupt: {0}")]
	Corrupt(String),

	#[error("cached records do not fit the registry: {0}")]
	Capacity(#[from] CapacityExceeded),

	#[error("{what} exceeds the cache index range")]
	IndexOverflow { what: &'static str },
}

impl CacheError {
	pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			error,
		}
	}
}

/// Errors loading a [`RegistryConfig`](crate::RegistryConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("invalid registry configuration: {0}")]
	Toml(#[from] toml::de::Error),
}
