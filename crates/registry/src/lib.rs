//! Dynamic extension registry.
//!
//! Independently loaded modules declare **extension points** (named attachment slots)
//! and **extensions** (contributions into those slots, each carrying a tree of
//! configuration elements). The registry indexes them by namespace and contributor,
//! keeps the index consistent while contributions arrive and leave in any order, and
//! tells listeners what changed.
//!
//! # Layout
//!
//! - [`core`]: generation-tagged arena slots and typed keys
//! - `store`: record arenas plus the namespace, contributor and orphan indices
//! - `ingest`: validation of parsed contributions into commit plans
//! - [`events`]: change events, deltas and listener fan-out
//! - [`handle`]: [`ExtensionPoint`], [`Extension`] and [`ConfigurationElement`] handles
//! - [`cache`]: persistent binary cache and the lazy element file
//! - [`config`]: TOML configuration
//! - [`lifecycle`]: bridge from a module lifecycle system
//!
//! # Handles
//!
//! Handles hold a key, not a reference. Once the record behind a handle is removed,
//! every accessor returns [`RegistryError::InvalidObject`]. The only window in which a
//! removed record stays readable is the synchronous listener callback of its removal.
//!
//! # Example
//!
//! ```
//! use trellis_registry::{ContributionOptions, Contributor, RegistryBuilder};
//!
//! let built = RegistryBuilder::new("demo").build();
//! let host = Contributor::module("1", "org.example");
//! built
//! 	.registry
//! 	.add_contribution(
//! 		br#"extension-point "views" label="Views""#,
//! 		"plugin.kdl",
//! 		&host,
//! 		ContributionOptions::startup(),
//! 		&built.token,
//! 	)
//! 	.unwrap();
//!
//! let point = built.registry.extension_point("org.example.views").unwrap();
//! assert_eq!(point.label().unwrap().as_deref(), Some("Views"));
//! ```

pub mod cache;
pub mod config;
pub mod contributor;
pub mod core;
pub mod error;
pub mod events;
pub mod handle;
mod ingest;
pub mod lifecycle;
mod registry;
mod store;

pub use cache::{CacheSnapshot, CacheWritten, TimestampCheck, lazy_path, read_cache};
pub use config::{CacheConfig, RegistryConfig};
pub use contributor::{Contributor, ContributorId, ContributorOrigin};
pub use error::{
	CacheError, CapacityExceeded, ConfigError, ContributionError, MutationError, ObjectKind, RegistryError,
};
pub use events::{
	Delta, DeltaCause, DeltaKind, ExtensionDelta, ExtensionPointDelta, ExtensionSummary, ListenerId,
	NamespaceDelta, RegistryChangeEvent, RegistryChangeListener,
};
pub use handle::{ConfigurationElement, ElementParent, Extension, ExtensionPoint};
pub use lifecycle::{LifecycleBridge, ModuleIdentity, ModuleSource};
pub use registry::{
	BuiltRegistry, CacheOutcome, ContributionOptions, ExtensionRegistry, MutationToken, RegistryBuilder,
	RegistryStats,
};
pub use trellis_registry_spec as spec;
