//! Registry instance, builder and capability token.
//!
//! # Purpose
//!
//! [`ExtensionRegistry`] is a cheap, cloneable front for one shared store. Reads go
//! through the query methods and the handle types. Mutations require the
//! [`MutationToken`] issued by [`RegistryBuilder::build`] alongside the registry.
//!
//! # Invariants
//!
//! * A token authorizes exactly the registry it was built with. Several registries can
//!   coexist in one process without sharing state.
//! * One contributor's adds and removals are serialized by a per-contributor mutex.
//!   Different contributors parse and validate in parallel and only meet at the store
//!   write section.
//! * Listener delivery happens with no store section held. Removed records are unlinked
//!   before delivery and reclaimed after it.
//! * After [`ExtensionRegistry::stop`] every mutation fails with
//!   [`MutationError::Stopped`]. Reads keep working.
//!
//! # Concurrency
//!
//! The store sits behind a `parking_lot::RwLock`. Readers never block each other except
//! for the short write section that pages in a lazy element tree.

mod mutation;
mod queries;


use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::cache::{self, CacheSnapshot, LazyReaper, LazyStore, TimestampCheck};
use crate::config::{CacheConfig, RegistryConfig};
use crate::contributor::ContributorId;
use crate::core::{ElementKey, ExtensionKey};
use crate::error::{CacheError, ObjectKind, RegistryError};
use crate::events::Listeners;
use crate::store::{Elements, ParentKey, Store};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Shared {
	id: u64,
	pub(crate) name: Arc<str>,
	pub(crate) store: RwLock<Store>,
	pub(crate) listeners: Listeners,
	contributor_locks: Mutex<FxHashMap<ContributorId, Arc<Mutex<()>>>>,
	dynamic: bool,
	stopped: AtomicBool,
	timestamp: u64,
	cache: CacheConfig,
	lazy: Option<Arc<LazyStore>>,
	reaper: Mutex<Option<LazyReaper>>,
}

impl Shared {
	/// Runs `section` while holding the per-contributor lock of `id`.
	///
	/// The lock entry is dropped again once no other caller holds or waits on it, so the
	/// map only tracks contributors with a mutation in flight.
	fn with_contributor<R>(&self, id: &ContributorId, section: impl FnOnce() -> R) -> R {
		let lock = self.contributor_locks.lock().entry(id.clone()).or_default().clone();
		let result = {
			let _serial = lock.lock();
			section()
		};
		// Clones are only handed out under the map lock, so the count cannot grow here.
		let mut locks = self.contributor_locks.lock();
		if Arc::strong_count(&lock) == 2 {
			locks.remove(id);
		}
		result
	}

	#[cfg(test)]
	pub(crate) fn contributor_lock_count(&self) -> usize {
		self.contributor_locks.lock().len()
	}

	/// Root element keys of `extension`, paging them in from the lazy file if needed.
	pub(crate) fn element_roots(&self, extension: ExtensionKey) -> Result<Vec<ElementKey>, RegistryError> {
		let at = {
			let store = self.store.read();
			let record = store
				.extension(extension)
				.ok_or_else(|| invalid(ObjectKind::Extension, extension.0))?;
			match &record.elements {
				Elements::Loaded(roots) => return Ok(roots.clone()),
				Elements::Lazy(at) => *at,
			}
		};

		let lazy = self
			.lazy
			.as_ref()
			.ok_or_else(|| CacheError::Corrupt("lazy element tree without a lazy file".into()))?;
		let planned = lazy.load(at)?;

		let mut store = self.store.write();
		let record = store
			.extension(extension)
			.ok_or_else(|| invalid(ObjectKind::Extension, extension.0))?;
		if let Elements::Loaded(roots) = &record.elements {
			return Ok(roots.clone());
		}
		let roots = store
			.alloc_elements(planned, ParentKey::Extension(extension), extension)
			.map_err(CacheError::from)?;
		if let Some(record) = store.extensions.get_mut(extension.0) {
			record.elements = Elements::Loaded(roots.clone());
		}
		tracing::trace!(registry = %self.name, extension = %extension.0, roots = roots.len(), "element tree paged in");
		Ok(roots)
	}

	/// Pages in every element tree still held by the lazy file.
	fn materialize(&self) -> Result<(), CacheError> {
		let pending: Vec<ExtensionKey> = {
			let store = self.store.read();
			store
				.extensions
				.iter()
				.filter(|(_, record)| matches!(record.elements, Elements::Lazy(_)))
				.map(|(slot, _)| ExtensionKey(slot))
				.collect()
		};
		for key in pending {
			match self.element_roots(key) {
				Ok(_) | Err(RegistryError::InvalidObject { .. }) => {}
				Err(RegistryError::LazyLoad(err)) => return Err(err),
			}
		}
		Ok(())
	}
}

pub(crate) fn invalid(kind: ObjectKind, slot: crate::core::Slot) -> RegistryError {
	RegistryError::InvalidObject { kind, slot }
}

/// Capability required by every mutating call.
///
/// Issued once per registry by [`RegistryBuilder::build`]. Cloning it hands the same
/// authority to another owner.
#[derive(Clone)]
pub struct MutationToken {
	registry: u64,
}

impl std::fmt::Debug for MutationToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MutationToken").field("registry", &self.registry).finish()
	}
}

/// How a contribution is treated once committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContributionOptions {
	/// Deliver a change event to listeners.
	pub dynamic: bool,
	/// Include the records in the persistent cache.
	pub persist: bool,
}

impl Default for ContributionOptions {
	fn default() -> Self {
		Self::dynamic()
	}
}

impl ContributionOptions {
	/// Bulk startup contribution: persisted, no change event.
	pub fn startup() -> Self {
		Self {
			dynamic: false,
			persist: true,
		}
	}

	/// Runtime contribution: persisted, announced to listeners.
	pub fn dynamic() -> Self {
		Self {
			dynamic: true,
			persist: true,
		}
	}

	/// Runtime contribution that never reaches the cache.
	pub fn transient() -> Self {
		Self {
			dynamic: true,
			persist: false,
		}
	}
}

/// What happened to the persistent cache while building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
	/// No cache is configured.
	Disabled,
	/// The store was seeded from the cache.
	Adopted {
		timestamp: u64,
		extension_points: usize,
		extensions: usize,
	},
	/// A cache is configured but was missing or unusable. Contributions must be re-added.
	Rebuild,
}

/// Counts over live records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
	pub extension_points: usize,
	pub extensions: usize,
	/// Elements currently resident in memory. Lazy trees that were never paged in do not count.
	pub configuration_elements: usize,
	pub namespaces: usize,
	pub contributors: usize,
	pub orphans: usize,
	pub listeners: usize,
	pub lazy_resident: bool,
}

/// Registry and its mutation capability, as returned by [`RegistryBuilder::build`].
#[derive(Debug)]
pub struct BuiltRegistry {
	pub registry: ExtensionRegistry,
	pub token: MutationToken,
	pub cache: CacheOutcome,
}

/// Builder for [`ExtensionRegistry`].
#[derive(Debug)]
pub struct RegistryBuilder {
	config: RegistryConfig,
	timestamp: u64,
	snapshot: Option<CacheSnapshot>,
}

impl RegistryBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self::from_config(RegistryConfig {
			name: name.into(),
			..RegistryConfig::default()
		})
	}

	pub fn from_config(config: RegistryConfig) -> Self {
		Self {
			config,
			timestamp: 0,
			snapshot: None,
		}
	}

	/// Enables removal after startup. On by default.
	pub fn dynamic_mutation(mut self, enabled: bool) -> Self {
		self.config.dynamic_mutation = enabled;
		self
	}

	/// Timestamp written to, and expected from, the persistent cache.
	pub fn timestamp(mut self, timestamp: u64) -> Self {
		self.timestamp = timestamp;
		self
	}

	pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.cache.path = Some(path.into());
		self
	}

	pub fn check_timestamp(mut self, check: bool) -> Self {
		self.config.cache.check_timestamp = check;
		self
	}

	pub fn write_on_stop(mut self, write: bool) -> Self {
		self.config.cache.write_on_stop = write;
		self
	}

	pub fn lazy_threshold(mut self, elements: usize) -> Self {
		self.config.cache.lazy_threshold = elements;
		self
	}

	pub fn lazy_idle(mut self, idle: Duration) -> Self {
		self.config.cache.lazy_idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
		self
	}

	/// Seeds the registry from an already read cache instead of reading `cache_path`.
	pub fn with_snapshot(mut self, snapshot: CacheSnapshot) -> Self {
		self.snapshot = Some(snapshot);
		self
	}

	pub fn build(self) -> BuiltRegistry {
		let Self {
			config,
			timestamp,
			snapshot,
		} = self;
		let name: Arc<str> = Arc::from(config.name.as_str());
		let check = if config.cache.check_timestamp {
			TimestampCheck::Expect(timestamp)
		} else {
			TimestampCheck::NoCheck
		};

		let snapshot = match (snapshot, &config.cache.path) {
			(Some(snapshot), _) => match check {
				TimestampCheck::Expect(expected) if snapshot.timestamp() != expected => {
					tracing::warn!(
						registry = %name,
						expected,
						found = snapshot.timestamp(),
						"cache snapshot timestamp mismatch"
					);
					None
				}
				_ => Some(snapshot),
			},
			(None, Some(path)) => cache::read_cache(path, check),
			(None, None) => None,
		};

		let configured = config.cache.path.is_some();
		let (store, lazy, outcome) = match snapshot {
			Some(snapshot) => {
				let outcome = CacheOutcome::Adopted {
					timestamp: snapshot.timestamp(),
					extension_points: snapshot.extension_point_count(),
					extensions: snapshot.extension_count(),
				};
				let (store, lazy_path, cached_at) = snapshot.into_parts();
				let lazy = lazy_path.map(|path| Arc::new(LazyStore::new(path, cached_at, config.cache.lazy_idle())));
				(store, lazy, outcome)
			}
			None if configured => (Store::default(), None, CacheOutcome::Rebuild),
			None => (Store::default(), None, CacheOutcome::Disabled),
		};

		let reaper = lazy.as_ref().and_then(|lazy| match LazyReaper::spawn(lazy) {
			Ok(reaper) => Some(reaper),
			Err(error) => {
				tracing::warn!(registry = %name, %error, "lazy reaper not started; idle expiry disabled");
				None
			}
		});

		let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(registry = %name, dynamic = config.dynamic_mutation, cache = ?outcome, "registry built");
		let shared = Arc::new(Shared {
			id,
			name,
			store: RwLock::new(store),
			listeners: Listeners::default(),
			contributor_locks: Mutex::new(FxHashMap::default()),
			dynamic: config.dynamic_mutation,
			stopped: AtomicBool::new(false),
			timestamp,
			cache: config.cache,
			lazy,
			reaper: Mutex::new(reaper),
		});

		BuiltRegistry {
			registry: ExtensionRegistry { shared },
			token: MutationToken { registry: id },
			cache: outcome,
		}
	}
}

/// Dynamic registry of extension points and extensions.
#[derive(Clone)]
pub struct ExtensionRegistry {
	pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for ExtensionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExtensionRegistry")
			.field("name", &self.shared.name)
			.field("dynamic", &self.shared.dynamic)
			.field("stopped", &self.is_stopped())
			.finish_non_exhaustive()
	}
}

impl ExtensionRegistry {
	pub fn name(&self) -> &str {
		&self.shared.name
	}

	pub fn timestamp(&self) -> u64 {
		self.shared.timestamp
	}

	pub fn is_dynamic(&self) -> bool {
		self.shared.dynamic
	}

	pub fn is_stopped(&self) -> bool {
		self.shared.stopped.load(Ordering::Acquire)
	}

	pub fn stats(&self) -> RegistryStats {
		let store = self.shared.store.read();
		RegistryStats {
			extension_points: store.points.len(),
			extensions: store.extensions.len(),
			configuration_elements: store.elements.len(),
			namespaces: store.index.namespaces().count(),
			contributors: store.index.contributors().count(),
			orphans: store.index.orphan_count(),
			listeners: self.shared.listeners.len(),
			lazy_resident: self.shared.lazy.as_ref().is_some_and(|lazy| lazy.is_resident()),
		}
	}
}
