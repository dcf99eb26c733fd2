//! Bridge from a module lifecycle system to the registry.
//!
//! The lifecycle side knows which modules are resolved and where their manifests live.
//! [`LifecycleBridge`] turns its resolve and remove callbacks into contributions and
//! contributor removals, holding the mutation token on the caller's behalf.

use std::fmt;
use std::sync::Arc;

use crate::contributor::Contributor;
use crate::error::MutationError;
use crate::events::Delta;
use crate::registry::{ContributionOptions, ExtensionRegistry, MutationToken};

/// Identity of a module as the lifecycle system names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdentity(Arc<str>);

impl ModuleIdentity {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ModuleIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Lifecycle-side knowledge about modules.
pub trait ModuleSource: Send + Sync {
	/// Contributor a module's records are attributed to, or `None` if it is unknown.
	fn contributor_for(&self, module: &ModuleIdentity) -> Option<Contributor>;

	/// Raw manifest bytes and a source name for diagnostics, or `None` if the module
	/// declares nothing.
	fn manifest_for(&self, module: &ModuleIdentity) -> Option<(Vec<u8>, String)>;
}

/// Forwards module lifecycle callbacks to one registry.
pub struct LifecycleBridge<S> {
	registry: ExtensionRegistry,
	token: MutationToken,
	source: S,
	options: ContributionOptions,
}

impl<S: ModuleSource> LifecycleBridge<S> {
	pub fn new(registry: ExtensionRegistry, token: MutationToken, source: S) -> Self {
		Self {
			registry,
			token,
			source,
			options: ContributionOptions::dynamic(),
		}
	}

	/// Options applied to every contribution the bridge makes.
	pub fn with_options(mut self, options: ContributionOptions) -> Self {
		self.options = options;
		self
	}

	pub fn registry(&self) -> &ExtensionRegistry {
		&self.registry
	}

	/// Adds the module's manifest. Returns `Ok(None)` when the module is unknown or
	/// declares nothing.
	pub fn on_module_resolved(&self, module: &ModuleIdentity) -> Result<Option<Delta>, MutationError> {
		let Some(contributor) = self.source.contributor_for(module) else {
			tracing::debug!(registry = self.registry.name(), %module, "resolved module has no contributor");
			return Ok(None);
		};
		let Some((bytes, source_name)) = self.source.manifest_for(module) else {
			return Ok(None);
		};
		self.registry
			.add_contribution(&bytes, &source_name, &contributor, self.options, &self.token)
			.map(Some)
	}

	/// Removes every record the module contributed.
	pub fn on_module_removed(&self, module: &ModuleIdentity) -> Result<Delta, MutationError> {
		let Some(contributor) = self.source.contributor_for(module) else {
			return Ok(Delta::default());
		};
		self.registry.remove_contributor(contributor.id(), &self.token)
	}
}
