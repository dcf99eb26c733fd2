use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use trellis_registry_spec::{ContributionDecl, parse_contribution};

use super::{ContributionOptions, ExtensionRegistry, MutationToken, invalid};
use crate::cache::{self, CacheWritten};
use crate::contributor::{Contributor, ContributorId};
use crate::error::{CacheError, ContributionError, MutationError, ObjectKind, RegistryError};
use crate::events::{
	Delta, ExtensionDelta, ExtensionPointDelta, ListenerId, RegistryChangeEvent, RegistryChangeListener,
};
use crate::handle::{Extension, ExtensionPoint};
use crate::ingest::{self, namespace_of};
use crate::store::{ChangeSet, Selection, Store};

impl ExtensionRegistry {
	fn authorize(&self, token: &MutationToken) -> Result<(), MutationError> {
		if token.registry == self.shared.id {
			Ok(())
		} else {
			tracing::warn!(registry = %self.shared.name, "mutation attempted with a foreign token");
			Err(MutationError::Unauthorized {
				registry: self.shared.name.clone(),
			})
		}
	}

	fn ensure_running(&self) -> Result<(), MutationError> {
		if self.is_stopped() {
			Err(MutationError::Stopped {
				registry: self.shared.name.clone(),
			})
		} else {
			Ok(())
		}
	}

	fn authorize_removal(&self, token: &MutationToken) -> Result<(), MutationError> {
		self.authorize(token)?;
		if !self.shared.dynamic {
			return Err(MutationError::RemovalDisabled {
				registry: self.shared.name.clone(),
			});
		}
		self.ensure_running()
	}

	fn reject(&self, contributor: &Contributor, error: ContributionError) -> MutationError {
		tracing::warn!(
			registry = %self.shared.name,
			contributor = %contributor.id(),
			%error,
			"contribution rejected"
		);
		MutationError::Rejected(error)
	}

	/// Parses `bytes` and commits the contribution atomically.
	///
	/// On any failure the registry is unchanged and the first diagnostic is returned.
	pub fn add_contribution(
		&self,
		bytes: &[u8],
		source_name: &str,
		contributor: &Contributor,
		options: ContributionOptions,
		token: &MutationToken,
	) -> Result<Delta, MutationError> {
		self.authorize(token)?;
		self.ensure_running()?;
		let decl = parse_contribution(bytes, source_name).map_err(|e| self.reject(contributor, e.into()))?;
		self.commit_declarations(&decl, contributor, options)
	}

	/// Commits an already parsed contribution.
	pub fn add_declarations(
		&self,
		decl: &ContributionDecl,
		contributor: &Contributor,
		options: ContributionOptions,
		token: &MutationToken,
	) -> Result<Delta, MutationError> {
		self.authorize(token)?;
		self.ensure_running()?;
		self.commit_declarations(decl, contributor, options)
	}

	fn commit_declarations(
		&self,
		decl: &ContributionDecl,
		contributor: &Contributor,
		options: ContributionOptions,
	) -> Result<Delta, MutationError> {
		let plan = ingest::plan(decl, contributor, options.persist).map_err(|e| self.reject(contributor, e))?;
		if plan.is_empty() {
			return Ok(Delta::default());
		}

		self.shared.with_contributor(contributor.id(), || {
			self.ensure_running()?;
			let changes = {
				let mut store = self.shared.store.write();
				let checked = store.check_collisions(&plan).and_then(|()| store.check_capacity(&plan));
				if let Err(error) = checked {
					drop(store);
					return Err(self.reject(contributor, error));
				}
				store.commit(plan).map_err(|e| self.reject(contributor, e.into()))?
			};
			Ok(self.announce(decl, contributor, options, &changes))
		})
	}

	fn announce(
		&self,
		decl: &ContributionDecl,
		contributor: &Contributor,
		options: ContributionOptions,
		changes: &ChangeSet,
	) -> Delta {
		let delta = Delta::from_changes(changes);
		tracing::debug!(
			registry = %self.shared.name,
			contributor = %contributor.id(),
			fragment = contributor.is_fragment(),
			source = %decl.source_name,
			extension_points = delta.added_extension_points.len(),
			extensions = delta.added_extensions.len(),
			attached = delta.attached.len(),
			"contribution committed"
		);
		if options.dynamic {
			self.deliver(changes);
		}
		delta
	}

	/// Removes every record `contributor` supplied.
	///
	/// Extensions of other contributors attached to removed points become orphans.
	/// Removing an unknown contributor is a no-op.
	pub fn remove_contributor(&self, contributor: &ContributorId, token: &MutationToken) -> Result<Delta, MutationError> {
		self.authorize_removal(token)?;
		self.shared.with_contributor(contributor, || {
			self.ensure_running()?;
			self.remove_selected(|store| Ok(store.select_contributor(contributor)))
		})
	}

	/// Removes one extension and its element tree.
	pub fn remove_extension(&self, extension: &Extension, token: &MutationToken) -> Result<Delta, MutationError> {
		self.authorize_removal(token)?;
		if !extension.belongs_to(&self.shared) {
			return Err(invalid(ObjectKind::Extension, extension.key().slot()).into());
		}
		let contributor = extension.contributor()?;
		let key = extension.key();
		self.shared.with_contributor(contributor.id(), || {
			self.ensure_running()?;
			self.remove_selected(|store| {
				if !store.is_linked_extension(key) {
					return Err(invalid(ObjectKind::Extension, key.slot()));
				}
				Ok(Selection {
					points: Vec::new(),
					extensions: vec![key],
				})
			})
		})
	}

	/// Removes one extension point. Its attached extensions become orphans.
	pub fn remove_extension_point(&self, point: &ExtensionPoint, token: &MutationToken) -> Result<Delta, MutationError> {
		self.authorize_removal(token)?;
		if !point.belongs_to(&self.shared) {
			return Err(invalid(ObjectKind::ExtensionPoint, point.key().slot()).into());
		}
		let contributor = point.contributor()?;
		let key = point.key();
		self.shared.with_contributor(contributor.id(), || {
			self.ensure_running()?;
			self.remove_selected(|store| {
				if !store.is_linked_point(key) {
					return Err(invalid(ObjectKind::ExtensionPoint, key.slot()));
				}
				Ok(Selection {
					points: vec![key],
					extensions: Vec::new(),
				})
			})
		})
	}

	fn remove_selected(
		&self,
		select: impl FnOnce(&Store) -> Result<Selection, RegistryError>,
	) -> Result<Delta, MutationError> {
		let mut changes = {
			let mut store = self.shared.store.write();
			let selection = select(&store)?;
			store.unlink(&selection)
		};
		if changes.is_empty() {
			return Ok(Delta::default());
		}

		let delta = Delta::from_changes(&changes);
		tracing::debug!(
			registry = %self.shared.name,
			extension_points = delta.removed_extension_points.len(),
			extensions = delta.removed_extensions.len(),
			orphaned = delta.orphaned.len(),
			"records removed"
		);
		self.deliver(&changes);

		let reclaim = std::mem::take(&mut changes.reclaim);
		if !reclaim.is_empty() {
			self.shared.store.write().reclaim(reclaim);
		}
		Ok(delta)
	}

	/// Builds the public event for `changes` and hands it to every listener.
	fn deliver(&self, changes: &ChangeSet) {
		let shared = &self.shared;
		let mut event = RegistryChangeEvent::default();
		for point in &changes.points {
			event.push_point(
				point.namespace.clone(),
				ExtensionPointDelta {
					kind: point.kind,
					extension_point: ExtensionPoint::new(shared.clone(), point.key),
				},
			);
		}
		for ext in &changes.extensions {
			event.push_extension(
				Arc::from(namespace_of(&ext.point_id)),
				ExtensionDelta {
					kind: ext.kind,
					cause: ext.cause,
					extension: Extension::new(shared.clone(), ext.key),
					extension_point_id: ext.point_id.clone(),
					extension_point: ext.point.map(|k| ExtensionPoint::new(shared.clone(), k)),
				},
			);
		}
		shared.listeners.deliver(&shared.name, &event);
	}

	/// Registers `listener`, optionally restricted to one extension-point namespace.
	pub fn add_listener(&self, listener: impl RegistryChangeListener + 'static, namespace: Option<&str>) -> ListenerId {
		self.shared.listeners.add(Arc::new(listener), namespace)
	}

	/// Returns `false` if `id` was not registered.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.shared.listeners.remove(id)
	}

	/// Writes the persistent part of the registry to `path` and its `.lazy` sibling.
	pub fn write_cache(&self, path: &Path) -> Result<CacheWritten, CacheError> {
		self.shared.materialize()?;
		let store = self.shared.store.read();
		let written = cache::write(&store, path, self.shared.timestamp, self.shared.cache.lazy_threshold)?;
		tracing::debug!(
			registry = %self.shared.name,
			path = %path.display(),
			extension_points = written.extension_points,
			extensions = written.extensions,
			lazy = written.lazy_extensions,
			"registry cache written"
		);
		Ok(written)
	}

	/// Drops in-memory lazy file bytes now instead of waiting for the idle period.
	///
	/// Trees that were already paged in are kept.
	pub fn expire_lazy_data(&self) {
		if let Some(lazy) = &self.shared.lazy {
			lazy.expire();
		}
	}

	/// Shuts the registry down.
	///
	/// Writes the cache when configured to, detaches every listener and stops the lazy
	/// reaper. Later mutations fail with [`MutationError::Stopped`]; reads keep working.
	pub fn stop(&self, token: &MutationToken) -> Result<Option<CacheWritten>, MutationError> {
		self.authorize(token)?;
		if self.shared.stopped.swap(true, Ordering::AcqRel) {
			return Err(MutationError::Stopped {
				registry: self.shared.name.clone(),
			});
		}

		let written = match (&self.shared.cache.path, self.shared.cache.write_on_stop) {
			(Some(path), true) => Some(self.write_cache(path)),
			_ => None,
		};
		self.shared.listeners.clear();
		drop(self.shared.reaper.lock().take());
		tracing::debug!(registry = %self.shared.name, "registry stopped");

		Ok(written.transpose()?)
	}
}
