//! Namespace, contributor and orphan indices over the object store.
//!
//! The index holds only keys. Every key in it refers to a live record; records being
//! removed are unlinked here first and reclaimed from the arenas afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::contributor::{Contributor, ContributorId};
use crate::core::{ExtensionKey, PointKey};

#[derive(Debug, Default)]
pub(crate) struct NamespaceEntry {
	pub points: Vec<PointKey>,
	pub extensions: Vec<ExtensionKey>,
}

impl NamespaceEntry {
	fn is_empty(&self) -> bool {
		self.points.is_empty() && self.extensions.is_empty()
	}
}

#[derive(Debug)]
pub(crate) struct ContributorEntry {
	pub contributor: Contributor,
	pub points: Vec<PointKey>,
	pub extensions: Vec<ExtensionKey>,
}

#[derive(Default)]
pub(crate) struct NamespaceIndex {
	points_by_id: FxHashMap<Arc<str>, PointKey>,
	extensions_by_id: FxHashMap<Arc<str>, ExtensionKey>,
	namespaces: BTreeMap<Arc<str>, NamespaceEntry>,
	/// Contributors in first-contribution order.
	contributors: IndexMap<ContributorId, ContributorEntry, FxBuildHasher>,
	/// Extensions waiting for an extension point id to appear, in arrival order.
	orphans: FxHashMap<Arc<str>, Vec<ExtensionKey>>,
}

impl NamespaceIndex {
	pub fn point_by_id(&self, id: &str) -> Option<PointKey> {
		self.points_by_id.get(id).copied()
	}

	pub fn extension_by_id(&self, id: &str) -> Option<ExtensionKey> {
		self.extensions_by_id.get(id).copied()
	}

	pub fn namespace(&self, namespace: &str) -> Option<&NamespaceEntry> {
		self.namespaces.get(namespace)
	}

	/// Namespaces with at least one live record, sorted.
	pub fn namespaces(&self) -> impl Iterator<Item = (&Arc<str>, &NamespaceEntry)> + '_ {
		self.namespaces.iter()
	}

	pub fn contributor(&self, id: &ContributorId) -> Option<&ContributorEntry> {
		self.contributors.get(id)
	}

	pub fn contributors(&self) -> impl Iterator<Item = &ContributorEntry> + '_ {
		self.contributors.values()
	}

	#[cfg(test)]
	pub fn orphans_of(&self, point_id: &str) -> &[ExtensionKey] {
		self.orphans.get(point_id).map_or(&[], Vec::as_slice)
	}

	/// Orphan lists by target point id, each in arrival order. Map order is unspecified.
	pub fn orphans(&self) -> impl Iterator<Item = (&Arc<str>, &[ExtensionKey])> + '_ {
		self.orphans.iter().map(|(point_id, waiting)| (point_id, waiting.as_slice()))
	}

	pub fn orphan_count(&self) -> usize {
		self.orphans.values().map(Vec::len).sum()
	}

	pub fn insert_point(&mut self, key: PointKey, unique_id: &Arc<str>, namespace: &Arc<str>, contributor: &Contributor) {
		self.points_by_id.insert(unique_id.clone(), key);
		self.namespaces.entry(namespace.clone()).or_default().points.push(key);
		self.contributor_entry(contributor).points.push(key);
	}

	pub fn insert_extension(
		&mut self,
		key: ExtensionKey,
		unique_id: Option<&Arc<str>>,
		namespace: &Arc<str>,
		contributor: &Contributor,
	) {
		if let Some(id) = unique_id {
			self.extensions_by_id.insert(id.clone(), key);
		}
		self.namespaces.entry(namespace.clone()).or_default().extensions.push(key);
		self.contributor_entry(contributor).extensions.push(key);
	}

	pub fn remove_point(&mut self, key: PointKey, unique_id: &str, namespace: &str, contributor: &ContributorId) {
		if self.points_by_id.get(unique_id) == Some(&key) {
			self.points_by_id.remove(unique_id);
		}
		self.edit_namespace(namespace, |entry| entry.points.retain(|k| *k != key));
		self.edit_contributor(contributor, |entry| entry.points.retain(|k| *k != key));
	}

	pub fn remove_extension(
		&mut self,
		key: ExtensionKey,
		unique_id: Option<&str>,
		namespace: &str,
		contributor: &ContributorId,
	) {
		if let Some(id) = unique_id
			&& self.extensions_by_id.get(id) == Some(&key)
		{
			self.extensions_by_id.remove(id);
		}
		self.edit_namespace(namespace, |entry| entry.extensions.retain(|k| *k != key));
		self.edit_contributor(contributor, |entry| entry.extensions.retain(|k| *k != key));
	}

	pub fn add_orphan(&mut self, point_id: &Arc<str>, key: ExtensionKey) {
		self.orphans.entry(point_id.clone()).or_default().push(key);
	}

	pub fn remove_orphan(&mut self, point_id: &str, key: ExtensionKey) {
		if let Some(waiting) = self.orphans.get_mut(point_id) {
			waiting.retain(|k| *k != key);
			if waiting.is_empty() {
				self.orphans.remove(point_id);
			}
		}
	}

	/// Removes and returns every orphan waiting for `point_id`.
	pub fn take_orphans(&mut self, point_id: &str) -> Vec<ExtensionKey> {
		self.orphans.remove(point_id).unwrap_or_default()
	}

	/// Registers `contributor` without records, fixing its position in contributor order.
	pub fn ensure_contributor(&mut self, contributor: &Contributor) {
		self.contributor_entry(contributor);
	}

	fn contributor_entry(&mut self, contributor: &Contributor) -> &mut ContributorEntry {
		self.contributors
			.entry(contributor.id().clone())
			.or_insert_with(|| ContributorEntry {
				contributor: contributor.clone(),
				points: Vec::new(),
				extensions: Vec::new(),
			})
	}

	fn edit_namespace(&mut self, namespace: &str, edit: impl FnOnce(&mut NamespaceEntry)) {
		if let Some(entry) = self.namespaces.get_mut(namespace) {
			edit(entry);
			if entry.is_empty() {
				self.namespaces.remove(namespace);
			}
		}
	}

	fn edit_contributor(&mut self, id: &ContributorId, edit: impl FnOnce(&mut ContributorEntry)) {
		if let Some(entry) = self.contributors.get_mut(id) {
			edit(entry);
			if entry.points.is_empty() && entry.extensions.is_empty() {
				self.contributors.shift_remove(id);
			}
		}
	}
}
