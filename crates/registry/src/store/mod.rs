//! Object store and namespace index.
//!
//! # Purpose
//!
//! Owns every extension point, extension and configuration element record in three
//! generation-tagged arenas, plus the [`NamespaceIndex`] that makes them reachable by
//! identifier, namespace and contributor.
//!
//! # Invariants
//!
//! * Records are reachable from the index iff they are live. Removal happens in two
//!   steps: [`Store::unlink`] detaches records from every index while leaving them
//!   readable through their keys, and [`Store::reclaim`] frees their slots afterwards.
//! * An extension's `point` is `Some` iff it appears in that point's attachment list.
//!   Otherwise it sits in the orphan list for its `point_id`.
//! * Element trees are owned by exactly one extension. Parent links are keys.
//!
//! # Concurrency
//!
//! The store has no locking of its own. The registry wraps it in one `RwLock`; commits
//! and unlinks take the write side.

mod namespace;
mod records;


use std::sync::Arc;

use rustc_hash::FxHashSet;

pub(crate) use namespace::NamespaceIndex;
pub(crate) use records::{ElementRecord, Elements, ExtensionRecord, LazyRef, ParentKey, PointRecord};

use crate::contributor::{Contributor, ContributorId};
use crate::core::{Arena, ElementKey, ExtensionKey, PointKey};
use crate::error::{CapacityExceeded, ContributionError};
use crate::events::{DeltaCause, DeltaKind};
use crate::ingest::{ContributionPlan, PlannedElement};

#[derive(Default)]
pub(crate) struct Store {
	pub points: Arena<PointRecord>,
	pub extensions: Arena<ExtensionRecord>,
	pub elements: Arena<ElementRecord>,
	pub index: NamespaceIndex,
}

#[derive(Debug, Clone)]
pub(crate) struct PointChange {
	pub kind: DeltaKind,
	pub key: PointKey,
	pub unique_id: Arc<str>,
	pub namespace: Arc<str>,
}

#[derive(Debug, Clone)]
pub(crate) struct ExtensionChange {
	pub kind: DeltaKind,
	pub cause: DeltaCause,
	pub key: ExtensionKey,
	pub unique_id: Option<Arc<str>>,
	pub namespace: Arc<str>,
	pub point_id: Arc<str>,
	pub point: Option<PointKey>,
	pub contributor: ContributorId,
}

/// Slots unlinked by a removal, waiting to be freed.
#[derive(Debug, Default)]
pub(crate) struct Reclaim {
	pub points: Vec<PointKey>,
	pub extensions: Vec<ExtensionKey>,
	pub elements: Vec<ElementKey>,
}

impl Reclaim {
	pub fn is_empty(&self) -> bool {
		self.points.is_empty() && self.extensions.is_empty() && self.elements.is_empty()
	}
}

/// Record-level outcome of one commit or unlink, in application order.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
	pub points: Vec<PointChange>,
	pub extensions: Vec<ExtensionChange>,
	pub reclaim: Reclaim,
}

impl ChangeSet {
	pub fn is_empty(&self) -> bool {
		self.points.is_empty() && self.extensions.is_empty()
	}
}

/// Records chosen for removal.
#[derive(Debug, Default)]
pub(crate) struct Selection {
	pub points: Vec<PointKey>,
	pub extensions: Vec<ExtensionKey>,
}

impl Store {
	#[inline]
	pub fn point(&self, key: PointKey) -> Option<&PointRecord> {
		self.points.get(key.0)
	}

	#[inline]
	pub fn extension(&self, key: ExtensionKey) -> Option<&ExtensionRecord> {
		self.extensions.get(key.0)
	}

	#[inline]
	pub fn element(&self, key: ElementKey) -> Option<&ElementRecord> {
		self.elements.get(key.0)
	}

	/// Whether `key` is live and still reachable from the index.
	pub fn is_linked_point(&self, key: PointKey) -> bool {
		self.point(key)
			.is_some_and(|record| self.index.point_by_id(&record.unique_id) == Some(key))
	}

	/// Whether `key` is live and still reachable from the index.
	pub fn is_linked_extension(&self, key: ExtensionKey) -> bool {
		self.extension(key).is_some_and(|record| {
			self.index
				.contributor(record.contributor.id())
				.is_some_and(|entry| entry.extensions.contains(&key))
		})
	}

	/// Rejects a plan whose identifiers collide with live records.
	pub fn check_collisions(&self, plan: &ContributionPlan) -> Result<(), ContributionError> {
		for point in &plan.points {
			if let Some(existing) = self.index.point_by_id(&point.id.unique_id).and_then(|k| self.point(k)) {
				return Err(ContributionError::DuplicateExtensionPoint {
					id: point.id.unique_id.clone(),
					owner: existing.contributor.id().clone(),
				});
			}
		}
		for id in plan.extensions.iter().filter_map(|ext| ext.id.as_ref()) {
			if let Some(existing) = self.index.extension_by_id(&id.unique_id).and_then(|k| self.extension(k)) {
				return Err(ContributionError::DuplicateExtension {
					id: id.unique_id.clone(),
					owner: existing.contributor.id().clone(),
				});
			}
		}
		Ok(())
	}

	/// Rejects a plan with more records than the arenas can still address.
	pub fn check_capacity(&self, plan: &ContributionPlan) -> Result<(), ContributionError> {
		let elements: usize = plan
			.extensions
			.iter()
			.flat_map(|ext| &ext.elements)
			.map(PlannedElement::subtree_len)
			.sum();
		if plan.points.len() > self.points.remaining()
			|| plan.extensions.len() > self.extensions.remaining()
			|| elements > self.elements.remaining()
		{
			return Err(CapacityExceeded.into());
		}
		Ok(())
	}

	/// Inserts every record of `plan` and links it into the index.
	///
	/// Callers must have run [`Store::check_collisions`] and [`Store::check_capacity`]
	/// under the same write section, which leaves no way for the commit to fail halfway.
	pub fn commit(&mut self, plan: ContributionPlan) -> Result<ChangeSet, CapacityExceeded> {
		let mut changes = ChangeSet::default();
		let ContributionPlan {
			contributor,
			points,
			extensions,
			persist,
		} = plan;

		for point in points {
			let key = PointKey(self.points.insert(PointRecord {
				unique_id: point.id.unique_id.clone(),
				simple_id: point.id.simple_id,
				namespace: point.id.namespace.clone(),
				label: point.label,
				schema: point.schema,
				contributor: contributor.clone(),
				extensions: Vec::new(),
				persist,
			})?);
			self.index
				.insert_point(key, &point.id.unique_id, &point.id.namespace, &contributor);
			changes.points.push(PointChange {
				kind: DeltaKind::Added,
				key,
				unique_id: point.id.unique_id.clone(),
				namespace: point.id.namespace,
			});
			self.relink_orphans(key, &point.id.unique_id, &mut changes);
		}

		for extension in extensions {
			let (unique_id, simple_id) = match extension.id {
				Some(id) => (Some(id.unique_id), Some(id.simple_id)),
				None => (None, None),
			};
			let key = ExtensionKey(self.extensions.insert(ExtensionRecord {
				unique_id: unique_id.clone(),
				simple_id,
				namespace: extension.namespace.clone(),
				label: extension.label,
				point_id: extension.point_id.clone(),
				point: None,
				contributor: contributor.clone(),
				elements: Elements::Loaded(Vec::new()),
				persist,
			})?);
			let roots = self.alloc_elements(extension.elements, ParentKey::Extension(key), key)?;
			if let Some(record) = self.extensions.get_mut(key.0) {
				record.elements = Elements::Loaded(roots);
			}
			self.index
				.insert_extension(key, unique_id.as_ref(), &extension.namespace, &contributor);
			let point = self.attach(key, &extension.point_id);
			changes.extensions.push(ExtensionChange {
				kind: DeltaKind::Added,
				cause: DeltaCause::Record,
				key,
				unique_id,
				namespace: extension.namespace,
				point_id: extension.point_id,
				point,
				contributor: contributor.id().clone(),
			});
		}

		Ok(changes)
	}

	/// Attaches `key` to the live point `point_id`, or parks it as an orphan.
	pub fn attach(&mut self, key: ExtensionKey, point_id: &Arc<str>) -> Option<PointKey> {
		let Some(point) = self.index.point_by_id(point_id) else {
			self.index.add_orphan(point_id, key);
			return None;
		};
		if let Some(record) = self.points.get_mut(point.0) {
			record.extensions.push(key);
		}
		if let Some(record) = self.extensions.get_mut(key.0) {
			record.point = Some(point);
		}
		Some(point)
	}

	fn relink_orphans(&mut self, point: PointKey, point_id: &str, changes: &mut ChangeSet) {
		for orphan in self.index.take_orphans(point_id) {
			let Some(record) = self.extensions.get_mut(orphan.0) else {
				continue;
			};
			record.point = Some(point);
			changes.extensions.push(ExtensionChange {
				kind: DeltaKind::Added,
				cause: DeltaCause::Linkage,
				key: orphan,
				unique_id: record.unique_id.clone(),
				namespace: record.namespace.clone(),
				point_id: record.point_id.clone(),
				point: Some(point),
				contributor: record.contributor.id().clone(),
			});
			if let Some(point_record) = self.points.get_mut(point.0) {
				point_record.extensions.push(orphan);
			}
		}
	}

	/// Allocates element trees depth-first and returns the root keys in order.
	pub fn alloc_elements(
		&mut self,
		elements: Vec<PlannedElement>,
		parent: ParentKey,
		extension: ExtensionKey,
	) -> Result<Vec<ElementKey>, CapacityExceeded> {
		let mut keys = Vec::with_capacity(elements.len());
		for element in elements {
			let key = ElementKey(self.elements.insert(ElementRecord {
				name: element.name,
				value: element.value,
				attributes: element.attributes,
				children: Vec::new(),
				parent,
				extension,
			})?);
			let children = self.alloc_elements(element.children, ParentKey::Element(key), extension)?;
			if let Some(record) = self.elements.get_mut(key.0) {
				record.children = children;
			}
			keys.push(key);
		}
		Ok(keys)
	}

	/// Everything `contributor` currently owns.
	pub fn select_contributor(&self, contributor: &ContributorId) -> Selection {
		self.index
			.contributor(contributor)
			.map(|entry| Selection {
				points: entry.points.clone(),
				extensions: entry.extensions.clone(),
			})
			.unwrap_or_default()
	}

	/// Detaches the selected records from every index.
	///
	/// Extensions of other contributors attached to a removed point become orphans.
	/// Records stay readable by key until [`Store::reclaim`] runs on the returned set.
	pub fn unlink(&mut self, selection: &Selection) -> ChangeSet {
		let mut changes = ChangeSet::default();
		let removed_points: FxHashSet<PointKey> = selection.points.iter().copied().collect();
		let removed_extensions: FxHashSet<ExtensionKey> = selection.extensions.iter().copied().collect();

		for &key in &selection.extensions {
			let Some(record) = self.extensions.get(key.0) else {
				continue;
			};
			let unique_id = record.unique_id.clone();
			let namespace = record.namespace.clone();
			let point_id = record.point_id.clone();
			let point = record.point;
			let contributor = record.contributor.id().clone();
			let roots = match &record.elements {
				Elements::Loaded(roots) => roots.clone(),
				Elements::Lazy(_) => Vec::new(),
			};

			match point {
				Some(point) if !removed_points.contains(&point) => {
					if let Some(point_record) = self.points.get_mut(point.0) {
						point_record.extensions.retain(|k| *k != key);
					}
				}
				Some(_) => {}
				None => self.index.remove_orphan(&point_id, key),
			}
			self.index
				.remove_extension(key, unique_id.as_deref(), &namespace, &contributor);
			self.collect_subtree(&roots, &mut changes.reclaim.elements);
			changes.reclaim.extensions.push(key);
			changes.extensions.push(ExtensionChange {
				kind: DeltaKind::Removed,
				cause: DeltaCause::Record,
				key,
				unique_id,
				namespace,
				point_id,
				point,
				contributor,
			});
		}

		for &key in &selection.points {
			let Some(record) = self.points.get(key.0) else {
				continue;
			};
			let unique_id = record.unique_id.clone();
			let namespace = record.namespace.clone();
			let contributor = record.contributor.id().clone();
			let attached = record.extensions.clone();

			for orphan in attached.into_iter().filter(|k| !removed_extensions.contains(k)) {
				let Some(ext) = self.extensions.get_mut(orphan.0) else {
					continue;
				};
				ext.point = None;
				changes.extensions.push(ExtensionChange {
					kind: DeltaKind::Removed,
					cause: DeltaCause::Linkage,
					key: orphan,
					unique_id: ext.unique_id.clone(),
					namespace: ext.namespace.clone(),
					point_id: ext.point_id.clone(),
					point: Some(key),
					contributor: ext.contributor.id().clone(),
				});
				self.index.add_orphan(&unique_id, orphan);
			}

			self.index.remove_point(key, &unique_id, &namespace, &contributor);
			changes.reclaim.points.push(key);
			changes.points.push(PointChange {
				kind: DeltaKind::Removed,
				key,
				unique_id,
				namespace,
			});
		}

		changes
	}

	fn collect_subtree(&self, roots: &[ElementKey], out: &mut Vec<ElementKey>) {
		for &key in roots {
			out.push(key);
			if let Some(record) = self.element(key) {
				self.collect_subtree(&record.children, out);
			}
		}
	}

	/// Frees unlinked slots, bumping their generations.
	pub fn reclaim(&mut self, reclaim: Reclaim) {
		for key in reclaim.elements {
			self.elements.remove(key.0);
		}
		// Lazy extensions may have paged in elements after the unlink.
		for key in reclaim.extensions {
			if let Some(ExtensionRecord {
				elements: Elements::Loaded(roots),
				..
			}) = self.extensions.remove(key.0)
			{
				let mut late = Vec::new();
				self.collect_subtree(&roots, &mut late);
				for element in late {
					self.elements.remove(element.0);
				}
			}
		}
		for key in reclaim.points {
			self.points.remove(key.0);
		}
	}

	/// Registers a contributor that owns no records yet. Used when seeding from a cache.
	pub fn register_contributor(&mut self, contributor: &Contributor) {
		self.index.ensure_contributor(contributor);
	}
}
