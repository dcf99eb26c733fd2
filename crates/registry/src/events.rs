//! Change events and listener fan-out.
//!
//! # Purpose
//!
//! Every mutating call that changes the registry produces one [`RegistryChangeEvent`].
//! The event groups deltas by the namespace of the extension point involved and is
//! delivered synchronously on the mutating thread.
//!
//! # Invariants
//!
//! * Handles carried by an event stay readable for the whole delivery, including handles
//!   to records that the event reports as removed.
//! * A panicking listener never prevents delivery to the remaining listeners and never
//!   rolls back the mutation.
//!
//! # Concurrency
//!
//! The listener list is an [`ArcSwap`] snapshot. Delivery iterates a loaded snapshot, so
//! listeners may add or remove listeners from inside a callback; the change applies to
//! the next event.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use crate::contributor::ContributorId;
use crate::handle::{Extension, ExtensionPoint};
use crate::store::ChangeSet;

/// Whether a record or a linkage appeared or disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
	Added,
	Removed,
}

/// What an extension delta describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaCause {
	/// The extension record itself was added or removed.
	Record,
	/// The record stayed, but it was attached to or detached from its extension point.
	Linkage,
}

#[derive(Debug, Clone)]
pub struct ExtensionDelta {
	pub kind: DeltaKind,
	pub cause: DeltaCause,
	pub extension: Extension,
	/// Qualified target identifier. Always set, even for orphans.
	pub extension_point_id: Arc<str>,
	/// Target point, when the extension is or was attached to a live one.
	pub extension_point: Option<ExtensionPoint>,
}

#[derive(Debug, Clone)]
pub struct ExtensionPointDelta {
	pub kind: DeltaKind,
	pub extension_point: ExtensionPoint,
}

/// Deltas of one namespace, in the order they were applied.
#[derive(Debug, Clone, Default)]
pub struct NamespaceDelta {
	pub extension_points: Vec<ExtensionPointDelta>,
	pub extensions: Vec<ExtensionDelta>,
}

/// Everything one mutating call changed, keyed by extension-point namespace.
#[derive(Debug, Clone, Default)]
pub struct RegistryChangeEvent {
	deltas: BTreeMap<Arc<str>, NamespaceDelta>,
}

impl RegistryChangeEvent {
	pub(crate) fn push_point(&mut self, namespace: Arc<str>, delta: ExtensionPointDelta) {
		self.deltas.entry(namespace).or_default().extension_points.push(delta);
	}

	pub(crate) fn push_extension(&mut self, namespace: Arc<str>, delta: ExtensionDelta) {
		self.deltas.entry(namespace).or_default().extensions.push(delta);
	}

	pub fn is_empty(&self) -> bool {
		self.deltas.is_empty()
	}

	/// Namespaces touched by this event, sorted.
	pub fn namespaces(&self) -> impl Iterator<Item = &str> + '_ {
		self.deltas.keys().map(|ns| &**ns)
	}

	pub fn namespace(&self, namespace: &str) -> Option<&NamespaceDelta> {
		self.deltas.get(namespace)
	}

	pub fn extension_deltas(&self, namespace: &str) -> &[ExtensionDelta] {
		self.deltas.get(namespace).map_or(&[], |d| d.extensions.as_slice())
	}

	pub fn extension_point_deltas(&self, namespace: &str) -> &[ExtensionPointDelta] {
		self.deltas.get(namespace).map_or(&[], |d| d.extension_points.as_slice())
	}

	/// All extension deltas across namespaces.
	pub fn all_extension_deltas(&self) -> impl Iterator<Item = &ExtensionDelta> + '_ {
		self.deltas.values().flat_map(|d| d.extensions.iter())
	}

	/// All extension-point deltas across namespaces.
	pub fn all_extension_point_deltas(&self) -> impl Iterator<Item = &ExtensionPointDelta> + '_ {
		self.deltas.values().flat_map(|d| d.extension_points.iter())
	}

	/// The part of this event that concerns `namespace`, or `None` if it has no deltas there.
	pub fn restricted_to(&self, namespace: &str) -> Option<RegistryChangeEvent> {
		let (ns, delta) = self.deltas.get_key_value(namespace)?;
		let mut deltas = BTreeMap::new();
		deltas.insert(ns.clone(), delta.clone());
		Some(Self { deltas })
	}
}

/// Receives registry change events.
///
/// Callbacks run on the mutating thread while the removed records are still readable.
/// A listener must not mutate the registry on behalf of the contributor whose change it
/// is observing.
pub trait RegistryChangeListener: Send + Sync {
	fn registry_changed(&self, event: &RegistryChangeEvent);
}

impl<F> RegistryChangeListener for F
where
	F: Fn(&RegistryChangeEvent) + Send + Sync,
{
	fn registry_changed(&self, event: &RegistryChangeEvent) {
		self(event)
	}
}

/// Registration handle returned by `add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct ListenerEntry {
	id: ListenerId,
	namespace: Option<Arc<str>>,
	listener: Arc<dyn RegistryChangeListener>,
}

pub(crate) struct Listeners {
	entries: ArcSwap<Vec<Arc<ListenerEntry>>>,
	next_id: AtomicU64,
}

impl Default for Listeners {
	fn default() -> Self {
		Self {
			entries: ArcSwap::from_pointee(Vec::new()),
			next_id: AtomicU64::new(1),
		}
	}
}

impl Listeners {
	pub fn add(&self, listener: Arc<dyn RegistryChangeListener>, namespace: Option<&str>) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let entry = Arc::new(ListenerEntry {
			id,
			namespace: namespace.map(Arc::from),
			listener,
		});
		self.entries.rcu(|current| {
			let mut next = Vec::clone(current);
			next.push(entry.clone());
			next
		});
		id
	}

	pub fn remove(&self, id: ListenerId) -> bool {
		let previous = self.entries.rcu(|current| {
			current.iter().filter(|entry| entry.id != id).cloned().collect::<Vec<_>>()
		});
		previous.iter().any(|entry| entry.id == id)
	}

	pub fn clear(&self) {
		self.entries.store(Arc::new(Vec::new()));
	}

	pub fn len(&self) -> usize {
		self.entries.load().len()
	}

	/// Delivers `event` to every listener whose filter matches, in registration order.
	pub fn deliver(&self, registry: &str, event: &RegistryChangeEvent) {
		if event.is_empty() {
			return;
		}
		let entries = self.entries.load_full();
		for entry in entries.iter() {
			let result = match &entry.namespace {
				None => catch_unwind(AssertUnwindSafe(|| entry.listener.registry_changed(event))),
				Some(namespace) => match event.restricted_to(namespace) {
					Some(filtered) => catch_unwind(AssertUnwindSafe(|| entry.listener.registry_changed(&filtered))),
					None => continue,
				},
			};
			if result.is_err() {
				tracing::error!(
					registry,
					listener = entry.id.0,
					"registry change listener panicked; continuing delivery"
				);
			}
		}
	}
}

/// Identity of an extension named in a [`Delta`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionSummary {
	/// Qualified identifier. `None` for anonymous extensions.
	pub unique_id: Option<Arc<str>>,
	pub namespace: Arc<str>,
	pub point_id: Arc<str>,
	pub contributor: ContributorId,
}

/// Summary of one mutating call, returned to the caller.
///
/// Unlike [`RegistryChangeEvent`] this carries identifiers only, so it stays meaningful
/// after removed records have been reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
	pub added_extension_points: Vec<Arc<str>>,
	pub removed_extension_points: Vec<Arc<str>>,
	pub added_extensions: Vec<ExtensionSummary>,
	pub removed_extensions: Vec<ExtensionSummary>,
	/// Existing extensions that were attached to a newly added point.
	pub attached: Vec<ExtensionSummary>,
	/// Extensions of other contributors detached from a removed point.
	pub orphaned: Vec<ExtensionSummary>,
}

impl Delta {
	pub(crate) fn from_changes(changes: &ChangeSet) -> Self {
		let mut delta = Self::default();
		for point in &changes.points {
			match point.kind {
				DeltaKind::Added => delta.added_extension_points.push(point.unique_id.clone()),
				DeltaKind::Removed => delta.removed_extension_points.push(point.unique_id.clone()),
			}
		}
		for ext in &changes.extensions {
			let summary = ExtensionSummary {
				unique_id: ext.unique_id.clone(),
				namespace: ext.namespace.clone(),
				point_id: ext.point_id.clone(),
				contributor: ext.contributor.clone(),
			};
			match (ext.kind, ext.cause) {
				(DeltaKind::Added, DeltaCause::Record) => delta.added_extensions.push(summary),
				(DeltaKind::Removed, DeltaCause::Record) => delta.removed_extensions.push(summary),
				(DeltaKind::Added, DeltaCause::Linkage) => delta.attached.push(summary),
				(DeltaKind::Removed, DeltaCause::Linkage) => delta.orphaned.push(summary),
			}
		}
		delta
	}

	pub fn is_empty(&self) -> bool {
		self.added_extension_points.is_empty()
			&& self.removed_extension_points.is_empty()
			&& self.added_extensions.is_empty()
			&& self.removed_extensions.is_empty()
			&& self.attached.is_empty()
			&& self.orphaned.is_empty()
	}
}
