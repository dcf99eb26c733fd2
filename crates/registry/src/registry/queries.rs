use std::sync::Arc;

use super::ExtensionRegistry;
use crate::contributor::{Contributor, ContributorId};
use crate::core::{ExtensionKey, PointKey};
use crate::error::RegistryError;
use crate::handle::{ConfigurationElement, Extension, ExtensionPoint};

impl ExtensionRegistry {
	fn point_handles(&self, keys: impl IntoIterator<Item = PointKey>) -> Vec<ExtensionPoint> {
		keys.into_iter()
			.map(|k| ExtensionPoint::new(self.shared.clone(), k))
			.collect()
	}

	fn extension_handles(&self, keys: impl IntoIterator<Item = ExtensionKey>) -> Vec<Extension> {
		keys.into_iter()
			.map(|k| Extension::new(self.shared.clone(), k))
			.collect()
	}

	/// Extension point by qualified identifier.
	pub fn extension_point(&self, id: &str) -> Option<ExtensionPoint> {
		let key = self.shared.store.read().index.point_by_id(id)?;
		Some(ExtensionPoint::new(self.shared.clone(), key))
	}

	/// Extension point `name` in `namespace`.
	pub fn extension_point_in(&self, namespace: &str, name: &str) -> Option<ExtensionPoint> {
		self.extension_point(&format!("{namespace}.{name}"))
	}

	/// Every extension point, namespace by namespace.
	pub fn extension_points(&self) -> Vec<ExtensionPoint> {
		let keys: Vec<PointKey> = {
			let store = self.shared.store.read();
			store
				.index
				.namespaces()
				.flat_map(|(_, entry)| entry.points.iter().copied())
				.collect()
		};
		self.point_handles(keys)
	}

	pub fn extension_points_in(&self, namespace: &str) -> Vec<ExtensionPoint> {
		let keys = self
			.shared
			.store
			.read()
			.index
			.namespace(namespace)
			.map(|entry| entry.points.clone())
			.unwrap_or_default();
		self.point_handles(keys)
	}

	/// Extension points supplied by `contributor`, in contribution order.
	pub fn extension_points_for(&self, contributor: &ContributorId) -> Vec<ExtensionPoint> {
		let keys = self
			.shared
			.store
			.read()
			.index
			.contributor(contributor)
			.map(|entry| entry.points.clone())
			.unwrap_or_default();
		self.point_handles(keys)
	}

	/// Identified extension by qualified identifier, attached or not.
	pub fn extension(&self, id: &str) -> Option<Extension> {
		let key = self.shared.store.read().index.extension_by_id(id)?;
		Some(Extension::new(self.shared.clone(), key))
	}

	/// Extension `extension_id` as attached to `point_id`. Orphans are not returned.
	pub fn extension_for_point(&self, point_id: &str, extension_id: &str) -> Option<Extension> {
		let key = {
			let store = self.shared.store.read();
			let point = store.index.point_by_id(point_id)?;
			let key = store.index.extension_by_id(extension_id)?;
			(store.extension(key)?.point == Some(point)).then_some(key)?
		};
		Some(Extension::new(self.shared.clone(), key))
	}

	/// Extensions whose own namespace is `namespace`, attached or not.
	pub fn extensions_in(&self, namespace: &str) -> Vec<Extension> {
		let keys = self
			.shared
			.store
			.read()
			.index
			.namespace(namespace)
			.map(|entry| entry.extensions.clone())
			.unwrap_or_default();
		self.extension_handles(keys)
	}

	pub fn extensions_for(&self, contributor: &ContributorId) -> Vec<Extension> {
		let keys = self
			.shared
			.store
			.read()
			.index
			.contributor(contributor)
			.map(|entry| entry.extensions.clone())
			.unwrap_or_default();
		self.extension_handles(keys)
	}

	/// Namespaces holding at least one live record, sorted.
	pub fn namespaces(&self) -> Vec<Arc<str>> {
		self.shared.store.read().index.namespaces().map(|(ns, _)| ns.clone()).collect()
	}

	/// Contributors owning at least one live record, in first-contribution order.
	pub fn contributors(&self) -> Vec<Contributor> {
		self.shared
			.store
			.read()
			.index
			.contributors()
			.map(|entry| entry.contributor.clone())
			.collect()
	}

	/// Root elements of every extension attached to `point_id`.
	///
	/// An unknown point yields an empty list. Fails only when a lazy element tree cannot
	/// be paged in, or when the point is removed concurrently.
	pub fn configuration_elements_for(&self, point_id: &str) -> Result<Vec<ConfigurationElement>, RegistryError> {
		match self.extension_point(point_id) {
			Some(point) => point.configuration_elements(),
			None => Ok(Vec::new()),
		}
	}

	pub fn configuration_elements_for_in(
		&self,
		namespace: &str,
		point_name: &str,
	) -> Result<Vec<ConfigurationElement>, RegistryError> {
		self.configuration_elements_for(&format!("{namespace}.{point_name}"))
	}
}
