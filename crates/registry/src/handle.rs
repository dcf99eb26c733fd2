//! Handles to registry records.
//!
//! # Purpose
//!
//! [`ExtensionPoint`], [`Extension`] and [`ConfigurationElement`] are what callers hold.
//! Each is a registry reference plus a generation-tagged key. Handles are cheap to clone
//! and compare equal iff they name the same record of the same registry.
//!
//! # Invariants
//!
//! * Every accessor takes the store read section and checks the key's generation before
//!   touching the record. A removed record yields [`RegistryError::InvalidObject`].
//! * Between unlink and reclaim (the listener callback of that removal) the record is
//!   still in its arena, so accessors keep succeeding.
//! * No accessor returns a reference into the store. Strings are shared `Arc<str>`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::contributor::Contributor;
use crate::core::{ElementKey, ExtensionKey, PointKey};
use crate::error::{ObjectKind, RegistryError};
use crate::registry::{Shared, invalid};
use crate::store::{ElementRecord, ExtensionRecord, ParentKey, PointRecord, Store};

macro_rules! handle_identity {
	($name:ident, $kind:literal) => {
		impl PartialEq for $name {
			fn eq(&self, other: &Self) -> bool {
				self.key == other.key && Arc::ptr_eq(&self.shared, &other.shared)
			}
		}

		impl Eq for $name {}

		impl Hash for $name {
			fn hash<H: Hasher>(&self, state: &mut H) {
				Arc::as_ptr(&self.shared).hash(state);
				self.key.hash(state);
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, concat!($kind, "({}@{})"), self.key.slot(), self.shared.name)
			}
		}
	};
}

/// Handle to an extension point.
#[derive(Clone)]
pub struct ExtensionPoint {
	shared: Arc<Shared>,
	key: PointKey,
}

handle_identity!(ExtensionPoint, "ExtensionPoint");

impl ExtensionPoint {
	pub(crate) fn new(shared: Arc<Shared>, key: PointKey) -> Self {
		Self { shared, key }
	}

	pub fn key(&self) -> PointKey {
		self.key
	}

	pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
		Arc::ptr_eq(&self.shared, shared)
	}

	fn read<R>(&self, f: impl FnOnce(&Store, &PointRecord) -> R) -> Result<R, RegistryError> {
		let store = self.shared.store.read();
		let record = store
			.point(self.key)
			.ok_or_else(|| invalid(ObjectKind::ExtensionPoint, self.key.slot()))?;
		Ok(f(&store, record))
	}

	pub fn is_valid(&self) -> bool {
		self.shared.store.read().point(self.key).is_some()
	}

	/// Fully qualified identifier, `namespace.simple`.
	pub fn unique_identifier(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|_, r| r.unique_id.clone())
	}

	pub fn simple_identifier(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|_, r| r.simple_id.clone())
	}

	pub fn namespace(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|_, r| r.namespace.clone())
	}

	pub fn label(&self) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|_, r| r.label.clone())
	}

	pub fn schema_reference(&self) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|_, r| r.schema.clone())
	}

	pub fn contributor(&self) -> Result<Contributor, RegistryError> {
		self.read(|_, r| r.contributor.clone())
	}

	/// Attached extensions in attachment order.
	pub fn extensions(&self) -> Result<Vec<Extension>, RegistryError> {
		let keys = self.read(|_, r| r.extensions.clone())?;
		Ok(keys.into_iter().map(|k| Extension::new(self.shared.clone(), k)).collect())
	}

	/// The attached extension with qualified identifier `id`.
	pub fn extension(&self, id: &str) -> Result<Option<Extension>, RegistryError> {
		let key = self.read(|store, r| {
			r.extensions
				.iter()
				.copied()
				.find(|k| store.extension(*k).and_then(|e| e.unique_id.as_deref()) == Some(id))
		})?;
		Ok(key.map(|k| Extension::new(self.shared.clone(), k)))
	}

	/// Root elements of every attached extension, extension by extension.
	pub fn configuration_elements(&self) -> Result<Vec<ConfigurationElement>, RegistryError> {
		let mut out = Vec::new();
		for extension in self.extensions()? {
			out.extend(extension.configuration_elements()?);
		}
		Ok(out)
	}
}

/// Handle to an extension.
#[derive(Clone)]
pub struct Extension {
	shared: Arc<Shared>,
	key: ExtensionKey,
}

handle_identity!(Extension, "Extension");

impl Extension {
	pub(crate) fn new(shared: Arc<Shared>, key: ExtensionKey) -> Self {
		Self { shared, key }
	}

	pub fn key(&self) -> ExtensionKey {
		self.key
	}

	pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
		Arc::ptr_eq(&self.shared, shared)
	}

	fn read<R>(&self, f: impl FnOnce(&ExtensionRecord) -> R) -> Result<R, RegistryError> {
		let store = self.shared.store.read();
		let record = store
			.extension(self.key)
			.ok_or_else(|| invalid(ObjectKind::Extension, self.key.slot()))?;
		Ok(f(record))
	}

	pub fn is_valid(&self) -> bool {
		self.shared.store.read().extension(self.key).is_some()
	}

	/// Qualified identifier, or `None` for an anonymous extension.
	pub fn unique_identifier(&self) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|r| r.unique_id.clone())
	}

	pub fn simple_identifier(&self) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|r| r.simple_id.clone())
	}

	pub fn namespace(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|r| r.namespace.clone())
	}

	pub fn label(&self) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|r| r.label.clone())
	}

	pub fn contributor(&self) -> Result<Contributor, RegistryError> {
		self.read(|r| r.contributor.clone())
	}

	/// Qualified identifier of the targeted extension point, live or not.
	pub fn extension_point_unique_identifier(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|r| r.point_id.clone())
	}

	/// The point this extension is attached to, or `None` while orphaned.
	pub fn extension_point(&self) -> Result<Option<ExtensionPoint>, RegistryError> {
		let key = self.read(|r| r.point)?;
		Ok(key.map(|k| ExtensionPoint::new(self.shared.clone(), k)))
	}

	pub fn is_orphaned(&self) -> Result<bool, RegistryError> {
		self.read(|r| r.point.is_none())
	}

	/// Root configuration elements in declaration order.
	pub fn configuration_elements(&self) -> Result<Vec<ConfigurationElement>, RegistryError> {
		let roots = self.shared.element_roots(self.key)?;
		Ok(roots
			.into_iter()
			.map(|k| ConfigurationElement::new(self.shared.clone(), k))
			.collect())
	}
}

/// Parent of a configuration element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementParent {
	Extension(Extension),
	Element(ConfigurationElement),
}

/// Handle to a configuration element.
#[derive(Clone)]
pub struct ConfigurationElement {
	shared: Arc<Shared>,
	key: ElementKey,
}

handle_identity!(ConfigurationElement, "ConfigurationElement");

impl ConfigurationElement {
	pub(crate) fn new(shared: Arc<Shared>, key: ElementKey) -> Self {
		Self { shared, key }
	}

	pub fn key(&self) -> ElementKey {
		self.key
	}

	fn read<R>(&self, f: impl FnOnce(&Store, &ElementRecord) -> R) -> Result<R, RegistryError> {
		let store = self.shared.store.read();
		let record = store
			.element(self.key)
			.ok_or_else(|| invalid(ObjectKind::ConfigurationElement, self.key.slot()))?;
		Ok(f(&store, record))
	}

	fn wrap(&self, keys: Vec<ElementKey>) -> Vec<ConfigurationElement> {
		keys.into_iter()
			.map(|k| ConfigurationElement::new(self.shared.clone(), k))
			.collect()
	}

	pub fn is_valid(&self) -> bool {
		self.shared.store.read().element(self.key).is_some()
	}

	pub fn name(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|_, r| r.name.clone())
	}

	/// Text value. `None` when the element has no text, `Some("")` when it is empty.
	pub fn value(&self) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|_, r| r.value.clone())
	}

	pub fn attribute(&self, key: &str) -> Result<Option<Arc<str>>, RegistryError> {
		self.read(|_, r| r.attribute(key).cloned())
	}

	/// Attribute keys in declaration order.
	pub fn attribute_names(&self) -> Result<Vec<Arc<str>>, RegistryError> {
		self.read(|_, r| r.attributes.iter().map(|(k, _)| k.clone()).collect())
	}

	pub fn attributes(&self) -> Result<Vec<(Arc<str>, Arc<str>)>, RegistryError> {
		self.read(|_, r| r.attributes.clone())
	}

	pub fn children(&self) -> Result<Vec<ConfigurationElement>, RegistryError> {
		let keys = self.read(|_, r| r.children.clone())?;
		Ok(self.wrap(keys))
	}

	pub fn children_named(&self, name: &str) -> Result<Vec<ConfigurationElement>, RegistryError> {
		let keys = self.read(|store, r| {
			r.children
				.iter()
				.copied()
				.filter(|k| store.element(*k).is_some_and(|c| &*c.name == name))
				.collect()
		})?;
		Ok(self.wrap(keys))
	}

	pub fn parent(&self) -> Result<ElementParent, RegistryError> {
		let parent = self.read(|_, r| r.parent)?;
		Ok(match parent {
			ParentKey::Extension(key) => ElementParent::Extension(Extension::new(self.shared.clone(), key)),
			ParentKey::Element(key) => ElementParent::Element(ConfigurationElement::new(self.shared.clone(), key)),
		})
	}

	pub fn declaring_extension(&self) -> Result<Extension, RegistryError> {
		let key = self.read(|_, r| r.extension)?;
		Ok(Extension::new(self.shared.clone(), key))
	}

	/// Namespace of the declaring extension.
	pub fn namespace(&self) -> Result<Arc<str>, RegistryError> {
		self.read(|store, r| store.extension(r.extension).map(|e| e.namespace.clone()))?
			.ok_or_else(|| invalid(ObjectKind::ConfigurationElement, self.key.slot()))
	}

	pub fn contributor(&self) -> Result<Contributor, RegistryError> {
		self.read(|store, r| store.extension(r.extension).map(|e| e.contributor.clone()))?
			.ok_or_else(|| invalid(ObjectKind::ConfigurationElement, self.key.slot()))
	}
}
