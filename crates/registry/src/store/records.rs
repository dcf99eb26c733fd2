use std::sync::Arc;

use crate::contributor::Contributor;
use crate::core::{ElementKey, ExtensionKey, PointKey};

/// Position of an extension's element trees inside the lazy cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LazyRef {
	pub offset: u64,
	pub len: u64,
}

pub(crate) struct PointRecord {
	pub unique_id: Arc<str>,
	pub simple_id: Arc<str>,
	pub namespace: Arc<str>,
	pub label: Option<Arc<str>>,
	pub schema: Option<Arc<str>>,
	pub contributor: Contributor,
	/// Attached extensions in attachment order.
	pub extensions: Vec<ExtensionKey>,
	pub persist: bool,
}

pub(crate) enum Elements {
	Loaded(Vec<ElementKey>),
	Lazy(LazyRef),
}

pub(crate) struct ExtensionRecord {
	pub unique_id: Option<Arc<str>>,
	pub simple_id: Option<Arc<str>>,
	pub namespace: Arc<str>,
	pub label: Option<Arc<str>>,
	pub point_id: Arc<str>,
	/// Resolved target; `None` while orphaned.
	pub point: Option<PointKey>,
	pub contributor: Contributor,
	pub elements: Elements,
	pub persist: bool,
}

/// Weak back-reference to an element's parent. Never used for ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParentKey {
	Extension(ExtensionKey),
	Element(ElementKey),
}

pub(crate) struct ElementRecord {
	pub name: Arc<str>,
	pub value: Option<Arc<str>>,
	pub attributes: Vec<(Arc<str>, Arc<str>)>,
	pub children: Vec<ElementKey>,
	pub parent: ParentKey,
	pub extension: ExtensionKey,
}

impl ElementRecord {
	pub fn attribute(&self, key: &str) -> Option<&Arc<str>> {
		self.attributes.iter().find(|(k, _)| &**k == key).map(|(_, v)| v)
	}
}
