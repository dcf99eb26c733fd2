//! Provisional declaration tree produced by parsing a contribution.

use std::fmt;

/// Best-effort position of a declaration inside its contribution source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
	/// Name of the contribution source (usually a file name).
	pub source_name: String,
	/// Node path inside the document, e.g. `extension[1]/action[0]`.
	pub path: String,
}

impl Location {
	pub fn new(source_name: impl Into<String>, path: impl Into<String>) -> Self {
		Self {
			source_name: source_name.into(),
			path: path.into(),
		}
	}

	/// Location of a child node named `name` at sibling position `index`.
	pub fn child(&self, name: &str, index: usize) -> Self {
		let path = if self.path.is_empty() {
			format!("{name}[{index}]")
		} else {
			format!("{}/{name}[{index}]", self.path)
		};
		Self {
			source_name: self.source_name.clone(),
			path,
		}
	}
}

impl fmt::Display for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.source_name.is_empty(), self.path.is_empty()) {
			(true, true) => f.write_str("<contribution>"),
			(false, true) => f.write_str(&self.source_name),
			(true, false) => f.write_str(&self.path),
			(false, false) => write!(f, "{}:{}", self.source_name, self.path),
		}
	}
}

/// Everything one contribution declares, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContributionDecl {
	pub source_name: String,
	pub extension_points: Vec<ExtensionPointDecl>,
	pub extensions: Vec<ExtensionDecl>,
}

impl ContributionDecl {
	pub fn new(source_name: impl Into<String>) -> Self {
		Self {
			source_name: source_name.into(),
			..Self::default()
		}
	}

	/// Appends an extension point, filling in its location when unset.
	pub fn with_extension_point(mut self, mut decl: ExtensionPointDecl) -> Self {
		if decl.location == Location::default() {
			decl.location = Location::new(&self.source_name, "")
				.child(crate::EXTENSION_POINT_NODE, self.extension_points.len());
		}
		self.extension_points.push(decl);
		self
	}

	/// Appends an extension, filling in locations of it and its elements when unset.
	pub fn with_extension(mut self, mut decl: ExtensionDecl) -> Self {
		if decl.location == Location::default() {
			decl.location = Location::new(&self.source_name, "")
				.child(crate::EXTENSION_NODE, self.extensions.len());
			let parent = decl.location.clone();
			assign_locations(&mut decl.elements, &parent);
		}
		self.extensions.push(decl);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.extension_points.is_empty() && self.extensions.is_empty()
	}
}

fn assign_locations(elements: &mut [ElementDecl], parent: &Location) {
	for (index, element) in elements.iter_mut().enumerate() {
		if element.location == Location::default() {
			element.location = parent.child(&element.name, index);
		}
		let here = element.location.clone();
		assign_locations(&mut element.children, &here);
	}
}

/// A declared extension point.
///
/// `id` may be simple (`xptA`, qualified later with the contributor namespace) or
/// qualified (`org.example.xptA`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionPointDecl {
	pub id: Option<String>,
	pub label: Option<String>,
	pub schema: Option<String>,
	pub location: Location,
}

impl ExtensionPointDecl {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: Some(id.into()),
			..Self::default()
		}
	}

	pub fn label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn schema(mut self, schema: impl Into<String>) -> Self {
		self.schema = Some(schema.into());
		self
	}
}

/// A declared extension targeting `point`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionDecl {
	pub id: Option<String>,
	pub label: Option<String>,
	pub point: Option<String>,
	pub elements: Vec<ElementDecl>,
	pub location: Location,
}

impl ExtensionDecl {
	pub fn new(point: impl Into<String>) -> Self {
		Self {
			point: Some(point.into()),
			..Self::default()
		}
	}

	pub fn id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}

	pub fn element(mut self, element: ElementDecl) -> Self {
		self.elements.push(element);
		self
	}
}

/// A declared configuration element.
///
/// `value: None` (no text) and `value: Some("")` (empty text) are different states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementDecl {
	pub name: String,
	pub value: Option<String>,
	/// Attributes in declaration order. Duplicates are kept so ingestion can reject them.
	pub attributes: Vec<(String, String)>,
	pub children: Vec<ElementDecl>,
	pub location: Location,
}

impl ElementDecl {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	pub fn value(mut self, value: impl Into<String>) -> Self {
		self.value = Some(value.into());
		self
	}

	pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.push((key.into(), value.into()));
		self
	}

	pub fn child(mut self, child: ElementDecl) -> Self {
		self.children.push(child);
		self
	}

	/// Number of elements in this subtree, including `self`.
	pub fn subtree_len(&self) -> usize {
		1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
	}
}
