//! KDL contribution parser.

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::{ContributionDecl, ElementDecl, ExtensionDecl, ExtensionPointDecl, Location, ParseError};

/// Top-level node name declaring an extension point.
pub const EXTENSION_POINT_NODE: &str = "extension-point";
/// Top-level node name declaring an extension.
pub const EXTENSION_NODE: &str = "extension";

/// Parses contribution bytes into declarations.
///
/// Only syntax and shape problems fail here. Missing identifiers and similar structural
/// issues are left in the returned tree (as `None`) for ingestion to diagnose.
pub fn parse_contribution(bytes: &[u8], source_name: &str) -> Result<ContributionDecl, ParseError> {
	let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Encoding {
		source_name: source_name.to_string(),
		offset: e.valid_up_to(),
	})?;
	let doc: KdlDocument = text.parse().map_err(|e: kdl::KdlError| ParseError::Syntax {
		source_name: source_name.to_string(),
		message: e.to_string(),
	})?;

	let root = Location::new(source_name, "");
	let mut decl = ContributionDecl::new(source_name);

	for node in doc.nodes() {
		match node.name().value() {
			EXTENSION_POINT_NODE => {
				let location = root.child(EXTENSION_POINT_NODE, decl.extension_points.len());
				decl.extension_points.push(parse_extension_point(node, location)?);
			}
			EXTENSION_NODE => {
				let location = root.child(EXTENSION_NODE, decl.extensions.len());
				decl.extensions.push(parse_extension(node, location)?);
			}
			other => {
				return Err(ParseError::UnexpectedNode {
					name: other.to_string(),
					location: root.child(other, 0),
				});
			}
		}
	}

	Ok(decl)
}

fn parse_extension_point(node: &KdlNode, location: Location) -> Result<ExtensionPointDecl, ParseError> {
	Ok(ExtensionPointDecl {
		id: prop_or_first_arg(node, "id", &location)?,
		label: prop(node, "label", &location)?,
		schema: prop(node, "schema", &location)?,
		location,
	})
}

fn parse_extension(node: &KdlNode, location: Location) -> Result<ExtensionDecl, ParseError> {
	let elements = match node.children() {
		Some(children) => parse_elements(children, &location)?,
		None => Vec::new(),
	};
	Ok(ExtensionDecl {
		id: prop(node, "id", &location)?,
		label: prop(node, "label", &location)?,
		point: prop_or_first_arg(node, "point", &location)?,
		elements,
		location,
	})
}

fn parse_elements(doc: &KdlDocument, parent: &Location) -> Result<Vec<ElementDecl>, ParseError> {
	let mut elements = Vec::with_capacity(doc.nodes().len());
	for (index, node) in doc.nodes().iter().enumerate() {
		let name = node.name().value().to_string();
		let location = parent.child(&name, index);

		let mut value = None;
		let mut attributes = Vec::new();
		for entry in node.entries() {
			match entry.name() {
				Some(key) => {
					let key = key.value();
					let text = scalar_to_string(entry.value()).ok_or_else(|| ParseError::UnsupportedValue {
						key: key.to_string(),
						location: location.clone(),
					})?;
					attributes.push((key.to_string(), text));
				}
				// Only the first positional argument carries the text value.
				None if value.is_none() => {
					value = Some(scalar_to_string(entry.value()).ok_or_else(|| ParseError::UnsupportedValue {
						key: name.clone(),
						location: location.clone(),
					})?);
				}
				None => {}
			}
		}

		let children = match node.children() {
			Some(children) => parse_elements(children, &location)?,
			None => Vec::new(),
		};

		elements.push(ElementDecl {
			name,
			value,
			attributes,
			children,
			location,
		});
	}
	Ok(elements)
}

fn prop(node: &KdlNode, key: &str, location: &Location) -> Result<Option<String>, ParseError> {
	match node.get(key) {
		Some(value) => scalar_to_string(value)
			.map(Some)
			.ok_or_else(|| ParseError::UnsupportedValue {
				key: key.to_string(),
				location: location.clone(),
			}),
		None => Ok(None),
	}
}

fn prop_or_first_arg(node: &KdlNode, key: &str, location: &Location) -> Result<Option<String>, ParseError> {
	if let Some(found) = prop(node, key, location)? {
		return Ok(Some(found));
	}
	match node.entry(0) {
		Some(entry) => scalar_to_string(entry.value())
			.map(Some)
			.ok_or_else(|| ParseError::UnsupportedValue {
				key: key.to_string(),
				location: location.clone(),
			}),
		None => Ok(None),
	}
}

/// Renders a scalar as attribute text. `null` has no text form.
fn scalar_to_string(value: &KdlValue) -> Option<String> {
	if let Some(s) = value.as_string() {
		Some(s.to_string())
	} else if let Some(i) = value.as_integer() {
		Some(i.to_string())
	} else if let Some(f) = value.as_float() {
		Some(f.to_string())
	} else {
		value.as_bool().map(|b| b.to_string())
	}
}
