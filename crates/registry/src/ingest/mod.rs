//! Contribution ingestion.
//!
//! # Purpose
//!
//! Turns a parsed [`ContributionDecl`] into a [`ContributionPlan`]: every record the
//! contribution will create, with identifiers qualified against the contributor
//! namespace. Planning is pure. It runs outside every store section and never touches
//! the registry, so a refused contribution has no side effects by construction.
//!
//! # Invariants
//!
//! * A plan only exists for a contribution that passed every structural rule. Collisions
//!   with live records are the only check left for commit time.
//! * Identifiers inside one plan are unique among its points and among its identified
//!   extensions.
//! * Every qualified extension-point and extension identifier contains a `.`.

mod validate;


use std::sync::Arc;

use rustc_hash::FxHashSet;
use trellis_registry_spec::{ContributionDecl, ElementDecl, EXTENSION_NODE, EXTENSION_POINT_NODE};

use crate::contributor::Contributor;
use crate::error::ContributionError;
pub(crate) use validate::{Qualified, namespace_of, qualify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedPoint {
	pub id: Qualified,
	pub label: Option<Arc<str>>,
	pub schema: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedExtension {
	pub id: Option<Qualified>,
	pub namespace: Arc<str>,
	pub label: Option<Arc<str>>,
	pub point_id: Arc<str>,
	pub elements: Vec<PlannedElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedElement {
	pub name: Arc<str>,
	pub value: Option<Arc<str>>,
	pub attributes: Vec<(Arc<str>, Arc<str>)>,
	pub children: Vec<PlannedElement>,
}

impl PlannedElement {
	fn from_decl(decl: &ElementDecl) -> Self {
		Self {
			name: Arc::from(decl.name.as_str()),
			value: decl.value.as_deref().map(Arc::from),
			attributes: decl
				.attributes
				.iter()
				.map(|(k, v)| (Arc::from(k.as_str()), Arc::from(v.as_str())))
				.collect(),
			children: decl.children.iter().map(Self::from_decl).collect(),
		}
	}

	/// This element plus all of its descendants.
	pub fn subtree_len(&self) -> usize {
		1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
	}
}

/// Validated records of one contribution, ready to commit.
#[derive(Debug, Clone)]
pub(crate) struct ContributionPlan {
	pub contributor: Contributor,
	pub points: Vec<PlannedPoint>,
	pub extensions: Vec<PlannedExtension>,
	pub persist: bool,
}

impl ContributionPlan {
	pub fn is_empty(&self) -> bool {
		self.points.is_empty() && self.extensions.is_empty()
	}
}

/// Validates `decl` for `contributor` and resolves its identifiers.
///
/// Returns the first rule violation found, in document order.
pub(crate) fn plan(
	decl: &ContributionDecl,
	contributor: &Contributor,
	persist: bool,
) -> Result<ContributionPlan, ContributionError> {
	validate::check_policy(contributor)?;
	let default_namespace = contributor.namespace();

	let mut point_ids = FxHashSet::default();
	let mut points = Vec::with_capacity(decl.extension_points.len());
	for point in &decl.extension_points {
		let id = point.id.as_deref().ok_or_else(|| ContributionError::MissingAttribute {
			location: point.location.clone(),
			node: EXTENSION_POINT_NODE,
			attribute: "id",
		})?;
		let id = qualify(validate::check_identifier(id, &point.location)?, &default_namespace);
		if !point_ids.insert(id.unique_id.clone()) {
			return Err(ContributionError::DuplicateExtensionPoint {
				id: id.unique_id,
				owner: contributor.id().clone(),
			});
		}
		points.push(PlannedPoint {
			id,
			label: point.label.as_deref().map(Arc::from),
			schema: point.schema.as_deref().map(Arc::from),
		});
	}

	let mut extension_ids = FxHashSet::default();
	let mut extensions = Vec::with_capacity(decl.extensions.len());
	for extension in &decl.extensions {
		let target = extension.point.as_deref().ok_or_else(|| ContributionError::MissingAttribute {
			location: extension.location.clone(),
			node: EXTENSION_NODE,
			attribute: "point",
		})?;
		let point_id = qualify(validate::check_identifier(target, &extension.location)?, &default_namespace).unique_id;

		let id = match extension.id.as_deref() {
			Some(id) => Some(qualify(validate::check_identifier(id, &extension.location)?, &default_namespace)),
			None => None,
		};
		if let Some(id) = &id
			&& !extension_ids.insert(id.unique_id.clone())
		{
			return Err(ContributionError::DuplicateExtension {
				id: id.unique_id.clone(),
				owner: contributor.id().clone(),
			});
		}

		validate::check_elements(&extension.elements)?;

		extensions.push(PlannedExtension {
			namespace: id.as_ref().map_or_else(|| default_namespace.clone(), |id| id.namespace.clone()),
			id,
			label: extension.label.as_deref().map(Arc::from),
			point_id,
			elements: extension.elements.iter().map(PlannedElement::from_decl).collect(),
		});
	}

	Ok(ContributionPlan {
		contributor: contributor.clone(),
		points,
		extensions,
		persist,
	})
}
