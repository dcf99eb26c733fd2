//! Structural rules applied to a declaration tree before anything is committed.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use trellis_registry_spec::{ElementDecl, Location};

use crate::contributor::{Contributor, ContributorOrigin};
use crate::error::ContributionError;

/// Refuses non-singleton modules and fragments attached to non-singleton hosts.
pub(crate) fn check_policy(contributor: &Contributor) -> Result<(), ContributionError> {
	match contributor.origin() {
		ContributorOrigin::Module { singleton: false } => Err(ContributionError::NonSingleton {
			contributor: contributor.id().clone(),
		}),
		ContributorOrigin::Fragment {
			host_id,
			host_singleton: false,
			..
		} => Err(ContributionError::NonSingletonHost {
			contributor: contributor.id().clone(),
			host: host_id.clone(),
		}),
		_ => Ok(()),
	}
}

/// Returns the identifier if it is legal.
///
/// Legal identifiers are non-empty, contain no whitespace, and have no empty segment
/// between dots.
pub(crate) fn check_identifier<'a>(id: &'a str, location: &Location) -> Result<&'a str, ContributionError> {
	let legal = !id.is_empty() && !id.chars().any(char::is_whitespace) && id.split('.').all(|segment| !segment.is_empty());
	if legal {
		Ok(id)
	} else {
		Err(ContributionError::InvalidIdentifier {
			location: location.clone(),
			id: id.to_owned(),
		})
	}
}

/// Checks element names and attribute uniqueness over a whole element tree.
pub(crate) fn check_elements(elements: &[ElementDecl]) -> Result<(), ContributionError> {
	for element in elements {
		if element.name.is_empty() || element.name.chars().any(char::is_whitespace) {
			return Err(ContributionError::InvalidElementName {
				location: element.location.clone(),
				name: element.name.clone(),
			});
		}

		let mut seen = FxHashSet::default();
		for (key, _) in &element.attributes {
			if !seen.insert(key.as_str()) {
				return Err(ContributionError::DuplicateAttribute {
					location: element.location.clone(),
					key: key.clone(),
				});
			}
		}

		check_elements(&element.children)?;
	}
	Ok(())
}

/// A declared identifier resolved against its contributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Qualified {
	pub unique_id: Arc<str>,
	pub namespace: Arc<str>,
	pub simple_id: Arc<str>,
}

/// Qualifies `id`: dotted identifiers keep their own namespace, anything else lands in
/// `default_namespace`.
pub(crate) fn qualify(id: &str, default_namespace: &Arc<str>) -> Qualified {
	match id.rsplit_once('.') {
		Some((namespace, simple)) => Qualified {
			unique_id: Arc::from(id),
			namespace: Arc::from(namespace),
			simple_id: Arc::from(simple),
		},
		None => Qualified {
			unique_id: Arc::from(format!("{default_namespace}.{id}")),
			namespace: default_namespace.clone(),
			simple_id: Arc::from(id),
		},
	}
}

/// Namespace of an already qualified identifier.
pub(crate) fn namespace_of(unique_id: &str) -> &str {
	unique_id.rsplit_once('.').map_or(unique_id, |(namespace, _)| namespace)
}
