//! Contributor identities.
//!
//! A contributor is whoever supplied records: a module, a fragment attached to a host
//! module, or a freestanding source such as a test fixture. Fragments keep their own
//! identity for ownership and removal, but their records live in the host's namespace.

use std::fmt;
use std::sync::Arc;

/// Stable identity of a contributor. Removal and ownership are keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContributorId(Arc<str>);

impl ContributorId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ContributorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ContributorId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// What a contributor represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContributorOrigin {
	/// A module. Only singleton modules may contribute.
	Module { singleton: bool },
	/// A fragment attached to a host module.
	Fragment {
		host_id: ContributorId,
		host_name: Arc<str>,
		host_singleton: bool,
	},
	/// A source with no module behind it.
	Freestanding,
}

/// Identity plus origin of whoever supplied a set of records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Contributor {
	id: ContributorId,
	name: Arc<str>,
	origin: ContributorOrigin,
}

impl Contributor {
	/// A singleton module named `name`.
	pub fn module(id: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
		Self::with_origin(id, name, ContributorOrigin::Module { singleton: true })
	}

	/// A module that is not marked singleton. Such modules are refused by ingestion.
	pub fn non_singleton_module(id: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
		Self::with_origin(id, name, ContributorOrigin::Module { singleton: false })
	}

	/// A fragment of `host`. The host must itself be a module contributor.
	pub fn fragment(id: impl Into<Arc<str>>, name: impl Into<Arc<str>>, host: &Contributor) -> Self {
		let host_singleton = matches!(host.origin, ContributorOrigin::Module { singleton: true });
		Self::with_origin(
			id,
			name,
			ContributorOrigin::Fragment {
				host_id: host.id.clone(),
				host_name: host.name.clone(),
				host_singleton,
			},
		)
	}

	/// A contributor with no module behind it.
	pub fn freestanding(id: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
		Self::with_origin(id, name, ContributorOrigin::Freestanding)
	}

	pub fn with_origin(id: impl Into<Arc<str>>, name: impl Into<Arc<str>>, origin: ContributorOrigin) -> Self {
		Self {
			id: ContributorId::new(id),
			name: name.into(),
			origin,
		}
	}

	pub fn id(&self) -> &ContributorId {
		&self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn origin(&self) -> &ContributorOrigin {
		&self.origin
	}

	pub fn is_fragment(&self) -> bool {
		matches!(self.origin, ContributorOrigin::Fragment { .. })
	}

	/// Namespace that unqualified identifiers from this contributor fall into.
	///
	/// Fragments resolve to their host's name, so a fragment never shows up as a
	/// namespace of its own.
	pub fn namespace(&self) -> Arc<str> {
		match &self.origin {
			ContributorOrigin::Fragment { host_name, .. } => host_name.clone(),
			ContributorOrigin::Module { .. } | ContributorOrigin::Freestanding => self.name.clone(),
		}
	}
}

impl fmt::Display for Contributor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.origin {
			ContributorOrigin::Fragment { host_id, .. } => write!(f, "{} ({}, fragment of {host_id})", self.name, self.id),
			_ => write!(f, "{} ({})", self.name, self.id),
		}
	}
}
