use thiserror::Error;

use crate::Location;

/// Failure to turn contribution bytes into declarations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
	/// The bytes are not UTF-8.
	#[error("{source_name}: contribution is not valid UTF-8 (at byte {offset})")]
	Encoding { source_name: String, offset: usize },

	/// The document is not valid KDL.
	#[error("{source_name}: {message}")]
	Syntax { source_name: String, message: String },

	/// A top-level node is neither `extension-point` nor `extension`.
	#[error("{location}: unexpected top-level node '{name}'")]
	UnexpectedNode { name: String, location: Location },

	/// A value has a type that cannot be represented as an attribute string.
	#[error("{location}: unsupported value for '{key}'")]
	UnsupportedValue { key: String, location: Location },
}

impl ParseError {
	/// Best-effort location of the failure.
	pub fn location(&self) -> Option<&Location> {
		match self {
			Self::Encoding { .. } | Self::Syntax { .. } => None,
			Self::UnexpectedNode { location, .. } | Self::UnsupportedValue { location, .. } => {
				Some(location)
			}
		}
	}
}
