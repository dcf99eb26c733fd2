//! Contribution declarations for the trellis extension registry.
//!
//! This crate is the parser side of contribution ingestion. It turns raw contribution
//! bytes into a provisional tree of declarations without assigning any ownership or
//! identity in a registry store. Structural policy (identifier legality, uniqueness,
//! singleton rules) is enforced by `trellis-registry` during ingestion, not here.
//!
//! # Wire format
//!
//! Contributions are KDL (v2) documents with two kinds of top-level nodes:
//!
//! ```kdl
//! extension-point "xptA" label="Point A" schema="schema/xptA.exsd"
//!
//! extension "xptA" id="ext1" label="First" {
//!     action "run" class="org.example.Run" {
//!         param "n" value="1"
//!     }
//! }
//! ```
//!
//! Every node nested under `extension` is a configuration element: the node name is the
//! element name, the first positional string is its text value, properties become
//! attributes and children become child elements.

mod decl;
mod error;
mod parse;

pub use decl::{ContributionDecl, ElementDecl, ExtensionDecl, ExtensionPointDecl, Location};
pub use error::ParseError;
pub use parse::{EXTENSION_NODE, EXTENSION_POINT_NODE, parse_contribution};
