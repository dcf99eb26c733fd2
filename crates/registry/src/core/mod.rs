//! Shared storage primitives.

pub(crate) mod arena;
pub mod key;

pub(crate) use arena::Arena;
pub use key::{ElementKey, ExtensionKey, PointKey, Slot};
