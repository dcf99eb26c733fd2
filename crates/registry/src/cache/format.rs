//! On-disk layout of the registry cache.
//!
//! Both the main file and the `.lazy` sibling start with the same header:
//!
//! | bytes   | field                          |
//! |---------|--------------------------------|
//! | 0..8    | [`MAGIC`]                      |
//! | 8..12   | [`SCHEMA_VERSION`], u32 LE     |
//! | 12..20  | registry timestamp, u64 LE     |
//!
//! The main payload is one postcard-encoded [`CacheImage`]. The lazy payload is a
//! concatenation of postcard-encoded `Vec<CachedElement>` segments addressed by
//! `(offset, len)` relative to the end of the header.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a registry cache file.
pub const MAGIC: &[u8; 8] = b"TRELLIS\0";

/// Schema version for cache format compatibility.
pub const SCHEMA_VERSION: u32 = 2;

pub(crate) const HEADER_SIZE: usize = 20;

pub(crate) fn write_header(out: &mut Vec<u8>, timestamp: u64) {
	out.extend_from_slice(MAGIC);
	out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
	out.extend_from_slice(&timestamp.to_le_bytes());
}

/// Validates the header and returns `(timestamp, payload)`.
pub(crate) fn split_header<'a>(data: &'a [u8], path: &Path) -> Result<(u64, &'a [u8]), CacheError> {
	if data.len() < HEADER_SIZE || &data[..8] != MAGIC {
		return Err(CacheError::BadMagic { path: path.to_path_buf() });
	}
	let version = u32::from_le_bytes(data[8..12].try_into().map_err(|_| CacheError::BadMagic { path: path.to_path_buf() })?);
	if version != SCHEMA_VERSION {
		return Err(CacheError::SchemaVersion {
			path: path.to_path_buf(),
			found: version,
		});
	}
	let timestamp = u64::from_le_bytes(data[12..20].try_into().map_err(|_| CacheError::BadMagic { path: path.to_path_buf() })?);
	Ok((timestamp, &data[HEADER_SIZE..]))
}

/// Decodes exactly one `T` from `bytes`. Trailing bytes are corruption.
pub(crate) fn decode_exact<'a, T: Deserialize<'a>>(bytes: &'a [u8], what: &str) -> Result<T, CacheError> {
	let (value, rest) = postcard::take_from_bytes::<T>(bytes)?;
	if !rest.is_empty() {
		return Err(CacheError::Corrupt(format!("{} trailing bytes after {what}", rest.len())));
	}
	Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CachedOrigin {
	Module { singleton: bool },
	Fragment {
		host_id: String,
		host_name: String,
		host_singleton: bool,
	},
	Freestanding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedContributor {
	pub id: String,
	pub name: String,
	pub origin: CachedOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedPoint {
	/// Index into [`CacheImage::contributors`].
	pub contributor: u32,
	pub unique_id: String,
	pub simple_id: String,
	pub namespace: String,
	pub label: Option<String>,
	pub schema: Option<String>,
	/// Indices into [`CacheImage::extensions`], in attachment order.
	pub attached: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedElement {
	pub name: String,
	pub value: Option<String>,
	pub attributes: Vec<(String, String)>,
	pub children: Vec<CachedElement>,
}

impl CachedElement {
	pub fn subtree_len(&self) -> usize {
		1 + self.children.iter().map(Self::subtree_len).sum::<usize>()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CachedElements {
	Inline(Vec<CachedElement>),
	/// Segment of the lazy file, relative to the end of its header.
	Lazy { offset: u64, len: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedExtension {
	pub contributor: u32,
	pub unique_id: Option<String>,
	pub simple_id: Option<String>,
	pub namespace: String,
	pub label: Option<String>,
	pub point_id: String,
	pub elements: CachedElements,
}

/// Extensions waiting for a point that is not declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedOrphans {
	pub point_id: String,
	/// Indices into [`CacheImage::extensions`], in arrival order.
	pub waiting: Vec<u32>,
}

/// Serialized store. Points and extensions appear namespace by namespace in index order.
///
/// Every extension is either in one point's `attached` list or in one orphan list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CacheImage {
	pub contributors: Vec<CachedContributor>,
	pub points: Vec<CachedPoint>,
	pub extensions: Vec<CachedExtension>,
	/// Sorted by point id.
	pub orphans: Vec<CachedOrphans>,
}
