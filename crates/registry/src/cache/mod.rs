//! Persistent registry cache.
//!
//! # Purpose
//!
//! Saves the persistent part of a registry to a binary file and seeds a fresh store from
//! it at startup, as if every cached contribution had been ingested again.
//!
//! # Invariants
//!
//! * Reading never yields a partial store. Any header mismatch, decode failure, trailing
//!   bytes or dangling reference rejects the whole file.
//! * Only records contributed with `persist = true` are written.
//! * Namespace order, contributor order, per-point attachment order and the arrival
//!   order of orphans waiting on the same point survive a round trip.
//! * Element values keep `None` and `Some("")` apart at every depth.
//!
//! # Concurrency
//!
//! Writers build the image under the store's read section, so a snapshot never observes
//! half of a commit. Files are replaced atomically through a temporary file in the same
//! directory.

mod format;
mod lazy;


use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;

pub use format::{MAGIC, SCHEMA_VERSION};
use format::{
	CacheImage, CachedContributor, CachedElement, CachedElements, CachedExtension, CachedOrigin, CachedOrphans,
	CachedPoint, HEADER_SIZE,
};
pub(crate) use lazy::{LazyReaper, LazyStore};

use crate::contributor::{Contributor, ContributorId, ContributorOrigin};
use crate::core::{ElementKey, ExtensionKey, PointKey};
use crate::error::CacheError;
use crate::ingest::PlannedElement;
use crate::store::{Elements, ExtensionRecord, LazyRef, ParentKey, PointRecord, Store};

/// How [`read_cache`] treats the timestamp stored in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampCheck {
	/// Reject the file unless its timestamp equals this value.
	Expect(u64),
	/// Accept any timestamp.
	NoCheck,
}

/// A validated cache file, ready to seed a registry.
pub struct CacheSnapshot {
	path: PathBuf,
	timestamp: u64,
	store: Store,
	has_lazy: bool,
}

impl std::fmt::Debug for CacheSnapshot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheSnapshot")
			.field("path", &self.path)
			.field("timestamp", &self.timestamp)
			.field("extension_points", &self.extension_point_count())
			.field("extensions", &self.extension_count())
			.finish_non_exhaustive()
	}
}

impl CacheSnapshot {
	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn timestamp(&self) -> u64 {
		self.timestamp
	}

	pub fn extension_point_count(&self) -> usize {
		self.store.points.len()
	}

	pub fn extension_count(&self) -> usize {
		self.store.extensions.len()
	}

	pub fn contributor_count(&self) -> usize {
		self.store.index.contributors().count()
	}

	/// Whether some element trees live in the `.lazy` sibling.
	pub fn has_lazy_elements(&self) -> bool {
		self.has_lazy
	}

	pub(crate) fn into_parts(self) -> (Store, Option<PathBuf>, u64) {
		let lazy = self.has_lazy.then(|| lazy_path(&self.path));
		(self.store, lazy, self.timestamp)
	}
}

/// Summary of a completed cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWritten {
	pub path: PathBuf,
	pub timestamp: u64,
	pub extension_points: usize,
	pub extensions: usize,
	/// Extensions whose element trees went to the `.lazy` sibling.
	pub lazy_extensions: usize,
}

/// Path of the lazy element file that belongs to the cache at `path`.
pub fn lazy_path(path: &Path) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(".lazy");
	PathBuf::from(name)
}

/// Reads and validates the cache at `path`.
///
/// Returns `None` for a missing, corrupt or mismatched file and logs why. The caller is
/// expected to rebuild the registry from contributions in that case.
pub fn read_cache(path: &Path, check: TimestampCheck) -> Option<CacheSnapshot> {
	match try_read(path, check) {
		Ok(snapshot) => {
			tracing::debug!(
				path = %path.display(),
				timestamp = snapshot.timestamp,
				extension_points = snapshot.extension_point_count(),
				extensions = snapshot.extension_count(),
				"registry cache read"
			);
			Some(snapshot)
		}
		Err(CacheError::Io { error, .. }) if error.kind() == ErrorKind::NotFound => {
			tracing::debug!(path = %path.display(), "no registry cache");
			None
		}
		Err(error) => {
			tracing::warn!(path = %path.display(), %error, "registry cache rejected");
			None
		}
	}
}

pub(crate) fn try_read(path: &Path, check: TimestampCheck) -> Result<CacheSnapshot, CacheError> {
	let data = fs::read(path).map_err(|e| CacheError::io(path, e))?;
	let (timestamp, payload) = format::split_header(&data, path)?;
	if let TimestampCheck::Expect(expected) = check
		&& expected != timestamp
	{
		return Err(CacheError::TimestampMismatch {
			path: path.to_path_buf(),
			expected,
			found: timestamp,
		});
	}

	let image: CacheImage = format::decode_exact(payload, "cache image")?;
	let has_lazy = image
		.extensions
		.iter()
		.any(|ext| matches!(ext.elements, CachedElements::Lazy { .. }));
	if has_lazy {
		check_lazy_header(&lazy_path(path), timestamp)?;
	}
	let store = seed(image)?;

	Ok(CacheSnapshot {
		path: path.to_path_buf(),
		timestamp,
		store,
		has_lazy,
	})
}

fn check_lazy_header(path: &Path, timestamp: u64) -> Result<(), CacheError> {
	let mut header = [0u8; HEADER_SIZE];
	fs::File::open(path)
		.and_then(|mut file| file.read_exact(&mut header))
		.map_err(|e| CacheError::io(path, e))?;
	let (found, _) = format::split_header(&header, path)?;
	if found != timestamp {
		return Err(CacheError::TimestampMismatch {
			path: path.to_path_buf(),
			expected: timestamp,
			found,
		});
	}
	Ok(())
}

fn corrupt(message: impl Into<String>) -> CacheError {
	CacheError::Corrupt(message.into())
}

/// Builds a store from a decoded image, checking every cross reference.
fn seed(image: CacheImage) -> Result<Store, CacheError> {
	let mut store = Store::default();
	let contributors: Vec<Contributor> = image.contributors.into_iter().map(Contributor::from).collect();
	for contributor in &contributors {
		store.register_contributor(contributor);
	}
	let contributor_at = |index: u32| {
		usize::try_from(index)
			.ok()
			.and_then(|i| contributors.get(i))
			.cloned()
			.ok_or_else(|| corrupt(format!("dangling contributor index {index}")))
	};

	let mut points: Vec<(PointKey, Vec<u32>)> = Vec::with_capacity(image.points.len());
	for point in image.points {
		let contributor = contributor_at(point.contributor)?;
		let unique_id: Arc<str> = Arc::from(point.unique_id);
		if store.index.point_by_id(&unique_id).is_some() {
			return Err(corrupt(format!("duplicate extension point '{unique_id}'")));
		}
		let namespace: Arc<str> = Arc::from(point.namespace);
		let key = PointKey(store.points.insert(PointRecord {
			unique_id: unique_id.clone(),
			simple_id: Arc::from(point.simple_id),
			namespace: namespace.clone(),
			label: point.label.map(Arc::from),
			schema: point.schema.map(Arc::from),
			contributor: contributor.clone(),
			extensions: Vec::new(),
			persist: true,
		})?);
		store.index.insert_point(key, &unique_id, &namespace, &contributor);
		points.push((key, point.attached));
	}

	let mut extensions: Vec<ExtensionKey> = Vec::with_capacity(image.extensions.len());
	for extension in image.extensions {
		let contributor = contributor_at(extension.contributor)?;
		let unique_id = extension.unique_id.map(Arc::<str>::from);
		if let Some(id) = &unique_id
			&& store.index.extension_by_id(id).is_some()
		{
			return Err(corrupt(format!("duplicate extension '{id}'")));
		}
		let namespace: Arc<str> = Arc::from(extension.namespace);
		let key = ExtensionKey(store.extensions.insert(ExtensionRecord {
			unique_id: unique_id.clone(),
			simple_id: extension.simple_id.map(Arc::from),
			namespace: namespace.clone(),
			label: extension.label.map(Arc::from),
			point_id: Arc::from(extension.point_id),
			point: None,
			contributor: contributor.clone(),
			elements: Elements::Loaded(Vec::new()),
			persist: true,
		})?);
		let elements = match extension.elements {
			CachedElements::Inline(roots) => Elements::Loaded(store.alloc_elements(
				roots.into_iter().map(PlannedElement::from).collect(),
				ParentKey::Extension(key),
				key,
			)?),
			CachedElements::Lazy { offset, len } => Elements::Lazy(LazyRef { offset, len }),
		};
		if let Some(record) = store.extensions.get_mut(key.0) {
			record.elements = elements;
		}
		store.index.insert_extension(key, unique_id.as_ref(), &namespace, &contributor);
		extensions.push(key);
	}

	let mut placed = vec![false; extensions.len()];
	let mut claim = |index: u32, point_id: &str, store: &Store| -> Result<ExtensionKey, CacheError> {
		let at = usize::try_from(index)
			.ok()
			.filter(|at| *at < extensions.len())
			.ok_or_else(|| corrupt(format!("dangling extension index {index}")))?;
		if std::mem::replace(&mut placed[at], true) {
			return Err(corrupt(format!("extension {index} linked twice")));
		}
		let ext = extensions[at];
		let target = store
			.extension(ext)
			.map(|record| record.point_id.clone())
			.ok_or_else(|| corrupt("extension vanished during seeding"))?;
		if &*target != point_id {
			return Err(corrupt(format!("extension targeting '{target}' linked to '{point_id}'")));
		}
		Ok(ext)
	};

	for (point, indices) in points {
		let point_id = store.point(point).map(|p| p.unique_id.clone()).unwrap_or_default();
		for index in indices {
			let ext = claim(index, &*point_id, &store)?;
			if let Some(record) = store.extensions.get_mut(ext.0) {
				record.point = Some(point);
			}
			if let Some(point_record) = store.points.get_mut(point.0) {
				point_record.extensions.push(ext);
			}
		}
	}

	for orphans in image.orphans {
		let point_id: Arc<str> = Arc::from(orphans.point_id);
		if store.index.point_by_id(&point_id).is_some() {
			return Err(corrupt(format!("extensions parked on live point '{point_id}'")));
		}
		for index in orphans.waiting {
			let ext = claim(index, &*point_id, &store)?;
			store.index.add_orphan(&point_id, ext);
		}
	}

	if let Some(index) = placed.iter().position(|placed| !placed) {
		return Err(corrupt(format!("extension {index} is neither attached nor orphaned")));
	}

	Ok(store)
}

fn next_index(len: usize, what: &'static str) -> Result<u32, CacheError> {
	u32::try_from(len).map_err(|_| CacheError::IndexOverflow { what })
}

/// Writes every persistent record of `store` to `path` (and its `.lazy` sibling).
///
/// Element trees larger than `lazy_threshold` elements go to the lazy file. Extensions
/// whose trees were never paged in must be materialized before calling this.
pub(crate) fn write(store: &Store, path: &Path, timestamp: u64, lazy_threshold: usize) -> Result<CacheWritten, CacheError> {
	let mut image = CacheImage::default();
	let mut lazy_payload = Vec::new();
	let mut lazy_extensions = 0;

	let mut contributor_index: FxHashMap<&ContributorId, u32> = FxHashMap::default();
	for entry in store.index.contributors() {
		let persists = entry.points.iter().any(|k| store.point(*k).is_some_and(|p| p.persist))
			|| entry.extensions.iter().any(|k| store.extension(*k).is_some_and(|e| e.persist));
		if persists {
			contributor_index.insert(entry.contributor.id(), next_index(image.contributors.len(), "contributor")?);
			image.contributors.push(CachedContributor::from(&entry.contributor));
		}
	}
	let contributor_of = |contributor: &Contributor| {
		contributor_index
			.get(contributor.id())
			.copied()
			.ok_or_else(|| corrupt(format!("contributor '{}' missing from index", contributor.id())))
	};

	let mut point_order: Vec<PointKey> = Vec::new();
	let mut extension_index: FxHashMap<ExtensionKey, u32> = FxHashMap::default();
	for (_, entry) in store.index.namespaces() {
		for &key in &entry.points {
			let Some(record) = store.point(key).filter(|p| p.persist) else {
				continue;
			};
			point_order.push(key);
			image.points.push(CachedPoint {
				contributor: contributor_of(&record.contributor)?,
				unique_id: record.unique_id.to_string(),
				simple_id: record.simple_id.to_string(),
				namespace: record.namespace.to_string(),
				label: record.label.as_deref().map(str::to_owned),
				schema: record.schema.as_deref().map(str::to_owned),
				attached: Vec::new(),
			});
		}

		for &key in &entry.extensions {
			let Some(record) = store.extension(key).filter(|e| e.persist) else {
				continue;
			};
			let roots = match &record.elements {
				Elements::Loaded(roots) => roots,
				Elements::Lazy(_) => return Err(corrupt("element tree was not materialized before writing")),
			};
			let tree: Vec<CachedElement> = roots.iter().filter_map(|k| cached_element(store, *k)).collect();
			let elements = if tree.iter().map(CachedElement::subtree_len).sum::<usize>() > lazy_threshold {
				let segment = postcard::to_allocvec(&tree)?;
				let overflow = |_: std::num::TryFromIntError| CacheError::IndexOverflow { what: "lazy element file" };
				let offset = u64::try_from(lazy_payload.len()).map_err(overflow)?;
				let len = u64::try_from(segment.len()).map_err(overflow)?;
				lazy_payload.extend_from_slice(&segment);
				lazy_extensions += 1;
				CachedElements::Lazy { offset, len }
			} else {
				CachedElements::Inline(tree)
			};

			extension_index.insert(key, next_index(image.extensions.len(), "extension")?);
			image.extensions.push(CachedExtension {
				contributor: contributor_of(&record.contributor)?,
				unique_id: record.unique_id.as_deref().map(str::to_owned),
				simple_id: record.simple_id.as_deref().map(str::to_owned),
				namespace: record.namespace.to_string(),
				label: record.label.as_deref().map(str::to_owned),
				point_id: record.point_id.to_string(),
				elements,
			});
		}
	}

	for (cached, key) in image.points.iter_mut().zip(&point_order) {
		if let Some(record) = store.point(*key) {
			cached.attached = record
				.extensions
				.iter()
				.filter_map(|ext| extension_index.get(ext).copied())
				.collect();
		}
	}

	for (point_id, waiting) in store.index.orphans() {
		let waiting: Vec<u32> = waiting
			.iter()
			.filter_map(|ext| extension_index.get(ext).copied())
			.collect();
		if !waiting.is_empty() {
			image.orphans.push(CachedOrphans {
				point_id: point_id.to_string(),
				waiting,
			});
		}
	}
	image.orphans.sort_by(|a, b| a.point_id.cmp(&b.point_id));

	let lazy_file = lazy_path(path);
	if lazy_payload.is_empty() {
		match fs::remove_file(&lazy_file) {
			Ok(()) => {}
			Err(e) if e.kind() == ErrorKind::NotFound => {}
			Err(e) => return Err(CacheError::io(&lazy_file, e)),
		}
	} else {
		let mut bytes = Vec::with_capacity(HEADER_SIZE + lazy_payload.len());
		format::write_header(&mut bytes, timestamp);
		bytes.extend_from_slice(&lazy_payload);
		write_atomic(&lazy_file, &bytes)?;
	}

	let mut bytes = Vec::new();
	format::write_header(&mut bytes, timestamp);
	bytes.extend_from_slice(&postcard::to_allocvec(&image)?);
	write_atomic(path, &bytes)?;

	Ok(CacheWritten {
		path: path.to_path_buf(),
		timestamp,
		extension_points: image.points.len(),
		extensions: image.extensions.len(),
		lazy_extensions,
	})
}

fn cached_element(store: &Store, key: ElementKey) -> Option<CachedElement> {
	let record = store.element(key)?;
	Some(CachedElement {
		name: record.name.to_string(),
		value: record.value.as_deref().map(str::to_owned),
		attributes: record
			.attributes
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect(),
		children: record.children.iter().filter_map(|k| cached_element(store, *k)).collect(),
	})
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};
	let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
	file.write_all(bytes).map_err(|e| CacheError::io(file.path(), e))?;
	file.as_file().sync_all().map_err(|e| CacheError::io(path, e))?;
	file.persist(path).map_err(|e| CacheError::io(path, e.error))?;
	Ok(())
}

impl From<CachedElement> for PlannedElement {
	fn from(element: CachedElement) -> Self {
		Self {
			name: Arc::from(element.name),
			value: element.value.map(Arc::from),
			attributes: element
				.attributes
				.into_iter()
				.map(|(k, v)| (Arc::from(k), Arc::from(v)))
				.collect(),
			children: element.children.into_iter().map(Self::from).collect(),
		}
	}
}

impl From<CachedContributor> for Contributor {
	fn from(cached: CachedContributor) -> Self {
		let origin = match cached.origin {
			CachedOrigin::Module { singleton } => ContributorOrigin::Module { singleton },
			CachedOrigin::Fragment {
				host_id,
				host_name,
				host_singleton,
			} => ContributorOrigin::Fragment {
				host_id: ContributorId::new(host_id),
				host_name: Arc::from(host_name),
				host_singleton,
			},
			CachedOrigin::Freestanding => ContributorOrigin::Freestanding,
		};
		Contributor::with_origin(cached.id, cached.name, origin)
	}
}

impl From<&Contributor> for CachedContributor {
	fn from(contributor: &Contributor) -> Self {
		let origin = match contributor.origin() {
			ContributorOrigin::Module { singleton } => CachedOrigin::Module { singleton: *singleton },
			ContributorOrigin::Fragment {
				host_id,
				host_name,
				host_singleton,
			} => CachedOrigin::Fragment {
				host_id: host_id.to_string(),
				host_name: host_name.to_string(),
				host_singleton: *host_singleton,
			},
			ContributorOrigin::Freestanding => CachedOrigin::Freestanding,
		};
		Self {
			id: contributor.id().to_string(),
			name: contributor.name().to_owned(),
			origin,
		}
	}
}
