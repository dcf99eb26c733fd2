//! Lazy element file.
//!
//! # Purpose
//!
//! Large element trees from an adopted cache are not decoded up front. Their bytes stay
//! in the `.lazy` sibling file and are paged in on first access. The file contents are
//! kept in memory between page-ins and dropped after an idle period, then re-read.
//!
//! # Invariants
//!
//! * A fetched file must carry the same header and timestamp as the main cache that
//!   referenced it. A changed file fails the page-in instead of decoding foreign bytes.
//! * Expiry only drops file bytes. Records that were already paged in stay in the store.
//!
//! # Concurrency
//!
//! File state sits behind one `parking_lot::Mutex`. The reaper thread holds a `Weak`
//! reference, so it never keeps a dropped registry alive.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::format::{self, CachedElement};
use crate::error::CacheError;
use crate::ingest::PlannedElement;
use crate::store::LazyRef;

struct LazyState {
	bytes: Option<Arc<[u8]>>,
	last_access: Instant,
}

pub(crate) struct LazyStore {
	path: PathBuf,
	timestamp: u64,
	idle: Duration,
	state: Mutex<LazyState>,
}

impl LazyStore {
	pub fn new(path: PathBuf, timestamp: u64, idle: Duration) -> Self {
		Self {
			path,
			timestamp,
			idle,
			state: Mutex::new(LazyState {
				bytes: None,
				last_access: Instant::now(),
			}),
		}
	}

	pub fn idle(&self) -> Duration {
		self.idle
	}

	pub fn is_resident(&self) -> bool {
		self.state.lock().bytes.is_some()
	}

	/// Decodes the element trees at `at`, reading the file if it is not resident.
	pub fn load(&self, at: LazyRef) -> Result<Vec<PlannedElement>, CacheError> {
		let bytes = self.payload()?;
		let start = usize::try_from(at.offset).map_err(|_| out_of_range(at))?;
		let end = start.checked_add(usize::try_from(at.len).map_err(|_| out_of_range(at))?).ok_or_else(|| out_of_range(at))?;
		let segment = bytes.get(start..end).ok_or_else(|| out_of_range(at))?;
		let roots: Vec<CachedElement> = format::decode_exact(segment, "lazy element segment")?;
		tracing::trace!(offset = at.offset, len = at.len, "lazy element segment paged in");
		Ok(roots.into_iter().map(PlannedElement::from).collect())
	}

	fn payload(&self) -> Result<Arc<[u8]>, CacheError> {
		let mut state = self.state.lock();
		state.last_access = Instant::now();
		if let Some(bytes) = &state.bytes {
			return Ok(bytes.clone());
		}

		let data = std::fs::read(&self.path).map_err(|e| CacheError::io(&self.path, e))?;
		let (timestamp, payload) = format::split_header(&data, &self.path)?;
		if timestamp != self.timestamp {
			return Err(CacheError::TimestampMismatch {
				path: self.path.clone(),
				expected: self.timestamp,
				found: timestamp,
			});
		}
		let bytes: Arc<[u8]> = Arc::from(payload);
		tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "lazy element file loaded");
		state.bytes = Some(bytes.clone());
		Ok(bytes)
	}

	/// Drops the file bytes if they have not been touched for the idle period.
	pub fn expire_idle(&self) -> bool {
		let mut state = self.state.lock();
		if state.bytes.is_some() && state.last_access.elapsed() >= self.idle {
			state.bytes = None;
			tracing::trace!(path = %self.path.display(), "lazy element file expired");
			return true;
		}
		false
	}

	/// Drops the file bytes unconditionally.
	pub fn expire(&self) {
		self.state.lock().bytes = None;
	}
}

fn out_of_range(at: LazyRef) -> CacheError {
	CacheError::Corrupt(format!("lazy segment {}+{} out of range", at.offset, at.len))
}

/// Background thread that expires idle lazy file bytes.
///
/// Dropping the reaper stops the thread and joins it.
pub(crate) struct LazyReaper {
	stop: Option<Sender<()>>,
	thread: Option<JoinHandle<()>>,
}

impl LazyReaper {
	pub fn spawn(store: &Arc<LazyStore>) -> std::io::Result<Self> {
		let (tx, rx) = mpsc::channel::<()>();
		let weak: Weak<LazyStore> = Arc::downgrade(store);
		let period = (store.idle() / 2).max(Duration::from_millis(10));
		let thread = std::thread::Builder::new()
			.name("trellis-lazy-reaper".into())
			.spawn(move || {
				loop {
					match rx.recv_timeout(period) {
						Err(RecvTimeoutError::Timeout) => {}
						Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
					}
					let Some(store) = weak.upgrade() else {
						break;
					};
					store.expire_idle();
				}
			})?;
		Ok(Self {
			stop: Some(tx),
			thread: Some(thread),
		})
	}
}

impl Drop for LazyReaper {
	fn drop(&mut self) {
		drop(self.stop.take());
		if let Some(thread) = self.thread.take()
			&& thread.join().is_err()
		{
			tracing::error!("lazy reaper thread panicked");
		}
	}
}
