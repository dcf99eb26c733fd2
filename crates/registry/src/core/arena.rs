//! Generation-tagged slot arena.
//!
//! # Invariants
//!
//! * A [`Slot`] resolves only while its generation equals the live generation of its index.
//! * Removing a record bumps the generation of its index, so every slot issued before the
//!   removal is detectably stale from then on.
//! * The arena never compacts. Freed indices are recycled oldest-first, which keeps a
//!   just-freed index out of circulation for as long as other free indices exist.

use std::collections::VecDeque;

use super::key::Slot;
use crate::error::CapacityExceeded;

/// Indices run from `0` to `MAX_SLOTS - 1`.
const MAX_SLOTS: u32 = u32::MAX;

enum Entry<T> {
	Occupied { generation: u32, value: T },
	Vacant { generation: u32 },
}

pub(crate) struct Arena<T> {
	entries: Vec<Entry<T>>,
	free: VecDeque<u32>,
	len: usize,
}

impl<T> Default for Arena<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Arena<T> {
	pub fn new() -> Self {
		Self {
			entries: Vec::new(),
			free: VecDeque::new(),
			len: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.len
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// How many more records fit, counting recyclable indices.
	pub fn remaining(&self) -> usize {
		let fresh = usize::try_from(MAX_SLOTS)
			.unwrap_or(usize::MAX)
			.saturating_sub(self.entries.len());
		self.free.len().saturating_add(fresh)
	}

	pub fn insert(&mut self, value: T) -> Result<Slot, CapacityExceeded> {
		if let Some(index) = self.free.pop_front() {
			let entry = &mut self.entries[index as usize];
			let generation = match entry {
				Entry::Vacant { generation } => *generation,
				Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
			};
			*entry = Entry::Occupied { generation, value };
			self.len += 1;
			return Ok(Slot { index, generation });
		}

		let index = u32::try_from(self.entries.len())
			.ok()
			.filter(|index| *index < MAX_SLOTS)
			.ok_or(CapacityExceeded)?;
		self.entries.push(Entry::Occupied { generation: 0, value });
		self.len += 1;
		Ok(Slot { index, generation: 0 })
	}

	#[inline]
	pub fn get(&self, slot: Slot) -> Option<&T> {
		match self.entries.get(slot.index as usize)? {
			Entry::Occupied { generation, value } if *generation == slot.generation => Some(value),
			_ => None,
		}
	}

	#[inline]
	pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
		match self.entries.get_mut(slot.index as usize)? {
			Entry::Occupied { generation, value } if *generation == slot.generation => Some(value),
			_ => None,
		}
	}

	/// Frees `slot` and advances its generation. Stale slots are ignored.
	pub fn remove(&mut self, slot: Slot) -> Option<T> {
		let entry = self.entries.get_mut(slot.index as usize)?;
		match entry {
			Entry::Occupied { generation, .. } if *generation == slot.generation => {}
			_ => return None,
		}
		let next = Entry::Vacant {
			generation: slot.generation.wrapping_add(1),
		};
		let Entry::Occupied { value, .. } = std::mem::replace(entry, next) else {
			unreachable!("checked occupied above");
		};
		self.free.push_back(slot.index);
		self.len -= 1;
		Some(value)
	}

	pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> + '_ {
		self.entries.iter().enumerate().filter_map(|(index, entry)| match entry {
			Entry::Occupied { generation, value } => Some((
				Slot {
					index: u32::try_from(index).ok()?,
					generation: *generation,
				},
				value,
			)),
			Entry::Vacant { .. } => None,
		})
	}
}
