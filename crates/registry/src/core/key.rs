use std::fmt;

/// Generation-tagged position in an [`Arena`](super::arena::Arena).
///
/// Two slots with the same index but different generations refer to different records;
/// the older one is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
	pub(crate) index: u32,
	pub(crate) generation: u32,
}

impl Slot {
	#[inline]
	pub fn index(self) -> u32 {
		self.index
	}

	#[inline]
	pub fn generation(self) -> u32 {
		self.generation
	}
}

impl fmt::Display for Slot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}v{}", self.index, self.generation)
	}
}

macro_rules! slot_key {
	($(#[$attr:meta])* $name:ident) => {
		$(#[$attr])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
		pub struct $name(pub(crate) Slot);

		impl $name {
			#[inline]
			pub fn slot(self) -> Slot {
				self.0
			}
		}

		impl From<Slot> for $name {
			#[inline]
			fn from(slot: Slot) -> Self {
				Self(slot)
			}
		}
	};
}

slot_key!(
	/// Key of an extension point record.
	PointKey
);
slot_key!(
	/// Key of an extension record.
	ExtensionKey
);
slot_key!(
	/// Key of a configuration element record.
	ElementKey
);
