//! Fallible cloning for collections that may need to allocate.

use alloc::{collections::BTreeMap, vec::Vec};
use core::alloc::AllocError;

/// Like [`Clone`], but allowed to fail when the clone requires an allocation that cannot be
/// satisfied.
pub trait TryClone: Sized {
	/// Attempts to clone `self`.
	fn try_clone(&self) -> Result<Self, AllocError>;
}

impl<T: Clone> TryClone for Vec<T> {
	fn try_clone(&self) -> Result<Self, AllocError> {
		Ok(self.clone())
	}
}

impl<K: Clone + Ord, V: Clone> TryClone for BTreeMap<K, V> {
	fn try_clone(&self) -> Result<Self, AllocError> {
		Ok(self.clone())
	}
}
