//! A plain, non-interrupt-masking spinlock for structures shared outside the arch-specific
//! kernel crate (no notion of "current interrupt state" is available here).
//!
//! Kernel-internal global state that must be safe against interrupt reentrancy uses
//! `kernel::sync::IntMutex` instead, which layers interrupt masking on top of the same
//! spin-wait strategy.

use core::{
	cell::UnsafeCell,
	hint,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering},
};

/// A mutual-exclusion lock that spins while contended.
pub struct Mutex<T: ?Sized> {
	locked: AtomicBool,
	data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
	/// Creates a new, unlocked mutex wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			data: UnsafeCell::new(data),
		}
	}
}

impl<T: ?Sized> Mutex<T> {
	/// Acquires the lock, spinning until it becomes available.
	pub fn lock(&self) -> MutexGuard<T> {
		while self
			.locked
			.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
			.is_err()
		{
			hint::spin_loop();
		}
		MutexGuard {
			mutex: self,
		}
	}
}

/// RAII guard releasing a [`Mutex`] on drop.
pub struct MutexGuard<'m, T: ?Sized> {
	mutex: &'m Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		unsafe { &*self.mutex.data.get() }
	}
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		unsafe { &mut *self.mutex.data.get() }
	}
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
	fn drop(&mut self) {
		self.mutex.locked.store(false, Ordering::Release);
	}
}
