//! Allocation, error-handling, and collection primitives shared across the kernel crate.
//!
//! This crate mirrors the small standard-library-like layer a freestanding kernel needs: fallible
//! collections, an `errno`-style result type, and a couple of marker traits for safely
//! reinterpreting raw memory. It carries no architecture-specific code.

#![no_std]

extern crate alloc;

pub mod clone;
pub mod errno;
pub mod limits;
pub mod lock;
pub mod repr;

pub use clone::TryClone;

/// Fallible-allocation-aware collection re-exports, named the way call sites spell them
/// (`utils::collections::vec::Vec`, etc.) rather than flattened, so that swapping the backing
/// implementation later does not ripple through every call site.
pub mod collections {
	pub mod vec {
		pub use alloc::vec::Vec;
	}
	pub mod btreemap {
		pub use alloc::collections::BTreeMap;
	}
	/// `no_std` has no hasher-based `HashMap`; ordered maps are used in its place everywhere a
	/// `HashMap` would otherwise appear, which is acceptable at this crate's scale.
	pub mod hashmap {
		pub use alloc::collections::BTreeMap as HashMap;
	}
	pub mod hashset {
		pub use alloc::collections::BTreeSet as HashSet;
	}
	pub mod string {
		pub use alloc::string::String;
	}
}

pub mod boxed {
	pub use alloc::boxed::Box;
}

pub mod ptr {
	pub mod arc {
		pub use alloc::sync::{Arc, Weak};
	}
}
