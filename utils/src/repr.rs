//! Marker trait for types that may be safely reinterpreted from an arbitrary byte pattern.
//!
//! Used to read fixed-layout on-disk structures (the MBR partition table, ELF-adjacent structs)
//! directly out of a raw sector or page buffer without a parsing pass. A type may only implement
//! this trait if every bit pattern of its size is a valid value (no padding-sensitive niches, no
//! enums with invalid discriminants).

/// # Safety
///
/// The implementor must be `repr(C)` (or `repr(transparent)`/`repr(packed)` over such a type)
/// and every possible bit pattern of its size must be a valid value of the type.
pub unsafe trait AnyRepr {}

unsafe impl AnyRepr for u8 {}
unsafe impl AnyRepr for u16 {}
unsafe impl AnyRepr for u32 {}
unsafe impl AnyRepr for u64 {}
unsafe impl AnyRepr for usize {}
unsafe impl<T: AnyRepr, const N: usize> AnyRepr for [T; N] {}

/// Reinterprets a byte slice as a slice of `T`.
///
/// Panics if `bytes` is not long enough or not correctly aligned for `T`.
pub fn slice_of<T: AnyRepr>(bytes: &[u8]) -> &[T] {
	let len = bytes.len() / core::mem::size_of::<T>();
	let ptr = bytes.as_ptr();
	assert_eq!(ptr.align_offset(core::mem::align_of::<T>()), 0, "misaligned buffer");
	unsafe { core::slice::from_raw_parts(ptr as *const T, len) }
}
