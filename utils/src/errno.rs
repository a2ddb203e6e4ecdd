//! Crate-wide error type and result aliases.
//!
//! Every fallible leaf operation in the kernel returns an [`EResult`]. Higher layers either
//! translate an inner [`Errno`] into one of their own or re-emit it unchanged.

use core::fmt;

/// An error kind, matching the taxonomy of the core subsystems: resource exhaustion, invalid
/// argument, not found, not supported, I/O error, timeout, state error, permission/protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Errno {
	/// Out of physical or virtual memory.
	ENOMEM,
	/// Invalid argument (misaligned pointer, out-of-range value, overlapping region).
	EINVAL,
	/// No such file or directory.
	ENOENT,
	/// A path component expected to be a directory is not one.
	ENOTDIR,
	/// The filesystem is mounted read-only.
	EROFS,
	/// The operation is not supported by this object (absent vtable entry, wrong disk kind).
	ENOTSUP,
	/// Low-level I/O error reported by the device.
	EIO,
	/// A bounded wait exceeded its timeout.
	ETIMEDOUT,
	/// The object is in a state that forbids the operation (already exited, not initialized).
	ESRCH,
	/// The object already exists (mount point occupied, overlapping partition entry).
	EEXIST,
	/// Access denied by the protection/permission model.
	EACCES,
	/// Invalid memory access (page fault on an unmapped or protected page).
	EFAULT,
	/// No more file descriptors, tasks, or table slots available.
	EMFILE,
	/// The filesystem type named is not registered.
	ENODEV,
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::ENOMEM => "out of memory",
			Self::EINVAL => "invalid argument",
			Self::ENOENT => "no such file or directory",
			Self::ENOTDIR => "not a directory",
			Self::EROFS => "read-only filesystem",
			Self::ENOTSUP => "operation not supported",
			Self::EIO => "I/O error",
			Self::ETIMEDOUT => "timed out",
			Self::ESRCH => "no such task or invalid state",
			Self::EEXIST => "already exists",
			Self::EACCES => "permission denied",
			Self::EFAULT => "bad address",
			Self::EMFILE => "too many open handles",
			Self::ENODEV => "no such device or filesystem type",
		};
		write!(f, "{s}")
	}
}

/// Shorthand for `Result<T, Errno>`, used at every fallible call site across the kernel.
pub type EResult<T> = Result<T, Errno>;

/// A fallible allocation's result. Distinguished from [`EResult`] because allocation failure
/// carries no further context than "out of memory".
pub type AllocResult<T> = Result<T, core::alloc::AllocError>;

/// Builds an [`Errno`] value from one of its variant names.
///
/// ```ignore
/// return Err(errno!(ENOMEM));
/// ```
#[macro_export]
macro_rules! errno {
	($variant:ident) => {
		$crate::errno::Errno::$variant
	};
}

/// Converts an [`AllocResult`] into an [`EResult`], mapping allocation failure to `ENOMEM`.
pub fn to_eresult<T>(r: AllocResult<T>) -> EResult<T> {
	r.map_err(|_| Errno::ENOMEM)
}
