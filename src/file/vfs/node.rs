/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! A VFS node is a reference-counted handle to a filesystem-specific object: a name, a type
//! tag, a back-pointer to the superblock it belongs to, and an operations vtable backed by
//! filesystem-private data.
//!
//! There is no node cache here: a node lives as long as something holds its `Arc`, and is
//! released through [`NodeOps::release`] when the last reference drops.

use crate::file::{vfs::mountpoint::Superblock, FileType, INode, Mode};
use core::fmt::Debug;
use utils::{boxed::Box, collections::string::String, errno, errno::EResult, ptr::arc::Arc};

/// Attributes of a node, as returned by [`NodeOps::getattr`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Attr {
	/// The node's inode number, in the owning filesystem's own numbering.
	pub inode: INode,
	/// Permission and type bits.
	pub mode: Mode,
	/// Size in bytes, for regular files. Meaningless for other types.
	pub size: u64,
	/// Number of hard links pointing to the node.
	pub nlink: u32,
}

/// An entry read back from a directory by [`NodeOps::readdir`].
#[derive(Clone, Debug)]
pub struct DirEntry {
	/// The entry's name.
	pub name: String,
	/// The entry's type.
	pub file_type: FileType,
}

/// Filesystem node operations.
///
/// Any operation a filesystem does not implement keeps its default, which fails with
/// [`errno::Errno::ENOTSUP`] — absence at the vtable level, not a null pointer.
pub trait NodeOps: Debug + Send + Sync {
	/// Looks up the child named `name` in the directory `node`.
	///
	/// Returns `Ok(None)` if no such child exists.
	fn lookup(&self, node: &Arc<Node>, name: &[u8]) -> EResult<Option<Arc<Node>>> {
		let _ = (node, name);
		Err(errno!(ENOTSUP))
	}

	/// Creates a regular file named `name` in the directory `node`.
	fn create(&self, node: &Arc<Node>, name: &[u8], mode: Mode) -> EResult<Arc<Node>> {
		let _ = (node, name, mode);
		Err(errno!(ENOTSUP))
	}

	/// Creates a subdirectory named `name` in the directory `node`.
	fn mkdir(&self, node: &Arc<Node>, name: &[u8], mode: Mode) -> EResult<Arc<Node>> {
		let _ = (node, name, mode);
		Err(errno!(ENOTSUP))
	}

	/// Reads up to `buf.len()` bytes from `node` at offset `off`.
	///
	/// Returns the number of bytes read; `0` means end of file.
	fn read(&self, node: &Node, off: u64, buf: &mut [u8]) -> EResult<usize> {
		let _ = (node, off, buf);
		Err(errno!(ENOTSUP))
	}

	/// Writes `buf` to `node` at offset `off`, returning the number of bytes written.
	fn write(&self, node: &Node, off: u64, buf: &[u8]) -> EResult<usize> {
		let _ = (node, off, buf);
		Err(errno!(ENOTSUP))
	}

	/// Returns the directory entry at position `offset` in `node`, or `None` past the end.
	fn readdir(&self, node: &Node, offset: u64) -> EResult<Option<DirEntry>> {
		let _ = (node, offset);
		Err(errno!(ENOTSUP))
	}

	/// Removes the child named `name` from the directory `node`.
	fn unlink(&self, node: &Arc<Node>, name: &[u8]) -> EResult<()> {
		let _ = (node, name);
		Err(errno!(ENOTSUP))
	}

	/// Called when the last reference to a node is dropped.
	///
	/// The default implementation does nothing; in-memory filesystems have no backing store to
	/// reclaim.
	fn release(&self, node: &Node) -> EResult<()> {
		let _ = node;
		Ok(())
	}

	/// Returns the node's attributes.
	fn getattr(&self, node: &Node) -> EResult<Attr> {
		let _ = node;
		Err(errno!(ENOTSUP))
	}
}

/// A VFS node.
#[derive(Debug)]
pub struct Node {
	/// The node's name within its parent directory.
	pub name: String,
	/// The node's type.
	pub file_type: FileType,
	/// The superblock of the filesystem this node belongs to.
	pub sb: Arc<Superblock>,
	/// The node's operations, backed by filesystem-private data.
	pub ops: Box<dyn NodeOps>,
}

impl Node {
	/// Creates a new node.
	pub fn new(
		name: String,
		file_type: FileType,
		sb: Arc<Superblock>,
		ops: Box<dyn NodeOps>,
	) -> Arc<Self> {
		Arc::new(Self {
			name,
			file_type,
			sb,
			ops,
		})
	}

	/// Releases the node, invoking its filesystem's [`NodeOps::release`].
	///
	/// This is called once the last reference to the node is about to be dropped.
	pub fn release(this: Arc<Self>) -> EResult<()> {
		let Some(node) = Arc::into_inner(this) else {
			// Someone else references it
			return Ok(());
		};
		node.ops.release(&node)
	}
}
