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

//! The VFS aggregates every mounted filesystem into a single tree.
//!
//! Resolution has two stages: [`mountpoint::resolve`] picks the mounted superblock whose point is
//! the longest prefix of the path, then the remaining components are looked up one at a time
//! through the winning node's [`node::NodeOps`]. There is no entry cache and no permission model:
//! a lookup either succeeds on the underlying filesystem or it doesn't.

pub mod mountpoint;
pub mod node;

use crate::file::{
	path::{Component, Path},
	FileType, Mode,
};
use mountpoint::Superblock;
use node::Node;
use utils::{errno, errno::EResult, ptr::arc::Arc};

pub use mountpoint::{mount, unmount};

/// Resolves `path` down to its target node.
///
/// Path components are looked up one at a time, starting from the root of the mount covering
/// `path`. Symbolic links are not followed: a [`FileType::Link`] encountered along the way is
/// treated as an opaque leaf, and attempting to descend into one as if it were a directory fails
/// with [`errno::Errno::ENOTDIR`].
///
/// If no filesystem is mounted covering `path`, returns [`errno::Errno::ENODEV`].
pub fn resolve_path(path: &Path) -> EResult<Arc<Node>> {
	let (mount_point, sb) = mountpoint::resolve(path).ok_or_else(|| errno!(ENODEV))?;
	let relative = path.strip_prefix(&mount_point).unwrap_or(path);
	let mut node = sb.root.clone();
	for comp in relative.components() {
		let name = match comp {
			Component::Normal(name) => name,
			_ => continue,
		};
		if node.file_type != FileType::Directory {
			return Err(errno!(ENOTDIR));
		}
		node = node
			.ops
			.lookup(&node, name)?
			.ok_or_else(|| errno!(ENOENT))?;
	}
	Ok(node)
}

/// Resolves `path`'s parent directory and the name of its final component.
///
/// Used by operations that need to act on a directory entry rather than the node it names, such
/// as [`create_file`] or [`unlink_path`].
fn resolve_parent(path: &Path) -> EResult<(Arc<Node>, &[u8])> {
	let name = path.file_name().ok_or_else(|| errno!(ENOENT))?;
	let parent = path.parent().ok_or_else(|| errno!(ENOENT))?;
	let parent = resolve_path(parent)?;
	if parent.file_type != FileType::Directory {
		return Err(errno!(ENOTDIR));
	}
	Ok((parent, name))
}

/// Creates a regular file named by the last component of `path`, in the directory named by the
/// rest of `path`.
///
/// The following errors can be returned:
/// - The parent directory does not support creation, or is read-only: [`errno::Errno::ENOTSUP`]
/// - A component of the path does not exist: [`errno::Errno::ENOENT`]
/// - A component of the path (excluding the last) is not a directory: [`errno::Errno::ENOTDIR`]
/// - A file already exists under that name: [`errno::Errno::EEXIST`]
pub fn create_file(path: &Path, mode: Mode) -> EResult<Arc<Node>> {
	let (parent, name) = resolve_parent(path)?;
	parent.ops.create(&parent, name, mode)
}

/// Creates a directory named by the last component of `path`, in the directory named by the rest
/// of `path`. Errors as in [`create_file`].
pub fn mkdir(path: &Path, mode: Mode) -> EResult<Arc<Node>> {
	let (parent, name) = resolve_parent(path)?;
	parent.ops.mkdir(&parent, name, mode)
}

/// Removes the entry named by the last component of `path` from the directory named by the rest
/// of `path`.
///
/// The following errors can be returned:
/// - A component of the path does not exist: [`errno::Errno::ENOENT`]
/// - A component of the path (excluding the last) is not a directory: [`errno::Errno::ENOTDIR`]
/// - The parent directory does not support removal: [`errno::Errno::ENOTSUP`]
pub fn unlink_path(path: &Path) -> EResult<()> {
	let (parent, name) = resolve_parent(path)?;
	parent.ops.unlink(&parent, name)
}

/// Reads attributes of the node named by `path`. Fails as [`resolve_path`] does, plus
/// [`errno::Errno::ENOTSUP`] if the node's filesystem does not implement `getattr`.
pub fn getattr(path: &Path) -> EResult<node::Attr> {
	let node = resolve_path(path)?;
	node.ops.getattr(&node)
}

/// Returns the superblock mounted at the root of the VFS, if any.
pub fn root() -> Option<Arc<Superblock>> {
	mountpoint::root()
}
