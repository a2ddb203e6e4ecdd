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

//! Filesystem types register themselves under a name and know how to mount a device into a
//! [`Superblock`]. Mounted superblocks are tracked in a flat, process-wide mount list; path
//! resolution picks the entry whose point is the longest prefix of the path being resolved.

use crate::{
	device::DeviceIO,
	file::{
		path::{Path, PathBuf},
		vfs::node::Node,
	},
	sync::IntMutex,
};
use core::{any::Any, fmt::Debug};
use utils::{boxed::Box, collections::vec::Vec, errno, errno::EResult, ptr::arc::Arc, TryClone};

/// A registered filesystem type, able to mount a device (or nothing, for virtual filesystems)
/// into a [`Superblock`].
pub trait FilesystemType: Debug + Send + Sync {
	/// The name filesystems of this type are mounted under (e.g. `"tmpfs"`, `"ext2"`).
	fn name(&self) -> &'static str;

	/// Mounts a new instance of this filesystem type on `device`.
	///
	/// `device` is `None` for filesystems with no backing storage.
	fn mount(&self, device: Option<Arc<dyn DeviceIO>>) -> EResult<Arc<Superblock>>;
}

/// A mounted filesystem instance.
pub struct Superblock {
	/// The name of the filesystem type this instance was mounted from.
	pub fs_name: &'static str,
	/// The backing storage device, if any.
	pub device: Option<Arc<dyn DeviceIO>>,
	/// The root node of the mounted filesystem.
	pub root: Arc<Node>,
	/// Filesystem-private data, downcast by the owning [`FilesystemType`]/[`Node`] operations.
	pub data: Box<dyn Any + Send + Sync>,
}

impl Debug for Superblock {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Superblock")
			.field("fs_name", &self.fs_name)
			.finish_non_exhaustive()
	}
}

/// An entry in the process-wide mount list, pairing a mount point path with the superblock
/// mounted there.
struct MountEntry {
	point: PathBuf,
	sb: Arc<Superblock>,
}

/// The registry of known filesystem types.
static FS_TYPES: IntMutex<Vec<Arc<dyn FilesystemType>>> = IntMutex::new(Vec::new());

/// Registers a filesystem type, making it available to [`mount`] under its name.
pub fn register_type(ft: Arc<dyn FilesystemType>) -> EResult<()> {
	let mut types = FS_TYPES.lock();
	if types.iter().any(|t| t.name() == ft.name()) {
		return Err(errno!(EEXIST));
	}
	types.push(ft);
	Ok(())
}

/// Returns the registered filesystem type named `name`, if any.
pub fn get_type(name: &[u8]) -> Option<Arc<dyn FilesystemType>> {
	FS_TYPES
		.lock()
		.iter()
		.find(|t| t.name().as_bytes() == name)
		.cloned()
}

/// The process-wide mount list.
static MOUNTS: IntMutex<Vec<MountEntry>> = IntMutex::new(Vec::new());

/// Mounts the filesystem type named `name` on `device`, attaching it at `point`.
///
/// If the type is not registered, returns [`errno::ENODEV`]. If a filesystem is already mounted
/// exactly at `point`, returns [`errno::EEXIST`].
pub fn mount(point: PathBuf, name: &[u8], device: Option<Arc<dyn DeviceIO>>) -> EResult<()> {
	let ft = get_type(name).ok_or_else(|| errno!(ENODEV))?;
	let mut mounts = MOUNTS.lock();
	if mounts.iter().any(|e| &*e.point == &*point) {
		return Err(errno!(EEXIST));
	}
	let sb = ft.mount(device)?;
	mounts.push(MountEntry { point, sb });
	Ok(())
}

/// Unmounts the filesystem mounted at `point`.
///
/// If nothing is mounted exactly at `point`, returns [`errno::ENOENT`].
pub fn unmount(point: &Path) -> EResult<()> {
	let mut mounts = MOUNTS.lock();
	let idx = mounts
		.iter()
		.position(|e| &*e.point == point)
		.ok_or_else(|| errno!(ENOENT))?;
	mounts.remove(idx);
	Ok(())
}

/// Resolves the mount covering `path`, returning the matching mount point and its superblock.
///
/// The longest mount-point prefix of `path` wins.
pub fn resolve(path: &Path) -> Option<(PathBuf, Arc<Superblock>)> {
	let mounts = MOUNTS.lock();
	mounts
		.iter()
		.filter(|e| path.starts_with(&e.point))
		.max_by_key(|e| e.point.len())
		.map(|e| (e.point.try_clone().unwrap_or_else(|_| PathBuf::root()), e.sb.clone()))
}

/// Returns the superblock mounted at the root, if any.
pub fn root() -> Option<Arc<Superblock>> {
	resolve(Path::root()).map(|(_, sb)| sb)
}
