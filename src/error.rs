/*
 * Copyright 2026 dedupfs contributors
 *
 * This file is part of dedupfs.
 *
 * dedupfs is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * dedupfs is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
 * details.
 *
 * You should have received a copy of the GNU General Public License along
 * with dedupfs. If not, see <https://www.gnu.org/licenses/>.
 */

//! Error kinds surfaced by the CORE to the FUSE adapter.

use thiserror::Error;

/// Result alias used throughout the CORE.
pub type FsResult<T> = Result<T, Error>;

/// Every failure the CORE can report.
///
/// These map to POSIX error codes at the FUSE boundary (see `fuse_host`); the CORE itself
/// never deals in errno.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum Error {
	/// A path component does not exist.
	#[error("no such file or directory")]
	NotFound,
	/// `create`/`mkdir` target already exists.
	#[error("file exists")]
	Exists,
	/// A non-last path component, or an `mkdir`/`rmdir` target, is not a directory.
	#[error("not a directory")]
	NotADirectory,
	/// `read`/`write` was attempted on a directory.
	#[error("is a directory")]
	IsADirectory,
	/// `rmdir`/`remove` target still has children.
	#[error("directory not empty")]
	NotEmpty,
	/// `open` flags do not match the requested access.
	#[error("permission denied")]
	PermissionDenied,
	/// A path component exceeds [`crate::inode::NAME_MAX`] bytes.
	#[error("name too long")]
	NameTooLong,
	/// The data-block freelist is exhausted, or digest-insert collided (§4.10).
	#[error("no space left on device")]
	NoSpace,
	/// The inode table has no free entry.
	#[error("no free inode")]
	NoInode,
	/// An invariant was violated; indicates a bug in the CORE, not caller misuse.
	#[error("internal filesystem error")]
	Internal,
}
