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

//! FUSE adapter (§6.3): translates `fuser::Filesystem` callbacks into [`FsCore`] operations.
//!
//! `fuser` is inode-handle-based (`lookup(parent_ino, name)`, `getattr(ino)`, ...) while
//! [`FsCore`] is path-based (§6.1). This module bridges the two by maintaining a table
//! mapping every inode number FUSE has seen back to its resolved path; FUSE's root inode (1)
//! maps to `"/"`, and the CORE's own inode numbers are offset by one everywhere else (FUSE
//! reserves inode 1 for the root; the CORE's root is inode 0).
//!
//! This module owns no filesystem state of its own beyond that path cache and whatever
//! open-file-handle bookkeeping `fuser`'s trait shape requires; the "handle" `open` hands
//! back is a transparent wrapper around the resolved inode number, since the CORE has no
//! separate notion of an open file.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
	FileAttr, FileType as FuseFileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
	ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
};
use libc::{EEXIST, EINVAL, EISDIR, ENOENT, ENOSPC, ENOTDIR, ENOTEMPTY, EPERM};

use crate::error::Error;
use crate::inode::FileType as CoreFileType;
use crate::{Attr as CoreAttr, FsCore, OpenFlags};

const TTL: Duration = Duration::from_secs(1);
const FUSE_ROOT_INO: u64 = 1;

fn errno(e: Error) -> i32 {
	match e {
		Error::NotFound => ENOENT,
		Error::Exists => EEXIST,
		Error::NotADirectory => ENOTDIR,
		Error::IsADirectory => EISDIR,
		Error::NotEmpty => ENOTEMPTY,
		Error::PermissionDenied => EPERM,
		Error::NameTooLong => libc::ENAMETOOLONG,
		Error::NoSpace => ENOSPC,
		Error::NoInode => ENOSPC,
		Error::Internal => EINVAL,
	}
}

fn to_fuse_attr(ino: u64, a: &CoreAttr, block_size: u32) -> FileAttr {
	let to_time = |secs: i64| UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
	FileAttr {
		ino,
		size: a.size,
		blocks: a.n_blocks,
		atime: to_time(a.atime),
		mtime: to_time(a.mtime),
		ctime: to_time(a.ctime),
		crtime: to_time(a.ctime),
		kind: match a.file_type {
			CoreFileType::Directory => FuseFileType::Directory,
			_ => FuseFileType::RegularFile,
		},
		perm: (a.mode & 0o7777) as u16,
		nlink: a.nlink,
		uid: 0,
		gid: 0,
		rdev: 0,
		blksize: block_size,
		flags: 0,
	}
}

/// Bridges the path-oriented [`FsCore`] to `fuser`'s inode-oriented trait.
pub struct DedupFsHost {
	core: Mutex<FsCore>,
	paths: Mutex<HashMap<u64, String>>,
}

impl DedupFsHost {
	pub fn new(core: FsCore) -> Self {
		let mut paths = HashMap::new();
		paths.insert(FUSE_ROOT_INO, "/".to_string());
		Self {
			core: Mutex::new(core),
			paths: Mutex::new(paths),
		}
	}

	fn path_of(&self, ino: u64) -> Option<String> {
		self.paths.lock().unwrap().get(&ino).cloned()
	}

	fn join(parent_path: &str, name: &OsStr) -> String {
		let name = name.to_string_lossy();
		if parent_path == "/" {
			format!("/{name}")
		} else {
			format!("{parent_path}/{name}")
		}
	}

	fn remember(&self, core_nr: u64, path: String) -> u64 {
		let ino = core_nr + 1;
		self.paths.lock().unwrap().insert(ino, path);
		ino
	}
}

impl Filesystem for DedupFsHost {
	fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(ENOENT);
			return;
		};
		let path = Self::join(&parent_path, name);
		let core = self.core.lock().unwrap();
		match core.getattr(&path) {
			Ok(attr) => {
				let nr = match core.inode_nr(&path) {
					Ok(nr) => nr,
					Err(e) => {
						reply.error(errno(e));
						return;
					}
				};
				let ino = self.remember(nr, path);
				reply.entry(&TTL, &to_fuse_attr(ino, &attr, core.block_size() as u32), 0);
			}
			Err(e) => reply.error(errno(e)),
		}
	}

	fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
		let Some(path) = self.path_of(ino) else {
			reply.error(ENOENT);
			return;
		};
		let core = self.core.lock().unwrap();
		match core.getattr(&path) {
			Ok(attr) => reply.attr(&TTL, &to_fuse_attr(ino, &attr, core.block_size() as u32)),
			Err(e) => reply.error(errno(e)),
		}
	}

	fn setattr(
		&mut self,
		_req: &Request,
		ino: u64,
		_mode: Option<u32>,
		_uid: Option<u32>,
		_gid: Option<u32>,
		size: Option<u64>,
		atime: Option<fuser::TimeOrNow>,
		mtime: Option<fuser::TimeOrNow>,
		_ctime: Option<std::time::SystemTime>,
		_fh: Option<u64>,
		_crtime: Option<std::time::SystemTime>,
		_chgtime: Option<std::time::SystemTime>,
		_bkuptime: Option<std::time::SystemTime>,
		_flags: Option<u32>,
		reply: ReplyAttr,
	) {
		let Some(path) = self.path_of(ino) else {
			reply.error(ENOENT);
			return;
		};
		let mut core = self.core.lock().unwrap();
		if let Some(size) = size {
			if let Err(e) = core.truncate(&path, size) {
				reply.error(errno(e));
				return;
			}
		}
		if atime.is_some() || mtime.is_some() {
			let secs = |t: fuser::TimeOrNow| match t {
				fuser::TimeOrNow::SpecificTime(t) => t
					.duration_since(UNIX_EPOCH)
					.map(|d| d.as_secs() as i64)
					.unwrap_or(0),
				fuser::TimeOrNow::Now => SystemTime::now()
					.duration_since(UNIX_EPOCH)
					.map(|d| d.as_secs() as i64)
					.unwrap_or(0),
			};
			let a = atime.map(secs).unwrap_or(0);
			let m = mtime.map(secs).unwrap_or(0);
			if let Err(e) = core.utimens(&path, a, m) {
				reply.error(errno(e));
				return;
			}
		}
		match core.getattr(&path) {
			Ok(attr) => reply.attr(&TTL, &to_fuse_attr(ino, &attr, core.block_size() as u32)),
			Err(e) => reply.error(errno(e)),
		}
	}

	fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
		let Some(path) = self.path_of(ino) else {
			reply.error(ENOENT);
			return;
		};
		let parent_ino = if path == "/" {
			FUSE_ROOT_INO
		} else {
			// ".." inode number: whatever maps to the path with its last segment removed.
			// Since every live path was recorded on the way here, this always succeeds.
			let parent_path = path.rsplit_once('/').map(|(p, _)| p).filter(|p| !p.is_empty()).unwrap_or("/");
			self.paths
				.lock()
				.unwrap()
				.iter()
				.find(|(_, p)| p.as_str() == parent_path)
				.map(|(i, _)| *i)
				.unwrap_or(FUSE_ROOT_INO)
		};

		let core = self.core.lock().unwrap();
		let children = match core.readdir(&path) {
			Ok(c) => c,
			Err(e) => {
				reply.error(errno(e));
				return;
			}
		};
		let mut entries: Vec<(u64, FuseFileType, String)> = vec![
			(ino, FuseFileType::Directory, ".".to_string()),
			(parent_ino, FuseFileType::Directory, "..".to_string()),
		];
		for (name, core_nr) in children {
			let child_ino = core_nr + 1;
			let child_path = Self::join(&path, OsStr::new(&name));
			self.paths.lock().unwrap().entry(child_ino).or_insert(child_path);
			let kind = match core.getattr(&Self::join(&path, OsStr::new(&name))) {
				Ok(a) if a.file_type == CoreFileType::Directory => FuseFileType::Directory,
				_ => FuseFileType::RegularFile,
			};
			entries.push((child_ino, kind, name));
		}
		for (i, (e_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
			if reply.add(e_ino, (i + 1) as i64, kind, name) {
				break;
			}
		}
		reply.ok();
	}

	fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
		let core = self.core.lock().unwrap();
		let s = core.statfs();
		reply.statfs(
			s.total_blocks,
			s.free_blocks,
			s.free_blocks,
			s.total_inodes,
			s.free_inodes,
			s.block_size,
			s.name_max,
			0,
		);
	}

	fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
		let Some(path) = self.path_of(ino) else {
			reply.error(ENOENT);
			return;
		};
		let access = flags & libc::O_ACCMODE;
		let open_flags = OpenFlags {
			read: access == libc::O_RDONLY || access == libc::O_RDWR,
			write: access == libc::O_WRONLY || access == libc::O_RDWR,
		};
		let core = self.core.lock().unwrap();
		match core.open(&path, open_flags) {
			Ok(nr) => reply.opened(nr, 0),
			Err(e) => reply.error(errno(e)),
		}
	}

	fn read(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyData,
	) {
		let Some(path) = self.path_of(ino) else {
			reply.error(ENOENT);
			return;
		};
		let core = self.core.lock().unwrap();
		match core.read(&path, offset.max(0) as u64, size) {
			Ok(data) => reply.data(&data),
			Err(e) => reply.error(errno(e)),
		}
	}

	fn write(
		&mut self,
		_req: &Request,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: ReplyWrite,
	) {
		let Some(path) = self.path_of(ino) else {
			reply.error(ENOENT);
			return;
		};
		let mut core = self.core.lock().unwrap();
		match core.write(&path, offset.max(0) as u64, data) {
			Ok(n) => reply.written(n),
			Err(e) => reply.error(errno(e)),
		}
	}

	fn create(
		&mut self,
		_req: &Request,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		flags: i32,
		reply: fuser::ReplyCreate,
	) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(ENOENT);
			return;
		};
		let path = Self::join(&parent_path, name);
		let mut core = self.core.lock().unwrap();
		match core.create(&path, mode) {
			Ok(nr) => {
				let ino = self.remember(nr, path.clone());
				let attr = core.getattr(&path).expect("just created");
				let _ = flags;
				reply.created(&TTL, &to_fuse_attr(ino, &attr, core.block_size() as u32), 0, nr, 0);
			}
			Err(e) => reply.error(errno(e)),
		}
	}

	fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(ENOENT);
			return;
		};
		let path = Self::join(&parent_path, name);
		let mut core = self.core.lock().unwrap();
		match core.mkdir(&path, mode) {
			Ok(nr) => {
				let ino = self.remember(nr, path.clone());
				let attr = core.getattr(&path).expect("just created");
				reply.entry(&TTL, &to_fuse_attr(ino, &attr, core.block_size() as u32), 0);
			}
			Err(e) => reply.error(errno(e)),
		}
	}

	fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(ENOENT);
			return;
		};
		let path = Self::join(&parent_path, name);
		let mut core = self.core.lock().unwrap();
		match core.rmdir(&path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(errno(e)),
		}
	}

	fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
		let Some(parent_path) = self.path_of(parent) else {
			reply.error(ENOENT);
			return;
		};
		let path = Self::join(&parent_path, name);
		let mut core = self.core.lock().unwrap();
		match core.unlink(&path) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(errno(e)),
		}
	}
}
