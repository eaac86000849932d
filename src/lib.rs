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

//! `dedupfs`: an in-memory, content-addressed deduplicating filesystem (§1–§4 of
//! SPEC_FULL.md), exposed to the outside world through [`fuse_host`].
//!
//! [`FsCore`] is the single owner of all on-device state and the entry point for every
//! operation in the host callback surface (§6.1). It is deliberately path-keyed, not
//! inode-handle-keyed: the core has no notion of an "open file" distinct from the inode
//! itself (§6.3).

pub mod block_alloc;
pub mod block_index;
pub mod block_map;
pub mod dedup_io;
pub mod device;
pub mod directory;
pub mod error;
pub mod fuse_host;
pub mod inode;
pub mod path;
pub mod superblock;

use std::time::{SystemTime, UNIX_EPOCH};

use block_alloc::BlockAllocator;
use block_index::BlockMgtTable;
use device::Device;
use error::{Error, FsResult};
use inode::{FileType, Inode, InodeTable};
use superblock::Superblock;

fn now_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

/// Attributes reported by `getattr` (§6.1).
#[derive(Debug, Clone, Copy)]
pub struct Attr {
	pub file_type: FileType,
	pub mode: u32,
	pub size: u64,
	pub n_blocks: u64,
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	pub nlink: u32,
}

/// Aggregate space/inode usage reported by `statfs` (§6.1).
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
	pub block_size: u32,
	pub total_blocks: u64,
	pub free_blocks: u64,
	pub total_inodes: u64,
	pub free_inodes: u64,
	pub name_max: u32,
}

/// The access mode requested of `open` (§6.1). At least one of `read`/`write` must be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
	pub read: bool,
	pub write: bool,
}

/// The filesystem core: owns the backing [`Device`] and every index built on top of it.
///
/// Every method here corresponds directly to one operation of §6.1; none of them know
/// anything about FUSE, inode-number offsets, or open-file-handle bookkeeping — that lives
/// entirely in [`fuse_host`].
pub struct FsCore {
	dev: Device,
	sb: Superblock,
	itable: InodeTable,
	mgt: BlockMgtTable,
}

impl FsCore {
	/// Formats a fresh device of `total_blocks` blocks of `block_size` bytes, with room for
	/// `inode_count` inodes, and initializes the root directory (§3 Lifecycle).
	pub fn format(total_blocks: u64, block_size: usize, inode_count: u64) -> Self {
		let mut sb = Superblock::layout(total_blocks, block_size, inode_count);
		let mut dev = Device::new(total_blocks, block_size);
		BlockAllocator::format_freelist(&mut dev, &mut sb);
		let itable = InodeTable::new(sb.inode_off, inode_count, block_size);
		let mgt = BlockMgtTable::new(sb.blockmgt_off, sb.data_off, sb.data_blocks, block_size);

		let now = now_secs();
		let mut root = Inode::unused();
		root.file_type = FileType::Directory;
		root.mode = 0o755;
		root.atime = now;
		root.mtime = now;
		root.ctime = now;
		itable.write(&mut dev, sb.root_dir, &root);
		sb.inode_used = 1;

		log::info!(
			"formatted dedupfs: {total_blocks} blocks x {block_size}B, {} data blocks, {inode_count} inodes",
			sb.data_blocks
		);
		Self { dev, sb, itable, mgt }
	}

	pub fn block_size(&self) -> usize {
		self.dev.block_size()
	}

	fn attr_of(&self, nr: u64, inode: &Inode) -> FsResult<Attr> {
		let nlink = if inode.is_dir() {
			2 + directory::children(&self.dev, &self.itable, nr)?.len() as u32
		} else {
			1
		};
		Ok(Attr {
			file_type: inode.file_type,
			mode: inode.mode,
			size: inode.size,
			n_blocks: inode.n_blocks,
			atime: inode.atime,
			mtime: inode.mtime,
			ctime: inode.ctime,
			nlink,
		})
	}

	/// §6.1 `getattr`.
	pub fn getattr(&self, path: &str) -> FsResult<Attr> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		let inode = self.itable.read(&self.dev, nr)?;
		self.attr_of(nr, &inode)
	}

	/// Resolves `path` to its CORE inode number without creating anything. Used by
	/// [`fuse_host`] to recover the number to key its ino↔path cache on; not itself part of
	/// the §6.1 surface (nothing there needs a bare inode number).
	pub fn inode_nr(&self, path: &str) -> FsResult<u64> {
		path::lookup(&self.dev, &self.sb, &self.itable, path)
	}

	/// §6.1 `readdir`: child entries only, in insertion order. `.` and `..` are synthesized by
	/// the FUSE adapter, which is the layer that actually knows inode numbers in FUSE's
	/// numbering space.
	pub fn readdir(&self, path: &str) -> FsResult<Vec<(String, u64)>> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		let dir = self.itable.read(&self.dev, nr)?;
		if !dir.is_dir() {
			return Err(Error::NotADirectory);
		}
		let mut out = Vec::with_capacity(dir.size as usize);
		for child_nr in directory::children(&self.dev, &self.itable, nr)? {
			let child = self.itable.read(&self.dev, child_nr)?;
			let name = String::from_utf8_lossy(&child.name).into_owned();
			out.push((name, child_nr));
		}
		Ok(out)
	}

	/// §6.1 `statfs`.
	pub fn statfs(&self) -> StatFs {
		StatFs {
			block_size: self.sb.block_size,
			total_blocks: self.dev.block_count(),
			free_blocks: self.sb.data_blocks - self.sb.blocks_used,
			total_inodes: self.sb.inode_count,
			free_inodes: self.sb.inode_count - self.sb.inode_used,
			name_max: inode::NAME_MAX as u32,
		}
	}

	/// §6.1 `open`. The core has no separate open-file concept; the returned "handle" is just
	/// the resolved inode number, which the FUSE adapter threads back through `read`/`write`.
	pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<u64> {
		if !flags.read && !flags.write {
			return Err(Error::PermissionDenied);
		}
		path::lookup(&self.dev, &self.sb, &self.itable, path)
	}

	/// §6.1 `read`. Reads at most `size` bytes starting at `offset`, short near EOF (B2).
	pub fn read(&self, path: &str, offset: u64, size: u32) -> FsResult<Vec<u8>> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		let inode = self.itable.read(&self.dev, nr)?;
		if inode.is_dir() {
			return Err(Error::IsADirectory);
		}
		let want_end = offset.saturating_add(size as u64);
		let end = want_end.min(inode.size);
		if offset >= end {
			return Ok(Vec::new());
		}
		let bs = self.dev.block_size() as u64;
		let mut out = Vec::with_capacity((end - offset) as usize);
		let mut pos = offset;
		let mut block_buf = vec![0u8; bs as usize];
		while pos < end {
			let blk = pos / bs;
			let in_block = (pos % bs) as usize;
			dedup_io::read(&self.dev, &inode, blk, &mut block_buf);
			let take = ((end - pos) as usize).min(bs as usize - in_block);
			out.extend_from_slice(&block_buf[in_block..in_block + take]);
			pos += take as u64;
		}
		Ok(out)
	}

	/// §6.1 `write`. Extends the file and rounds up block allocation as needed.
	pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> FsResult<u32> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		let mut inode = self.itable.read(&self.dev, nr)?;
		if inode.is_dir() {
			return Err(Error::IsADirectory);
		}
		let bs = self.dev.block_size() as u64;
		let new_size = offset.saturating_add(data.len() as u64).max(inode.size);
		let new_n_blocks = new_size.div_ceil(bs);
		if new_n_blocks > inode.n_blocks {
			dedup_io::resize(&mut self.dev, &mut self.sb, &self.mgt, &mut inode, new_n_blocks)?;
		}

		let mut pos = offset;
		let end = offset + data.len() as u64;
		let mut block_buf = vec![0u8; bs as usize];
		while pos < end {
			let blk = pos / bs;
			let in_block = (pos % bs) as usize;
			let take = ((end - pos) as usize).min(bs as usize - in_block);
			// Partial-block writes must preserve the untouched bytes of the block.
			if take < bs as usize {
				dedup_io::read(&self.dev, &inode, blk, &mut block_buf);
			}
			let src_start = (pos - offset) as usize;
			block_buf[in_block..in_block + take].copy_from_slice(&data[src_start..src_start + take]);
			dedup_io::write(&mut self.dev, &mut self.sb, &self.mgt, &mut inode, blk, &block_buf)?;
			pos += take as u64;
		}

		inode.size = new_size;
		inode.mtime = now_secs();
		self.itable.write(&mut self.dev, nr, &inode);
		Ok(data.len() as u32)
	}

	/// §6.1 `truncate`. Shrinks or grows; newly exposed bytes on grow read as zero (B3).
	pub fn truncate(&mut self, path: &str, size: u64) -> FsResult<()> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		let mut inode = self.itable.read(&self.dev, nr)?;
		if inode.is_dir() {
			return Err(Error::IsADirectory);
		}
		let bs = self.dev.block_size() as u64;
		let new_n_blocks = size.div_ceil(bs);
		dedup_io::resize(&mut self.dev, &mut self.sb, &self.mgt, &mut inode, new_n_blocks)?;
		inode.size = size;
		inode.mtime = now_secs();
		self.itable.write(&mut self.dev, nr, &inode);
		Ok(())
	}

	fn create_entry(&mut self, path: &str, mode: u32, file_type: FileType) -> FsResult<u64> {
		if path::lookup(&self.dev, &self.sb, &self.itable, path).is_ok() {
			return Err(Error::Exists);
		}
		let nr = path::resolve(&mut self.dev, &mut self.sb, &self.mgt, &self.itable, path, true)?;
		let now = now_secs();
		let mut inode = self.itable.read(&self.dev, nr)?;
		inode.file_type = file_type;
		inode.mode = mode;
		inode.atime = now;
		inode.mtime = now;
		inode.ctime = now;
		self.itable.write(&mut self.dev, nr, &inode);
		Ok(nr)
	}

	/// §6.1 `create`.
	pub fn create(&mut self, path: &str, mode: u32) -> FsResult<u64> {
		self.create_entry(path, mode, FileType::RegularFile)
	}

	/// §6.1 `mkdir`.
	pub fn mkdir(&mut self, path: &str, mode: u32) -> FsResult<u64> {
		self.create_entry(path, mode, FileType::Directory)
	}

	/// §6.1 `rmdir`.
	pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		if !self.itable.read(&self.dev, nr)?.is_dir() {
			return Err(Error::NotADirectory);
		}
		path::remove(&mut self.dev, &mut self.sb, &self.mgt, &self.itable, path)
	}

	/// §6.1 `unlink`.
	pub fn unlink(&mut self, path: &str) -> FsResult<()> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		if self.itable.read(&self.dev, nr)?.is_dir() {
			return Err(Error::IsADirectory);
		}
		path::remove(&mut self.dev, &mut self.sb, &self.mgt, &self.itable, path)
	}

	/// §6.1 `utimens`.
	pub fn utimens(&mut self, path: &str, atime_sec: i64, mtime_sec: i64) -> FsResult<()> {
		let nr = path::lookup(&self.dev, &self.sb, &self.itable, path)?;
		let mut inode = self.itable.read(&self.dev, nr)?;
		inode.atime = atime_sec;
		inode.mtime = mtime_sec;
		self.itable.write(&mut self.dev, nr, &inode);
		Ok(())
	}
}
