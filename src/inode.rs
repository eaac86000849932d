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

//! The inode: the single fixed-size record shared by files and directories.
//!
//! Fields mirror §3 of SPEC_FULL.md. The on-device representation is a fixed-width byte
//! window rather than a `#[repr(C)]` transmute, so that no unsafe code is needed to read or
//! write an inode through the [`Device`](crate::device::Device).

use crate::device::Device;
use crate::error::{Error, FsResult};

/// Maximum length of a path component / inode name, in bytes.
pub const NAME_MAX: usize = 255;

/// Number of direct block pointers per inode (slots `0..K-1`).
pub const DIRECT_COUNT: usize = 15;
/// Total number of block-pointer slots per inode (`K`); the last one heads the indirect chain.
pub const BLOCK_PTRS: usize = DIRECT_COUNT + 1;

/// Serialized size of one inode record, in bytes.
pub const INODE_SIZE: usize = 1 // file_type
	+ 4 // mode
	+ 8 * 3 // atime, mtime, ctime
	+ 8 // size
	+ 8 // n_blocks
	+ 1 // name_len
	+ NAME_MAX // name
	+ BLOCK_PTRS * 8; // blocks[]

/// What an inode currently represents.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FileType {
	Unused,
	RegularFile,
	Directory,
}

impl FileType {
	fn to_tag(self) -> u8 {
		match self {
			FileType::Unused => 0,
			FileType::RegularFile => 1,
			FileType::Directory => 2,
		}
	}

	fn from_tag(tag: u8) -> FsResult<Self> {
		match tag {
			0 => Ok(FileType::Unused),
			1 => Ok(FileType::RegularFile),
			2 => Ok(FileType::Directory),
			_ => Err(Error::Internal),
		}
	}
}

/// A file or directory. Which one depends on [`Inode::file_type`]; the name by which the
/// parent directory refers to this inode is stored here rather than in the directory entry,
/// since hardlinks are out of scope (§1 Non-goals) and every inode has exactly one name.
#[derive(Debug, Clone)]
pub struct Inode {
	pub file_type: FileType,
	pub mode: u32,
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	/// Bytes for files, entry count for directories.
	pub size: u64,
	/// Number of logical blocks currently mapped (direct + indirect).
	pub n_blocks: u64,
	pub name: Box<[u8]>,
	/// Direct slots `0..DIRECT_COUNT`, then the indirect chain head at `DIRECT_COUNT`.
	pub blocks: [u64; BLOCK_PTRS],
}

impl Inode {
	/// A fresh, unused inode record.
	pub fn unused() -> Self {
		Self {
			file_type: FileType::Unused,
			mode: 0,
			atime: 0,
			mtime: 0,
			ctime: 0,
			size: 0,
			n_blocks: 0,
			name: Box::from([]),
			blocks: [0; BLOCK_PTRS],
		}
	}

	pub fn is_dir(&self) -> bool {
		matches!(self.file_type, FileType::Directory)
	}

	pub fn is_file(&self) -> bool {
		matches!(self.file_type, FileType::RegularFile)
	}

	fn to_bytes(&self) -> [u8; INODE_SIZE] {
		let mut buf = [0u8; INODE_SIZE];
		let mut off = 0;
		buf[off] = self.file_type.to_tag();
		off += 1;
		buf[off..off + 4].copy_from_slice(&self.mode.to_ne_bytes());
		off += 4;
		buf[off..off + 8].copy_from_slice(&self.atime.to_ne_bytes());
		off += 8;
		buf[off..off + 8].copy_from_slice(&self.mtime.to_ne_bytes());
		off += 8;
		buf[off..off + 8].copy_from_slice(&self.ctime.to_ne_bytes());
		off += 8;
		buf[off..off + 8].copy_from_slice(&self.size.to_ne_bytes());
		off += 8;
		buf[off..off + 8].copy_from_slice(&self.n_blocks.to_ne_bytes());
		off += 8;
		let name_len = self.name.len().min(NAME_MAX);
		buf[off] = name_len as u8;
		off += 1;
		buf[off..off + name_len].copy_from_slice(&self.name[..name_len]);
		off += NAME_MAX;
		for (i, b) in self.blocks.iter().enumerate() {
			let s = off + i * 8;
			buf[s..s + 8].copy_from_slice(&b.to_ne_bytes());
		}
		buf
	}

	fn from_bytes(buf: &[u8]) -> FsResult<Self> {
		let mut off = 0;
		let file_type = FileType::from_tag(buf[off])?;
		off += 1;
		let mode = u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap());
		off += 4;
		let atime = i64::from_ne_bytes(buf[off..off + 8].try_into().unwrap());
		off += 8;
		let mtime = i64::from_ne_bytes(buf[off..off + 8].try_into().unwrap());
		off += 8;
		let ctime = i64::from_ne_bytes(buf[off..off + 8].try_into().unwrap());
		off += 8;
		let size = u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap());
		off += 8;
		let n_blocks = u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap());
		off += 8;
		let name_len = buf[off] as usize;
		off += 1;
		let name = buf[off..off + name_len.min(NAME_MAX)].to_vec().into_boxed_slice();
		off += NAME_MAX;
		let mut blocks = [0u64; BLOCK_PTRS];
		for (i, slot) in blocks.iter_mut().enumerate() {
			let s = off + i * 8;
			*slot = u64::from_ne_bytes(buf[s..s + 8].try_into().unwrap());
		}
		Ok(Self {
			file_type,
			mode,
			atime,
			mtime,
			ctime,
			size,
			n_blocks,
			name,
			blocks,
		})
	}
}

/// A fixed-size array of inode records, laid out starting at `region_off` physical blocks
/// into the device.
pub struct InodeTable {
	region_off: u64,
	total: u64,
	per_block: usize,
}

impl InodeTable {
	/// `total` is the number of inode slots the table was formatted with.
	pub fn new(region_off: u64, total: u64, block_size: usize) -> Self {
		let per_block = block_size / INODE_SIZE;
		assert!(per_block > 0, "block size too small to hold a single inode");
		Self {
			region_off,
			total,
			per_block,
		}
	}

	/// Number of blocks the inode region occupies for `total` inodes at `block_size`.
	pub fn region_blocks(total: u64, block_size: usize) -> u64 {
		let per_block = (block_size / INODE_SIZE).max(1) as u64;
		total.div_ceil(per_block)
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	fn locate(&self, nr: u64) -> (u64, usize) {
		let block = self.region_off + nr / self.per_block as u64;
		let slot = (nr % self.per_block as u64) as usize;
		(block, slot)
	}

	/// Reads inode number `nr`.
	pub fn read(&self, dev: &Device, nr: u64) -> FsResult<Inode> {
		assert!(nr < self.total, "inode number out of range");
		let (block, slot) = self.locate(nr);
		let raw = dev.read_block(block);
		let start = slot * INODE_SIZE;
		Inode::from_bytes(&raw[start..start + INODE_SIZE])
	}

	/// Overwrites inode number `nr`.
	pub fn write(&self, dev: &mut Device, nr: u64, inode: &Inode) {
		assert!(nr < self.total, "inode number out of range");
		let (block, slot) = self.locate(nr);
		let bs = dev.block_size();
		let mut raw = dev.read_block(block).to_vec();
		let start = slot * INODE_SIZE;
		raw[start..start + INODE_SIZE].copy_from_slice(&inode.to_bytes());
		debug_assert_eq!(raw.len(), bs);
		dev.write_block(block, &raw);
	}

	/// Scans for the first `Unused` inode and returns its number.
	pub fn find_free(&self, dev: &Device) -> FsResult<u64> {
		for nr in 0..self.total {
			if matches!(self.read(dev, nr)?.file_type, FileType::Unused) {
				return Ok(nr);
			}
		}
		Err(Error::NoInode)
	}
}
