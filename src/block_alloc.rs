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

//! Data-block freelist: a singly linked list threaded through the first 8 bytes of every
//! free data block, head kept in the superblock (§4.2).

use crate::device::Device;
use crate::error::{Error, FsResult};
use crate::superblock::Superblock;

/// Allocator over the data region's freelist.
///
/// Never coalesces; blocks come back in LIFO order (whatever was freed most recently is
/// handed out first), same as the source.
pub struct BlockAllocator;

impl BlockAllocator {
	/// Threads every data block `[data_off, data_off + data_blocks)` into a single freelist,
	/// in ascending order, and points `sb.freelist_head` at the first one. Used only at
	/// format time.
	pub fn format_freelist(dev: &mut Device, sb: &mut Superblock) {
		let block_size = dev.block_size();
		if sb.data_blocks == 0 {
			sb.freelist_head = 0;
			return;
		}
		for i in 0..sb.data_blocks {
			let phys = sb.data_off + i;
			let next = if i + 1 < sb.data_blocks { phys + 1 } else { 0 };
			let mut buf = vec![0u8; block_size];
			buf[..8].copy_from_slice(&next.to_ne_bytes());
			dev.write_block(phys, &buf);
		}
		sb.freelist_head = sb.data_off;
		sb.blocks_used = 0;
	}

	/// Pops the head of the freelist. The returned block's contents are undefined past the
	/// first 8 bytes; callers must fully overwrite it before exposing it through any index.
	pub fn alloc(dev: &mut Device, sb: &mut Superblock) -> FsResult<u64> {
		if sb.freelist_head == 0 {
			log::warn!("block allocator exhausted ({} blocks used)", sb.blocks_used);
			return Err(Error::NoSpace);
		}
		let phys = sb.freelist_head;
		let raw = dev.read_block(phys);
		let next = u64::from_ne_bytes(raw[..8].try_into().unwrap());
		sb.freelist_head = next;
		sb.blocks_used += 1;
		log::trace!("alloc: block {phys} (used={})", sb.blocks_used);
		Ok(phys)
	}

	/// Pushes `phys` back onto the freelist.
	pub fn free(dev: &mut Device, sb: &mut Superblock, phys: u64) {
		let block_size = dev.block_size();
		let mut buf = vec![0u8; block_size];
		buf[..8].copy_from_slice(&sb.freelist_head.to_ne_bytes());
		dev.write_block(phys, &buf);
		sb.freelist_head = phys;
		sb.blocks_used = sb.blocks_used.saturating_sub(1);
		log::trace!("free: block {phys} (used={})", sb.blocks_used);
	}

	/// Walks the freelist from `head`, returning its length. Test/diagnostic use only
	/// (§8 P5); not on any hot path.
	pub fn freelist_len(dev: &Device, head: u64) -> u64 {
		let mut n = 0;
		let mut cur = head;
		while cur != 0 {
			n += 1;
			let raw = dev.read_block(cur);
			cur = u64::from_ne_bytes(raw[..8].try_into().unwrap());
		}
		n
	}
}
