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

//! The deduplicating read/write path: hash on write, consult the digest BST, bump a
//! reference or allocate, and unreference whatever the slot used to point at (§4.6).
//!
//! Because a write is keyed by content rather than by physical slot, overwriting a shared
//! block naturally lands on a (possibly new) physical block instead of mutating shared
//! storage in place — no distinct copy-on-write path is needed.

use sha2::{Digest, Sha256};

use crate::block_alloc::BlockAllocator;
use crate::block_index::{BlockIndex, BlockMgtEntry, BlockMgtTable, DIGEST_LEN};
use crate::block_map;
use crate::device::Device;
use crate::error::FsResult;
use crate::inode::Inode;
use crate::superblock::Superblock;

/// Hashes one block's content. SHA-256 is the concrete digest this crate ships with (§6.4).
pub fn digest_of(data: &[u8]) -> [u8; DIGEST_LEN] {
	let mut hasher = Sha256::new();
	hasher.update(data);
	hasher.finalize().into()
}

/// Reads logical block `pos` of `inode` into `out` (exactly one block's worth). Unmapped
/// slots (including past EOF) read as zero.
pub fn read(dev: &Device, inode: &Inode, pos: u64, out: &mut [u8]) {
	let phys = block_map::resolve(dev, inode, pos);
	if phys == 0 {
		out.fill(0);
	} else {
		out.copy_from_slice(dev.read_block(phys));
	}
}

/// Writes `data` (exactly one block's worth) to logical block `pos` of `inode`, deduping
/// against the digest BST.
///
/// `pos` must already be mapped, i.e. `pos < inode.n_blocks` (callers grow the block map
/// first via [`block_map::grow`]).
pub fn write(
	dev: &mut Device,
	sb: &mut Superblock,
	mgt: &BlockMgtTable,
	inode: &mut Inode,
	pos: u64,
	data: &[u8],
) -> FsResult<()> {
	let digest = digest_of(data);
	let cur = block_map::resolve(dev, inode, pos);
	let existing = BlockIndex::search(mgt, dev, sb.bst_root, &digest);
	if existing != 0 {
		if cur == existing {
			log::trace!("dedup: write to block {pos} is a no-op rewrite of {cur}");
			return Ok(());
		}
		let mut entry = mgt.get(dev, existing);
		entry.refcount += 1;
		mgt.set(dev, existing, entry);
		log::debug!("dedup: block {pos} now shares physical block {existing} (refcount={})", entry.refcount);
		if cur != 0 {
			unref(dev, sb, mgt, cur)?;
		}
		block_map::update(dev, inode, pos, existing)?;
	} else {
		let new_phys = BlockAllocator::alloc(dev, sb)?;
		dev.write_block(new_phys, data);
		mgt.set(dev, new_phys, BlockMgtEntry {
			digest,
			refcount: 1,
			left: 0,
			right: 0,
		});
		match BlockIndex::insert(mgt, dev, sb.bst_root, new_phys) {
			Ok(new_root) => sb.bst_root = new_root,
			Err(e) => {
				// Digest collision against non-identical content: back out the
				// allocation entirely, leaving state as it was (§4.10).
				BlockAllocator::free(dev, sb, new_phys);
				return Err(e);
			}
		}
		log::debug!("dedup: block {pos} allocated fresh physical block {new_phys}");
		if cur != 0 {
			unref(dev, sb, mgt, cur)?;
		}
		block_map::update(dev, inode, pos, new_phys)?;
	}
	Ok(())
}

/// Decrements the reference count of physical block `phys`, removing it from the BST and
/// returning it to the freelist once the count reaches zero.
pub fn unref(dev: &mut Device, sb: &mut Superblock, mgt: &BlockMgtTable, phys: u64) -> FsResult<()> {
	let mut entry = mgt.get(dev, phys);
	debug_assert!(entry.refcount > 0, "unref of a block with refcount 0");
	entry.refcount = entry.refcount.saturating_sub(1);
	if entry.refcount == 0 {
		sb.bst_root = BlockIndex::remove(mgt, dev, sb.bst_root, phys)?;
		BlockAllocator::free(dev, sb, phys);
		log::trace!("unref: block {phys} reached refcount 0, freed");
	} else {
		mgt.set(dev, phys, entry);
		log::trace!("unref: block {phys} refcount now {}", entry.refcount);
	}
	Ok(())
}

/// Resizes `inode`'s block map to exactly `new_n` logical slots, unreferencing any data
/// block dropped by a shrink before reclaiming the now-unnecessary indirect-chain blocks.
/// No-op if `new_n == inode.n_blocks`.
pub fn resize(
	dev: &mut Device,
	sb: &mut Superblock,
	mgt: &BlockMgtTable,
	inode: &mut Inode,
	new_n: u64,
) -> FsResult<()> {
	use std::cmp::Ordering;
	match new_n.cmp(&inode.n_blocks) {
		Ordering::Equal => Ok(()),
		Ordering::Greater => block_map::grow(dev, sb, inode, new_n),
		Ordering::Less => {
			for pos in new_n..inode.n_blocks {
				let phys = block_map::resolve(dev, inode, pos);
				if phys != 0 {
					unref(dev, sb, mgt, phys)?;
				}
			}
			block_map::shrink_tail(dev, sb, inode, new_n);
			Ok(())
		}
	}
}
