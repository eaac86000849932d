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

//! Logical-to-physical translation within one inode: direct slots plus a singly linked
//! indirect chain (§4.5).
//!
//! This module only ever allocates/frees *indirect-chain* blocks; freeing the *data* blocks
//! a shrinking file used to reference is the caller's job (via [`crate::dedup_io`]), since
//! that requires the digest BST which this module deliberately knows nothing about.

use crate::block_alloc::BlockAllocator;
use crate::device::Device;
use crate::error::{Error, FsResult};
use crate::inode::{Inode, DIRECT_COUNT};
use crate::superblock::Superblock;

/// Usable data-block pointers per indirect-chain block: the block holds `block_size / 8`
/// `u64` entries, the last of which is the link to the next chain block.
fn chain_capacity(block_size: usize) -> usize {
	block_size / 8 - 1
}

fn read_chain(dev: &Device, phys: u64) -> Vec<u64> {
	dev.read_block(phys)
		.chunks_exact(8)
		.map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
		.collect()
}

fn write_chain(dev: &mut Device, phys: u64, entries: &[u64]) {
	let mut buf = vec![0u8; dev.block_size()];
	for (i, e) in entries.iter().enumerate() {
		buf[i * 8..i * 8 + 8].copy_from_slice(&e.to_ne_bytes());
	}
	dev.write_block(phys, &buf);
}

/// Translates a logical block index within `inode` to a physical block number, or `0` if
/// that logical slot is unmapped (including "past n_blocks", which callers treat the same
/// as "reads as zero").
pub fn resolve(dev: &Device, inode: &Inode, pos: u64) -> u64 {
	let pos = pos as usize;
	if pos < DIRECT_COUNT {
		return inode.blocks[pos];
	}
	let d = chain_capacity(dev.block_size());
	let mut rem = pos - DIRECT_COUNT;
	let mut chain = inode.blocks[DIRECT_COUNT];
	while chain != 0 && rem >= d {
		let entries = read_chain(dev, chain);
		chain = entries[d];
		rem -= d;
	}
	if chain == 0 {
		return 0;
	}
	read_chain(dev, chain)[rem]
}

/// Writes `phys` into the logical slot `pos` of `inode`. The slot (and every indirect-chain
/// block on the path to it) must already exist, i.e. `pos < inode.n_blocks` — callers grow
/// the block map first via [`grow`].
pub fn update(dev: &mut Device, inode: &mut Inode, pos: u64, phys: u64) -> FsResult<()> {
	let pos = pos as usize;
	if pos < DIRECT_COUNT {
		inode.blocks[pos] = phys;
		return Ok(());
	}
	let d = chain_capacity(dev.block_size());
	let mut rem = pos - DIRECT_COUNT;
	let mut chain = inode.blocks[DIRECT_COUNT];
	while rem >= d {
		if chain == 0 {
			return Err(Error::Internal);
		}
		let entries = read_chain(dev, chain);
		chain = entries[d];
		rem -= d;
	}
	if chain == 0 {
		return Err(Error::Internal);
	}
	let mut entries = read_chain(dev, chain);
	entries[rem] = phys;
	write_chain(dev, chain, &entries);
	Ok(())
}

/// One step of chain-block bookkeeping recorded during [`grow`], so a mid-way allocation
/// failure can be undone completely (§4.10, §7: grow is all-or-nothing).
enum Patch {
	/// `inode.blocks[DIRECT_COUNT]` was set to point at this new block.
	Head(u64),
	/// The link slot of chain block `parent` was set to point at this new block.
	Link { parent: u64, new_block: u64 },
}

/// Extends `inode`'s block map so that logical slots `inode.n_blocks..new_n` become valid
/// (mapped to physical slot `0`, i.e. "allocated but not yet written"), allocating indirect
/// chain blocks as needed. No-op if `new_n <= inode.n_blocks`.
///
/// On [`Error::NoSpace`], every chain block allocated during this call is freed again and
/// `inode.n_blocks` is left exactly as it was: `grow` either fully succeeds or has no
/// effect.
pub fn grow(dev: &mut Device, sb: &mut Superblock, inode: &mut Inode, new_n: u64) -> FsResult<()> {
	let start = inode.n_blocks;
	if new_n <= start {
		return Ok(());
	}
	let d = chain_capacity(dev.block_size());
	let mut patches: Vec<Patch> = Vec::new();
	let result = grow_inner(dev, sb, inode, start, new_n, d, &mut patches);
	if let Err(e) = result {
		for patch in patches.into_iter().rev() {
			let new_block = match patch {
				Patch::Head(new_block) => {
					inode.blocks[DIRECT_COUNT] = 0;
					new_block
				}
				Patch::Link { parent, new_block } => {
					let mut entries = read_chain(dev, parent);
					entries[d] = 0;
					write_chain(dev, parent, &entries);
					new_block
				}
			};
			BlockAllocator::free(dev, sb, new_block);
		}
		inode.n_blocks = start;
		return Err(e);
	}
	Ok(())
}

fn grow_inner(
	dev: &mut Device,
	sb: &mut Superblock,
	inode: &mut Inode,
	start: u64,
	new_n: u64,
	d: usize,
	patches: &mut Vec<Patch>,
) -> FsResult<()> {
	for i in start..new_n {
		let iu = i as usize;
		if iu < DIRECT_COUNT {
			// A direct slot entered by growing reads as unmapped until a real write
			// lands on it; this also guards against a stale pointer surviving a
			// shrink that (for whatever reason) failed to clear it.
			inode.blocks[iu] = 0;
		} else {
			let rem = iu - DIRECT_COUNT;
			let chain_idx = rem / d;
			ensure_chain_block(dev, sb, inode, chain_idx, d, patches)?;
			update(dev, inode, i, 0)?;
		}
		inode.n_blocks = i + 1;
	}
	Ok(())
}

/// Ensures the `chain_idx`-th chain block (0-based, following the link chain from
/// `inode.blocks[DIRECT_COUNT]`) exists, allocating it and every block before it that is
/// still missing.
fn ensure_chain_block(
	dev: &mut Device,
	sb: &mut Superblock,
	inode: &mut Inode,
	chain_idx: usize,
	d: usize,
	patches: &mut Vec<Patch>,
) -> FsResult<()> {
	if inode.blocks[DIRECT_COUNT] == 0 {
		let new_block = BlockAllocator::alloc(dev, sb)?;
		write_chain(dev, new_block, &vec![0u64; d + 1]);
		inode.blocks[DIRECT_COUNT] = new_block;
		patches.push(Patch::Head(new_block));
	}
	let mut chain = inode.blocks[DIRECT_COUNT];
	for _ in 0..chain_idx {
		let mut entries = read_chain(dev, chain);
		if entries[d] == 0 {
			let new_block = BlockAllocator::alloc(dev, sb)?;
			write_chain(dev, new_block, &vec![0u64; d + 1]);
			entries[d] = new_block;
			write_chain(dev, chain, &entries);
			patches.push(Patch::Link { parent: chain, new_block });
		}
		chain = entries[d];
	}
	Ok(())
}

/// Frees whichever indirect-chain blocks are no longer needed once the block map has
/// shrunk to `new_n` logical slots, and sets `inode.n_blocks = new_n`.
///
/// Callers must already have unreferenced (via [`crate::dedup_io`]) every data block that
/// lived in the slots being dropped; this function only ever touches chain-link
/// bookkeeping blocks, never data blocks.
pub fn shrink_tail(dev: &mut Device, sb: &mut Superblock, inode: &mut Inode, new_n: u64) {
	let d = chain_capacity(dev.block_size());
	if new_n <= DIRECT_COUNT as u64 {
		for slot in inode.blocks[new_n as usize..DIRECT_COUNT].iter_mut() {
			*slot = 0;
		}
		let mut chain = inode.blocks[DIRECT_COUNT];
		inode.blocks[DIRECT_COUNT] = 0;
		while chain != 0 {
			let entries = read_chain(dev, chain);
			let next = entries[d];
			BlockAllocator::free(dev, sb, chain);
			chain = next;
		}
	} else {
		let rem_new = new_n - DIRECT_COUNT as u64;
		let keep_blocks = rem_new.div_ceil(d as u64);
		let mut chain = inode.blocks[DIRECT_COUNT];
		let mut idx = 1u64;
		while chain != 0 && idx < keep_blocks {
			let entries = read_chain(dev, chain);
			chain = entries[d];
			idx += 1;
		}
		if chain != 0 {
			let mut entries = read_chain(dev, chain);
			let mut next = entries[d];
			// Entries past the last surviving logical slot in this block are now
			// unmapped; leaving their old values in place would let a later grow
			// back into this same block resolve to stale (or since-reallocated)
			// physical blocks instead of reading as zero.
			let used = (rem_new - (keep_blocks - 1) * d as u64) as usize;
			for slot in entries[used..d].iter_mut() {
				*slot = 0;
			}
			entries[d] = 0;
			write_chain(dev, chain, &entries);
			while next != 0 {
				let nentries = read_chain(dev, next);
				let after = nentries[d];
				BlockAllocator::free(dev, sb, next);
				next = after;
			}
		}
	}
	inode.n_blocks = new_n;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::inode::FileType;

	fn fresh(data_blocks: u64, block_size: usize) -> (Device, Superblock, Inode) {
		let mut dev = Device::new(1 + data_blocks, block_size);
		let mut sb = Superblock {
			block_size: block_size as u32,
			inode_off: 1,
			inode_count: 0,
			inode_used: 0,
			blockmgt_off: 1,
			data_off: 1,
			data_blocks,
			blocks_used: 0,
			freelist_head: 0,
			bst_root: 0,
			root_dir: 0,
		};
		BlockAllocator::format_freelist(&mut dev, &mut sb);
		let mut inode = Inode::unused();
		inode.file_type = FileType::RegularFile;
		(dev, sb, inode)
	}

	#[test]
	fn direct_slots_need_no_allocation() {
		let (mut dev, mut sb, mut inode) = fresh(4, 64);
		let used_before = sb.blocks_used;
		grow(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64).unwrap();
		assert_eq!(sb.blocks_used, used_before);
		assert_eq!(inode.n_blocks, DIRECT_COUNT as u64);
	}

	#[test]
	fn crossing_direct_boundary_allocates_one_chain_block() {
		let (mut dev, mut sb, mut inode) = fresh(32, 64);
		grow(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64).unwrap();
		let used_before = sb.blocks_used;
		grow(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64 + 1).unwrap();
		assert_eq!(sb.blocks_used, used_before + 1);
		assert_ne!(inode.blocks[DIRECT_COUNT], 0);
	}

	#[test]
	fn resolve_update_round_trip_across_indirect() {
		let (mut dev, mut sb, mut inode) = fresh(32, 64);
		let pos = DIRECT_COUNT as u64 + 3;
		grow(&mut dev, &mut sb, &mut inode, pos + 1).unwrap();
		update(&mut dev, &mut inode, pos, 99).unwrap();
		assert_eq!(resolve(&dev, &inode, pos), 99);
	}

	#[test]
	fn grow_failure_rolls_back_fully() {
		// Only 1 data block: the direct slots consume none, so the sole chain-block
		// allocation required to cross the boundary exhausts the device.
		let (mut dev, mut sb, mut inode) = fresh(1, 64);
		grow(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64).unwrap();
		let n_before = inode.n_blocks;
		let used_before = sb.blocks_used;
		let err = grow(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64 + 20);
		assert_eq!(err, Err(Error::NoSpace));
		assert_eq!(inode.n_blocks, n_before);
		assert_eq!(sb.blocks_used, used_before);
		assert_eq!(inode.blocks[DIRECT_COUNT], 0);
	}

	#[test]
	fn shrink_below_direct_frees_whole_chain() {
		let (mut dev, mut sb, mut inode) = fresh(32, 64);
		grow(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64 + 5).unwrap();
		assert_ne!(inode.blocks[DIRECT_COUNT], 0);
		let used_with_chain = sb.blocks_used;
		shrink_tail(&mut dev, &mut sb, &mut inode, 2);
		assert_eq!(inode.blocks[DIRECT_COUNT], 0);
		assert!(sb.blocks_used < used_with_chain);
		assert_eq!(inode.n_blocks, 2);
	}

	#[test]
	fn shrink_tail_clears_dropped_direct_slots_immediately() {
		let (mut dev, mut sb, mut inode) = fresh(8, 64);
		grow(&mut dev, &mut sb, &mut inode, 5).unwrap();
		update(&mut dev, &mut inode, 3, 77).unwrap();
		shrink_tail(&mut dev, &mut sb, &mut inode, 2);
		assert_eq!(inode.blocks[3], 0, "shrink must clear pointers in dropped direct slots");
	}

	#[test]
	fn shrink_tail_clears_dropped_tail_of_kept_chain_block() {
		let (mut dev, mut sb, mut inode) = fresh(32, 64);
		let far = DIRECT_COUNT as u64 + 3;
		grow(&mut dev, &mut sb, &mut inode, far + 1).unwrap();
		update(&mut dev, &mut inode, far, 77).unwrap();
		shrink_tail(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64 + 1);
		assert_eq!(resolve(&dev, &inode, far), 0, "shrink must clear dropped entries within a kept chain block");
	}

	#[test]
	fn shrinking_a_direct_slot_then_regrowing_resolves_as_zero() {
		let (mut dev, mut sb, mut inode) = fresh(8, 64);
		grow(&mut dev, &mut sb, &mut inode, 5).unwrap();
		update(&mut dev, &mut inode, 3, 77).unwrap();
		shrink_tail(&mut dev, &mut sb, &mut inode, 2);
		grow(&mut dev, &mut sb, &mut inode, 5).unwrap();
		assert_eq!(resolve(&dev, &inode, 3), 0, "regrown direct slot must not resurrect the old pointer");
	}

	#[test]
	fn shrinking_within_an_indirect_chain_block_then_regrowing_resolves_as_zero() {
		let (mut dev, mut sb, mut inode) = fresh(32, 64);
		let far = DIRECT_COUNT as u64 + 3;
		grow(&mut dev, &mut sb, &mut inode, far + 1).unwrap();
		update(&mut dev, &mut inode, far, 77).unwrap();
		shrink_tail(&mut dev, &mut sb, &mut inode, DIRECT_COUNT as u64 + 1);
		grow(&mut dev, &mut sb, &mut inode, far + 1).unwrap();
		assert_eq!(resolve(&dev, &inode, far), 0, "regrown indirect slot must not resurrect the old pointer");
	}
}
