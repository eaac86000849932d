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

//! A directory's content is a packed array of child inode numbers, stored through the same
//! block-map/dedup machinery as file data (§4.7) — two directories with identical contents
//! transparently share physical storage, same as two files would.

use crate::block_index::BlockMgtTable;
use crate::dedup_io;
use crate::device::Device;
use crate::error::{Error, FsResult};
use crate::inode::InodeTable;
use crate::superblock::Superblock;

fn entries_per_block(block_size: usize) -> u64 {
	(block_size / 8) as u64
}

/// Reads logical block `blk` of `dir_nr`'s content, returning it as `u64` child numbers.
fn read_block_entries(dev: &Device, itable: &InodeTable, dir_nr: u64, blk: u64) -> FsResult<Vec<u64>> {
	let dir = itable.read(dev, dir_nr)?;
	let mut buf = vec![0u8; dev.block_size()];
	dedup_io::read(dev, &dir, blk, &mut buf);
	Ok(buf.chunks_exact(8).map(|c| u64::from_ne_bytes(c.try_into().unwrap())).collect())
}

/// Appends `child_nr` as a new entry of directory `dir_nr`.
pub fn add_child(
	dev: &mut Device,
	sb: &mut Superblock,
	mgt: &BlockMgtTable,
	itable: &InodeTable,
	dir_nr: u64,
	child_nr: u64,
) -> FsResult<()> {
	let mut dir = itable.read(dev, dir_nr)?;
	let per_block = entries_per_block(dev.block_size());
	let i = dir.size;
	let new_n = ((i + 1) * 8).div_ceil(dev.block_size() as u64);
	dedup_io::resize(dev, sb, mgt, &mut dir, new_n)?;
	let blk = i / per_block;
	let slot = (i % per_block) as usize;
	let mut buf = vec![0u8; dev.block_size()];
	dedup_io::read(dev, &dir, blk, &mut buf);
	buf[slot * 8..slot * 8 + 8].copy_from_slice(&child_nr.to_ne_bytes());
	dedup_io::write(dev, sb, mgt, &mut dir, blk, &buf)?;
	dir.size = i + 1;
	itable.write(dev, dir_nr, &dir);
	log::trace!("directory {dir_nr}: added child {child_nr} at entry {i}");
	Ok(())
}

/// Returns the `i`-th child inode number of directory `dir_nr`.
pub fn get_child(dev: &Device, itable: &InodeTable, dir_nr: u64, i: u64) -> FsResult<u64> {
	let per_block = entries_per_block(dev.block_size());
	let entries = read_block_entries(dev, itable, dir_nr, i / per_block)?;
	Ok(entries[(i % per_block) as usize])
}

/// Iterates the child inode numbers of directory `dir_nr`, in insertion order.
pub fn children(dev: &Device, itable: &InodeTable, dir_nr: u64) -> FsResult<Vec<u64>> {
	let dir = itable.read(dev, dir_nr)?;
	let mut out = Vec::with_capacity(dir.size as usize);
	for i in 0..dir.size {
		out.push(get_child(dev, itable, dir_nr, i)?);
	}
	Ok(out)
}

/// Removes the first entry matching `child_nr`, shifting subsequent entries down by one.
pub fn remove_child(
	dev: &mut Device,
	sb: &mut Superblock,
	mgt: &BlockMgtTable,
	itable: &InodeTable,
	dir_nr: u64,
	child_nr: u64,
) -> FsResult<()> {
	let mut dir = itable.read(dev, dir_nr)?;
	let mut remaining = Vec::with_capacity(dir.size as usize);
	let mut found = false;
	for i in 0..dir.size {
		let c = get_child(dev, itable, dir_nr, i)?;
		if !found && c == child_nr {
			found = true;
			continue;
		}
		remaining.push(c);
	}
	if !found {
		return Err(Error::Internal);
	}
	let per_block = entries_per_block(dev.block_size());
	let new_n = (remaining.len() as u64 * 8).div_ceil(dev.block_size() as u64);
	// Rewrite every block that still holds surviving entries before shrinking the map, so
	// the block-map/dedup path never observes a logical slot whose content is stale.
	for (blk_idx, chunk) in remaining.chunks(per_block as usize).enumerate() {
		let mut buf = vec![0u8; dev.block_size()];
		for (slot, child) in chunk.iter().enumerate() {
			buf[slot * 8..slot * 8 + 8].copy_from_slice(&child.to_ne_bytes());
		}
		dedup_io::write(dev, sb, mgt, &mut dir, blk_idx as u64, &buf)?;
	}
	dedup_io::resize(dev, sb, mgt, &mut dir, new_n)?;
	dir.size = remaining.len() as u64;
	itable.write(dev, dir_nr, &dir);
	log::trace!("directory {dir_nr}: removed child {child_nr}, {} entries remain", dir.size);
	Ok(())
}
