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

//! The backing store: a single contiguous byte region standing in for a block device.
//!
//! Persistence, journaling and crash recovery are explicitly not goals (see SPEC_FULL.md §1);
//! the region lives entirely in process memory and is dropped at unmount.

/// The block size this crate ships with by default. Callers may format a [`Device`] with any
/// other power-of-two block size; nothing in the CORE hardcodes 4096.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Raw block-addressed storage.
///
/// `phys = 0` is reserved for the superblock; [`Device`] itself does not enforce that (it has
/// no notion of regions), callers above it do.
pub struct Device {
	block_size: usize,
	blocks: u64,
	bytes: Vec<u8>,
}

impl Device {
	/// Allocates a zeroed backing region of `blocks` blocks of `block_size` bytes each.
	pub fn new(blocks: u64, block_size: usize) -> Self {
		assert!(block_size > 0 && block_size % 8 == 0, "block size must be a multiple of 8");
		let len = blocks as usize * block_size;
		Self {
			block_size,
			blocks,
			bytes: vec![0u8; len],
		}
	}

	/// The block size this device was formatted with.
	pub fn block_size(&self) -> usize {
		self.block_size
	}

	/// The total number of blocks in the device.
	pub fn block_count(&self) -> u64 {
		self.blocks
	}

	fn offset(&self, phys: u64) -> usize {
		assert!(phys < self.blocks, "physical block {phys} out of range ({} blocks)", self.blocks);
		phys as usize * self.block_size
	}

	/// Reads the full contents of physical block `phys`.
	pub fn read_block(&self, phys: u64) -> &[u8] {
		let off = self.offset(phys);
		&self.bytes[off..off + self.block_size]
	}

	/// Overwrites the full contents of physical block `phys`.
	///
	/// `data` must be exactly `block_size` bytes.
	pub fn write_block(&mut self, phys: u64, data: &[u8]) {
		assert_eq!(data.len(), self.block_size, "write_block requires a full block");
		let off = self.offset(phys);
		self.bytes[off..off + self.block_size].copy_from_slice(data);
	}

	/// Zeroes physical block `phys` in place.
	pub fn zero_block(&mut self, phys: u64) {
		let off = self.offset(phys);
		let bs = self.block_size;
		self.bytes[off..off + bs].fill(0);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() {
		let mut dev = Device::new(4, 64);
		let mut buf = vec![0u8; 64];
		buf[0] = 0xab;
		dev.write_block(2, &buf);
		assert_eq!(dev.read_block(2)[0], 0xab);
		assert_eq!(dev.read_block(1)[0], 0);
	}

	#[test]
	#[should_panic]
	fn out_of_range_panics() {
		let dev = Device::new(2, 64);
		let _ = dev.read_block(2);
	}
}
