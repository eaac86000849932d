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

//! Path parsing, entry lookup, create-on-demand and recursive removal (§4.8), built on top
//! of [`crate::inode::InodeTable`] and [`crate::directory`].

use crate::block_index::BlockMgtTable;
use crate::dedup_io;
use crate::device::Device;
use crate::directory;
use crate::error::{Error, FsResult};
use crate::inode::{FileType, Inode, InodeTable, NAME_MAX};
use crate::superblock::Superblock;

/// Splits a path into its non-empty components. Leading slashes are consumed; an empty
/// path (or one consisting only of slashes) yields no components, meaning "the root".
/// Any other empty component (`"a//b"`) is rejected.
fn split_path(path: &str) -> FsResult<Vec<&[u8]>> {
	let trimmed = path.trim_start_matches('/');
	if trimmed.is_empty() {
		return Ok(Vec::new());
	}
	let mut comps = Vec::new();
	for part in trimmed.split('/') {
		if part.is_empty() {
			return Err(Error::NotFound);
		}
		comps.push(part.as_bytes());
	}
	Ok(comps)
}

/// Scans directory `dir_nr` for a child named `name`, failing [`Error::NotADirectory`] if
/// `dir_nr` does not in fact name a directory.
fn find_child(dev: &Device, itable: &InodeTable, dir_nr: u64, name: &[u8]) -> FsResult<Option<u64>> {
	let dir = itable.read(dev, dir_nr)?;
	if !dir.is_dir() {
		return Err(Error::NotADirectory);
	}
	for child_nr in directory::children(dev, itable, dir_nr)? {
		let child = itable.read(dev, child_nr)?;
		if &*child.name == name {
			return Ok(Some(child_nr));
		}
	}
	Ok(None)
}

/// Resolves `comps` to an inode number starting from `root`, treating every component
/// (including the last) as a directory to descend into. Used to locate the parent of a
/// removal target; never creates anything.
fn resolve_dir_path(dev: &Device, itable: &InodeTable, root: u64, comps: &[&[u8]]) -> FsResult<u64> {
	let mut cur = root;
	for &comp in comps {
		if comp.len() > NAME_MAX {
			return Err(Error::NameTooLong);
		}
		cur = find_child(dev, itable, cur, comp)?.ok_or(Error::NotFound)?;
		if !itable.read(dev, cur)?.is_dir() {
			return Err(Error::NotADirectory);
		}
	}
	Ok(cur)
}

/// Resolves `path` to an inode number.
///
/// If the last component is missing and `create` is true, a fresh `Unused`-typed inode is
/// allocated, named, and attached to its parent directory — the caller (`create`/`mkdir`)
/// is responsible for setting its type, mode and timestamps immediately afterward. Missing
/// *intermediate* components are never auto-created, regardless of `create`.
pub fn resolve(
	dev: &mut Device,
	sb: &mut Superblock,
	mgt: &BlockMgtTable,
	itable: &InodeTable,
	path: &str,
	create: bool,
) -> FsResult<u64> {
	let comps = split_path(path)?;
	let mut cur = sb.root_dir;
	let last_idx = comps.len().wrapping_sub(1);
	for (idx, &comp) in comps.iter().enumerate() {
		if comp.len() > NAME_MAX {
			return Err(Error::NameTooLong);
		}
		let is_last = idx == last_idx;
		match find_child(dev, itable, cur, comp)? {
			Some(child_nr) => {
				if is_last {
					cur = child_nr;
				} else {
					if !itable.read(dev, child_nr)?.is_dir() {
						return Err(Error::NotADirectory);
					}
					cur = child_nr;
				}
			}
			None => {
				if !is_last || !create {
					return Err(Error::NotFound);
				}
				let new_nr = itable.find_free(dev)?;
				let mut new_inode = Inode::unused();
				new_inode.name = Box::from(comp);
				itable.write(dev, new_nr, &new_inode);
				directory::add_child(dev, sb, mgt, itable, cur, new_nr)?;
				sb.inode_used += 1;
				log::debug!("path: created inode {new_nr} for new entry in directory {cur}");
				cur = new_nr;
			}
		}
	}
	Ok(cur)
}

/// Resolves `path` to an existing inode without creating anything (`getattr`, `open`, etc).
pub fn lookup(dev: &Device, sb: &Superblock, itable: &InodeTable, path: &str) -> FsResult<u64> {
	let comps = split_path(path)?;
	resolve_dir_path(dev, itable, sb.root_dir, &comps[..comps.len().saturating_sub(1)])
		.and_then(|parent| {
			if let Some(&name) = comps.last() {
				find_child(dev, itable, parent, name)?.ok_or(Error::NotFound)
			} else {
				Ok(sb.root_dir)
			}
		})
}

/// Removes the file or empty directory at `path`.
///
/// Fails [`Error::NotEmpty`] if the target is a non-empty directory. The root itself can
/// never be removed (there is no parent to detach it from).
pub fn remove(
	dev: &mut Device,
	sb: &mut Superblock,
	mgt: &BlockMgtTable,
	itable: &InodeTable,
	path: &str,
) -> FsResult<()> {
	let comps = split_path(path)?;
	if comps.is_empty() {
		return Err(Error::NotFound);
	}
	let name = comps[comps.len() - 1];
	if name.len() > NAME_MAX {
		return Err(Error::NameTooLong);
	}
	let parent_nr = resolve_dir_path(dev, itable, sb.root_dir, &comps[..comps.len() - 1])?;
	let child_nr = find_child(dev, itable, parent_nr, name)?.ok_or(Error::NotFound)?;
	let mut child = itable.read(dev, child_nr)?;
	if child.is_dir() && child.size > 0 {
		return Err(Error::NotEmpty);
	}
	dedup_io::resize(dev, sb, mgt, &mut child, 0)?;
	child.file_type = FileType::Unused;
	child.name = Box::from([]);
	itable.write(dev, child_nr, &child);
	directory::remove_child(dev, sb, mgt, itable, parent_nr, child_nr)?;
	sb.inode_used = sb.inode_used.saturating_sub(1);
	log::debug!("path: removed inode {child_nr} ({path})");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::block_alloc::BlockAllocator;

	fn fresh(block_size: usize) -> (Device, Superblock, BlockMgtTable, InodeTable) {
		let data_blocks = 64u64;
		let inode_count = 16u64;
		let blockmgt_blocks = BlockMgtTable::region_blocks(data_blocks, block_size);
		let inode_blocks = InodeTable::region_blocks(inode_count, block_size);
		let mut dev = Device::new(1 + inode_blocks + blockmgt_blocks + data_blocks, block_size);
		let mut sb = Superblock {
			block_size: block_size as u32,
			inode_off: 1,
			inode_count,
			inode_used: 1,
			blockmgt_off: 1 + inode_blocks,
			data_off: 1 + inode_blocks + blockmgt_blocks,
			data_blocks,
			blocks_used: 0,
			freelist_head: 0,
			bst_root: 0,
			root_dir: 0,
		};
		BlockAllocator::format_freelist(&mut dev, &mut sb);
		let mgt = BlockMgtTable::new(sb.blockmgt_off, sb.data_off, data_blocks, block_size);
		let itable = InodeTable::new(sb.inode_off, inode_count, block_size);
		let mut root = Inode::unused();
		root.file_type = FileType::Directory;
		itable.write(&mut dev, 0, &root);
		(dev, sb, mgt, itable)
	}

	#[test]
	fn resolve_root_is_inode_zero() {
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		assert_eq!(resolve(&mut dev, &mut sb, &mgt, &itable, "/", false).unwrap(), 0);
		assert_eq!(resolve(&mut dev, &mut sb, &mgt, &itable, "", false).unwrap(), 0);
	}

	#[test]
	fn create_then_resolve_without_create() {
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		let nr = resolve(&mut dev, &mut sb, &mgt, &itable, "/a", true).unwrap();
		assert_eq!(resolve(&mut dev, &mut sb, &mgt, &itable, "/a", false).unwrap(), nr);
	}

	#[test]
	fn create_twice_is_not_exists_detection() {
		// resolve(create=true) itself does not reject an existing last component with
		// Exists; that check belongs to the higher-level `create`/`mkdir` operation
		// (§6.1), which calls `lookup` first. Here we only check resolve is idempotent
		// in the sense of returning the same inode both times.
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		let nr1 = resolve(&mut dev, &mut sb, &mgt, &itable, "/a", true).unwrap();
		let nr2 = resolve(&mut dev, &mut sb, &mgt, &itable, "/a", false).unwrap();
		assert_eq!(nr1, nr2);
	}

	#[test]
	fn missing_parent_is_not_found_even_with_create() {
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		assert_eq!(
			resolve(&mut dev, &mut sb, &mgt, &itable, "/sub/x", true),
			Err(Error::NotFound)
		);
	}

	#[test]
	fn non_directory_intermediate_component_fails() {
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		let file_nr = resolve(&mut dev, &mut sb, &mgt, &itable, "/f", true).unwrap();
		let mut f = itable.read(&dev, file_nr).unwrap();
		f.file_type = FileType::RegularFile;
		itable.write(&mut dev, file_nr, &f);
		assert_eq!(
			resolve(&mut dev, &mut sb, &mgt, &itable, "/f/x", false),
			Err(Error::NotADirectory)
		);
	}

	#[test]
	fn remove_nonempty_directory_fails() {
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		let dir_nr = resolve(&mut dev, &mut sb, &mgt, &itable, "/d", true).unwrap();
		let mut d = itable.read(&dev, dir_nr).unwrap();
		d.file_type = FileType::Directory;
		itable.write(&mut dev, dir_nr, &d);
		resolve(&mut dev, &mut sb, &mgt, &itable, "/d/x", true).unwrap();
		assert_eq!(remove(&mut dev, &mut sb, &mgt, &itable, "/d"), Err(Error::NotEmpty));
		remove(&mut dev, &mut sb, &mgt, &itable, "/d/x").unwrap();
		remove(&mut dev, &mut sb, &mgt, &itable, "/d").unwrap();
	}

	#[test]
	fn double_slash_component_is_rejected() {
		let (mut dev, mut sb, mgt, itable) = fresh(64);
		assert_eq!(
			resolve(&mut dev, &mut sb, &mgt, &itable, "/a//b", false),
			Err(Error::NotFound)
		);
	}
}
