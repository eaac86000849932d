//! End-to-end scenario and property tests driving `FsCore` directly (§6.8, §8). FUSE itself
//! needs a real `/dev/fuse` and is not exercised here.

use dedupfs::error::Error;
use dedupfs::inode::DIRECT_COUNT;
use dedupfs::FsCore;

fn small_fs() -> FsCore {
	FsCore::format(300, 4096, 64)
}

/// A device with many more free inodes than data blocks, so exhausting the data region with
/// single-block files hits `NoSpace` well before `NoInode` would.
fn block_scarce_fs() -> FsCore {
	FsCore::format(30, 4096, 64)
}

#[test]
fn scenario_5_exhaustion_then_existing_reads_still_work() {
	let mut fs = block_scarce_fs();
	fs.create("/keep", 0o644).unwrap();
	fs.write("/keep", 0, b"stays").unwrap();

	// Exhaust the data region with distinct-content writes so none dedup.
	let mut n = 0;
	loop {
		let path = format!("/f{n}");
		fs.create(&path, 0o644).unwrap();
		let data = vec![(n % 256) as u8; 1];
		match fs.write(&path, 0, &data) {
			Ok(_) => n += 1,
			Err(Error::NoSpace) => break,
			Err(e) => panic!("unexpected error: {e:?}"),
		}
		if n > 100_000 {
			panic!("device never reported NoSpace");
		}
	}

	assert_eq!(fs.read("/keep", 0, 16).unwrap(), b"stays");
}

#[test]
fn scenario_6_missing_parent_and_duplicate_create() {
	let mut fs = small_fs();
	fs.create("/a", 0o644).unwrap();
	assert_eq!(fs.create("/a", 0o644), Err(Error::Exists));
	assert_eq!(fs.create("/sub/x", 0o644), Err(Error::NotFound));
}

#[test]
fn b1_boundary_exactly_direct_slots_uses_no_indirect_block() {
	let mut fs = small_fs();
	fs.create("/f", 0o644).unwrap();
	let bs = fs.block_size() as u64;
	let data = vec![9u8; (DIRECT_COUNT as u64 * bs) as usize];
	fs.write("/f", 0, &data).unwrap();
	let used_direct = fs.statfs().total_blocks - fs.statfs().free_blocks;
	fs.write("/f", DIRECT_COUNT as u64 * bs, &[1]).unwrap();
	let used_after = fs.statfs().total_blocks - fs.statfs().free_blocks;
	// Crossing the boundary costs exactly one data block plus one chain block.
	assert_eq!(used_after, used_direct + 2);
}

#[test]
fn b2_read_past_eof_and_straddling_eof() {
	let mut fs = small_fs();
	fs.create("/f", 0o644).unwrap();
	fs.write("/f", 0, b"0123456789").unwrap();
	assert_eq!(fs.read("/f", 10, 5).unwrap(), Vec::<u8>::new());
	assert_eq!(fs.read("/f", 8, 5).unwrap(), b"89");
}

#[test]
fn b3_truncate_grow_then_read_is_zero_filled() {
	let mut fs = small_fs();
	fs.create("/f", 0o644).unwrap();
	fs.write("/f", 0, b"ab").unwrap();
	fs.truncate("/f", 6).unwrap();
	assert_eq!(fs.read("/f", 0, 6).unwrap(), vec![b'a', b'b', 0, 0, 0, 0]);
}

#[test]
fn b3_truncate_down_then_up_does_not_resurrect_stale_blocks() {
	let mut fs = small_fs();
	let bs = fs.block_size() as u64;
	fs.create("/f", 0o644).unwrap();
	fs.write("/f", 0, &vec![9u8; (3 * bs) as usize]).unwrap();
	fs.truncate("/f", bs).unwrap();
	fs.truncate("/f", 3 * bs).unwrap();
	let out = fs.read("/f", bs, bs as u32).unwrap();
	assert_eq!(out, vec![0u8; bs as usize], "regrown slot must read as zero, not the freed block's old content");
	let out2 = fs.read("/f", 2 * bs, bs as u32).unwrap();
	assert_eq!(out2, vec![0u8; bs as usize]);
}

#[test]
fn b4_mkdir_under_non_directory_fails() {
	let mut fs = small_fs();
	fs.create("/f", 0o644).unwrap();
	assert_eq!(fs.mkdir("/f/x", 0o755), Err(Error::NotADirectory));
}

#[test]
fn r1_round_trip_arbitrary_offset() {
	let mut fs = small_fs();
	fs.create("/f", 0o644).unwrap();
	let data = b"the quick brown fox";
	fs.write("/f", 100, data).unwrap();
	assert_eq!(fs.read("/f", 100, data.len() as u32).unwrap(), data);
}

#[test]
fn r2_identical_content_two_files_one_physical_block() {
	let mut fs = small_fs();
	fs.create("/a", 0o644).unwrap();
	fs.create("/b", 0o644).unwrap();
	let data = vec![42u8; 512];
	fs.write("/a", 0, &data).unwrap();
	let used_after_a = fs.statfs().total_blocks - fs.statfs().free_blocks;
	fs.write("/b", 0, &data).unwrap();
	let used_after_b = fs.statfs().total_blocks - fs.statfs().free_blocks;
	assert_eq!(used_after_a, used_after_b);
}

#[test]
fn r3_rewrite_same_content_is_a_no_op() {
	let mut fs = small_fs();
	fs.create("/a", 0o644).unwrap();
	let data = vec![7u8; 512];
	fs.write("/a", 0, &data).unwrap();
	let used_before = fs.statfs().total_blocks - fs.statfs().free_blocks;
	fs.write("/a", 0, &data).unwrap();
	let used_after = fs.statfs().total_blocks - fs.statfs().free_blocks;
	assert_eq!(used_before, used_after);
}

#[test]
fn r4_n_identical_files_then_delete_all_but_one() {
	let mut fs = small_fs();
	let data = vec![3u8; 512];
	for name in ["/a", "/b", "/c"] {
		fs.create(name, 0o644).unwrap();
		fs.write(name, 0, &data).unwrap();
	}
	let used_shared = fs.statfs().total_blocks - fs.statfs().free_blocks;
	fs.unlink("/a").unwrap();
	fs.unlink("/b").unwrap();
	assert_eq!(fs.statfs().total_blocks - fs.statfs().free_blocks, used_shared, "still referenced by c");
	fs.unlink("/c").unwrap();
	assert_eq!(fs.statfs().total_blocks - fs.statfs().free_blocks, used_shared - 1);
}

#[test]
fn p5_inode_used_tracks_non_unused_inodes() {
	let mut fs = small_fs();
	let before = fs.statfs().total_inodes - fs.statfs().free_inodes;
	fs.mkdir("/d", 0o755).unwrap();
	fs.create("/d/x", 0o644).unwrap();
	let after = fs.statfs().total_inodes - fs.statfs().free_inodes;
	assert_eq!(after, before + 2);
	fs.unlink("/d/x").unwrap();
	fs.rmdir("/d").unwrap();
	assert_eq!(fs.statfs().total_inodes - fs.statfs().free_inodes, before);
}

#[test]
fn deep_nested_directories_round_trip() {
	let mut fs = small_fs();
	fs.mkdir("/a", 0o755).unwrap();
	fs.mkdir("/a/b", 0o755).unwrap();
	fs.mkdir("/a/b/c", 0o755).unwrap();
	fs.create("/a/b/c/leaf", 0o644).unwrap();
	fs.write("/a/b/c/leaf", 0, b"deep").unwrap();
	assert_eq!(fs.read("/a/b/c/leaf", 0, 4).unwrap(), b"deep");
	assert_eq!(fs.rmdir("/a/b/c"), Err(Error::NotEmpty));
}
