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

//! `dedupfs-mount`: parses mount options and hands a freshly formatted [`FsCore`] to `fuser`
//! (§6.7).

use clap::Parser;
use dedupfs::fuse_host::DedupFsHost;
use dedupfs::FsCore;

/// Mount an in-memory, content-addressed deduplicating filesystem at MOUNTPOINT.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
	/// Directory to mount the filesystem at.
	mountpoint: String,

	/// Total size of the backing store, in blocks.
	#[arg(long, default_value_t = 65536)]
	blocks: u64,

	/// Block size in bytes. Must be a multiple of 8.
	#[arg(long, default_value_t = 4096)]
	block_size: usize,

	/// Number of inodes to format the device with.
	#[arg(long, default_value_t = 16384)]
	inodes: u64,

	/// Run in the foreground instead of daemonizing.
	#[arg(long, default_value_t = false)]
	foreground: bool,
}

fn main() {
	env_logger::init();
	let args = Args::parse();

	log::info!(
		"formatting dedupfs: {} blocks x {}B, {} inodes",
		args.blocks, args.block_size, args.inodes
	);
	let core = FsCore::format(args.blocks, args.block_size, args.inodes);
	let host = DedupFsHost::new(core);

	let mut options = vec![fuser::MountOption::FSName("dedupfs".to_string())];
	if !args.foreground {
		options.push(fuser::MountOption::AutoUnmount);
	}

	log::info!("mounting at {}", args.mountpoint);
	if let Err(e) = fuser::mount2(host, &args.mountpoint, &options) {
		log::error!("mount failed: {e}");
		std::process::exit(1);
	}
}
