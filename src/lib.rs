//! A small on-disk filesystem layered over a fixed-size block device.
//!
//! The on-disk layout is four contiguous regions behind a superblock:
//! an inode bitmap, a data bitmap, the inode table and the data region.
//! Files map logical blocks to physical blocks through a direct pointer,
//! a single-indirect pointer block and a double-indirect pointer block.
//! Directories are ordinary files holding fixed 32-byte entries.
//!
//! [`fs::Filesystem`] is generic over [`block::storage::Storage`], so the
//! same engine runs against a regular file, a memory region, or anything
//! else that can read and write 4 KiB blocks by number. `src/fuse.rs`
//! exposes the whole thing to the kernel through `fuser`.

pub mod block;
pub mod fs;
pub mod fuse;
