use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::U32,
};

use crate::{
    block::BlockNo,
    fs::{bitmap::BITS_PER_BLOCK, inode::INODE_PER_BLOCK},
};

/// Filesystem's magic value.
pub const MAGIC: u32 = u32::from_le_bytes(*b"OXFS");

/// Superblock's address.
pub const SUPER_BLOCKNO: BlockNo = 0;

/// Geometry descriptor stored in block 0. All region offsets are absolute
/// block numbers; the regions are contiguous in the order inode bitmap,
/// data bitmap, inode table, data.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Superblock {
    pub magic: U32,
    pub inode_num_tot: U32,
    pub inode_num_free: U32,
    pub inode_bitmap_offset: U32,
    pub inode_block_offset: U32,
    pub data_block_num_tot: U32,
    pub data_block_num_free: U32,
    pub data_block_bitmap_offset: U32,
    pub data_block_offset: U32,
}

impl Superblock {
    /// Computes the layout for a device of `block_count` blocks.
    ///
    /// # Panics
    /// Panics if the device is too small to hold one block of each region.
    pub fn new(block_count: u32) -> Self {
        assert!(
            block_count > INODE_PER_BLOCK,
            "device too small: {block_count} blocks"
        );

        let avail = block_count - 1;
        let inode_blocks = avail / INODE_PER_BLOCK;
        let inode_num_tot = inode_blocks * INODE_PER_BLOCK;
        let inode_bitmap_blocks = inode_num_tot.div_ceil(BITS_PER_BLOCK);

        let inode_bitmap_offset = 1;
        let data_block_bitmap_offset = inode_bitmap_offset + inode_bitmap_blocks;

        let remaining = avail - inode_blocks - inode_bitmap_blocks;
        let data_bitmap_blocks = remaining.div_ceil(BITS_PER_BLOCK);
        let data_block_num_tot = remaining - data_bitmap_blocks;

        let inode_block_offset = data_block_bitmap_offset + data_bitmap_blocks;
        let data_block_offset = inode_block_offset + inode_blocks;

        Self {
            magic: U32::new(MAGIC),
            inode_num_tot: U32::new(inode_num_tot),
            inode_num_free: U32::new(inode_num_tot),
            inode_bitmap_offset: U32::new(inode_bitmap_offset),
            inode_block_offset: U32::new(inode_block_offset),
            data_block_num_tot: U32::new(data_block_num_tot),
            data_block_num_free: U32::new(data_block_num_tot),
            data_block_bitmap_offset: U32::new(data_block_bitmap_offset),
            data_block_offset: U32::new(data_block_offset),
        }
    }
}
