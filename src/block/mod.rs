pub mod storage;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// A physical block number on the device.
pub type BlockNo = u32;

/// Block size in bytes.
pub const BLOCK_SIZE: u32 = 4096;

/// Fixed-sized byte sequence, the unit of device I/O.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, Unaligned, KnownLayout)]
pub struct Block {
    pub data: [u8; BLOCK_SIZE as usize],
}

impl Block {
    /// Constructs a `Block` with given data, zero-padded to `BLOCK_SIZE`.
    ///
    /// # Panics
    /// Panics if `data` is larger than `BLOCK_SIZE`.
    pub fn new(data: &[u8]) -> Self {
        let mut block = Self::default();
        block.data[..data.len()].copy_from_slice(data);
        block
    }
}

impl Default for Block {
    fn default() -> Self {
        Self {
            data: [0u8; BLOCK_SIZE as usize],
        }
    }
}
