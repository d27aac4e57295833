use crate::block::{Block, BlockNo};

pub mod file;
pub mod mem;

/// An implementation of `Storage` allows reading and writing blocks, as well
/// as determining the block capacity.
///
/// Writes are assumed durable by the time they return. No ordering is
/// guaranteed between distinct writes and none is relied upon.
pub trait Storage {
    /// Reads the block at `blockno` into `block`.
    fn read_at(&self, block: &mut Block, blockno: BlockNo) -> Result<()>;

    /// Writes `block` into the block at `blockno`.
    fn write_at(&mut self, block: &Block, blockno: BlockNo) -> Result<()>;

    /// Returns the number of blocks the storage can hold.
    fn capacity(&self) -> Result<u32>;
}

pub type Result<T> = core::result::Result<T, libc::c_int>;
