use bitvec::prelude::*;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    block::{BLOCK_SIZE, BlockNo, storage::Storage},
    fs::{error::Result, guard::BlockGuard},
};

/// Bits held by one bitmap block.
pub const BITS_PER_BLOCK: u32 = BLOCK_SIZE * 8;

/// One block of allocation bits. The LSB of byte 0 is the lowest position.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BitmapBlock {
    bytes: [u8; BLOCK_SIZE as usize],
}

impl BitmapBlock {
    fn bits(&self) -> &BitSlice<u8, Lsb0> {
        self.bytes.view_bits()
    }

    fn bits_mut(&mut self) -> &mut BitSlice<u8, Lsb0> {
        self.bytes.view_bits_mut()
    }

    fn get(&self, offset: u32) -> bool {
        self.bits()[offset as usize]
    }

    fn set(&mut self, offset: u32, value: bool) {
        self.bits_mut().set(offset as usize, value);
    }

    fn first_zero(&self) -> Option<u32> {
        self.bits().iter_zeros().next().map(|off| off as u32)
    }

    /// Marks every bit from `offset` upward as allocated. Used at format
    /// time to mask the slack tail of a region's final block.
    pub(super) fn fill_from(&mut self, offset: u32) {
        self.bits_mut()[offset as usize..].fill(true);
    }
}

/// A view of the blocks `[start, end)` as one contiguous bit array, with
/// `1` meaning allocated.
pub struct Bitmap {
    start: BlockNo,
    end: BlockNo,
}

impl Bitmap {
    pub fn new(start: BlockNo, end: BlockNo) -> Self {
        debug_assert!(start < end);
        Self { start, end }
    }

    fn unpack(&self, pos: u32) -> (BlockNo, u32) {
        let blockno = self.start + pos / BITS_PER_BLOCK;
        debug_assert!(blockno < self.end, "bit {pos} out of bitmap range");
        (blockno, pos % BITS_PER_BLOCK)
    }

    pub fn get<S: Storage>(&self, storage: &S, pos: u32) -> Result<bool> {
        let (blockno, offset) = self.unpack(pos);
        let block = BlockGuard::<BitmapBlock>::peek(storage, blockno)?;
        Ok(block.get(offset))
    }

    pub fn set<S: Storage>(&self, storage: &mut S, pos: u32) -> Result<()> {
        let (blockno, offset) = self.unpack(pos);
        let mut block = BlockGuard::<BitmapBlock>::load(storage, blockno)?;
        block.set(offset, true);
        block.commit(storage)?;
        Ok(())
    }

    pub fn clear<S: Storage>(&self, storage: &mut S, pos: u32) -> Result<()> {
        let (blockno, offset) = self.unpack(pos);
        let mut block = BlockGuard::<BitmapBlock>::load(storage, blockno)?;
        block.set(offset, false);
        block.commit(storage)?;
        Ok(())
    }

    /// Scans for the lowest zero bit, starting from the block containing
    /// `hint`. Within a block the lowest-indexed zero wins. The hint is an
    /// optimization only; callers maintain it so that no zero bit exists
    /// below the hinted block.
    pub fn first_zero<S: Storage>(&self, storage: &S, hint: u32) -> Result<Option<u32>> {
        let span = self.end - self.start;
        let mut blockoff = (hint / BITS_PER_BLOCK).min(span);

        while blockoff < span {
            let block = BlockGuard::<BitmapBlock>::peek(storage, self.start + blockoff)?;
            if let Some(offset) = block.first_zero() {
                return Ok(Some(blockoff * BITS_PER_BLOCK + offset));
            }
            blockoff += 1;
        }
        Ok(None)
    }
}
