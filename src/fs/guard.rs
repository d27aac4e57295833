use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::block::{
    BLOCK_SIZE, Block, BlockNo,
    storage::{Result, Storage},
};

/// A scoped handle over one block, typed by the record stored in it.
///
/// A guard must be terminated explicitly: [`commit`](Self::commit) writes the
/// buffer back, [`discard`](Self::discard) abandons the changes. Letting a
/// guard fall out of scope without either is a forgotten write and trips a
/// debug assertion. Read-only access does not need a guard at all; use
/// [`peek`](Self::peek) instead.
pub struct BlockGuard<T> {
    blockno: BlockNo,
    block: Block,
    closed: bool,
    _record: PhantomData<T>,
}

impl<T> BlockGuard<T>
where
    T: FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned,
{
    /// Loads the block at `blockno` for mutation.
    pub fn load<S: Storage>(storage: &S, blockno: BlockNo) -> Result<Self> {
        const {
            assert!(size_of::<T>() <= BLOCK_SIZE as usize);
        }
        let mut block = Block::default();
        storage.read_at(&mut block, blockno)?;
        Ok(Self {
            blockno,
            block,
            closed: false,
            _record: PhantomData,
        })
    }

    /// Constructs a guard over a zeroed buffer without reading the device,
    /// for blocks whose previous contents are irrelevant.
    pub fn zeroed(blockno: BlockNo) -> Self {
        const {
            assert!(size_of::<T>() <= BLOCK_SIZE as usize);
        }
        Self {
            blockno,
            block: Block::default(),
            closed: false,
            _record: PhantomData,
        }
    }

    /// Reads the record at `blockno` without the commit-or-discard
    /// obligation.
    pub fn peek<S: Storage>(storage: &S, blockno: BlockNo) -> Result<T> {
        const {
            assert!(size_of::<T>() <= BLOCK_SIZE as usize);
        }
        let mut block = Block::default();
        storage.read_at(&mut block, blockno)?;
        let (record, _) = T::read_from_prefix(&block.data).expect("record fits in a block");
        Ok(record)
    }

    /// Writes the buffer back, consuming the guard. The guard counts as
    /// closed even if the write fails.
    pub fn commit<S: Storage>(mut self, storage: &mut S) -> Result<()> {
        self.closed = true;
        storage.write_at(&self.block, self.blockno)
    }

    /// Abandons the changes. No write is issued.
    pub fn discard(mut self) {
        self.closed = true;
    }

    pub fn blockno(&self) -> BlockNo {
        self.blockno
    }
}

impl<T> Deref for BlockGuard<T>
where
    T: FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned,
{
    type Target = T;

    fn deref(&self) -> &T {
        T::ref_from_prefix(&self.block.data)
            .expect("record fits in a block")
            .0
    }
}

impl<T> DerefMut for BlockGuard<T>
where
    T: FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned,
{
    fn deref_mut(&mut self) -> &mut T {
        T::mut_from_prefix(&mut self.block.data)
            .expect("record fits in a block")
            .0
    }
}

impl<T> Drop for BlockGuard<T> {
    fn drop(&mut self) {
        debug_assert!(
            self.closed,
            "block {} guard dropped without commit or discard",
            self.blockno
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::storage::mem::MemStorage;

    #[test]
    fn commit_persists() {
        let mut storage = MemStorage::new(2);

        let mut guard = BlockGuard::<Block>::load(&storage, 1).unwrap();
        guard.data.fill(0xAB);
        guard.commit(&mut storage).unwrap();

        let block = BlockGuard::<Block>::peek(&storage, 1).unwrap();
        assert!(block.data.iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn discard_abandons() {
        let mut storage = MemStorage::new(2);

        let mut seeded = Block::default();
        seeded.data.fill(0x11);
        storage.write_at(&seeded, 0).unwrap();

        let mut guard = BlockGuard::<Block>::load(&storage, 0).unwrap();
        guard.data.fill(0xFF);
        guard.discard();

        let block = BlockGuard::<Block>::peek(&storage, 0).unwrap();
        assert!(block.data.iter().all(|b| *b == 0x11));
    }

    #[test]
    fn zeroed_skips_read() {
        let mut storage = MemStorage::new(1);
        let mut seeded = Block::default();
        seeded.data.fill(0x77);
        storage.write_at(&seeded, 0).unwrap();

        let guard = BlockGuard::<Block>::zeroed(0);
        assert!(guard.data.iter().all(|b| *b == 0));
        guard.commit(&mut storage).unwrap();

        let block = BlockGuard::<Block>::peek(&storage, 0).unwrap();
        assert!(block.data.iter().all(|b| *b == 0));
    }

    #[test]
    #[should_panic(expected = "without commit or discard")]
    fn forgotten_guard_panics() {
        let storage = MemStorage::new(1);
        let guard = BlockGuard::<Block>::load(&storage, 0).unwrap();
        drop(guard);
    }
}
