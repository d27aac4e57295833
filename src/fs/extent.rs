use log::warn;

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::U32,
};

use crate::{
    block::{BLOCK_SIZE, BlockNo, storage::Storage},
    fs::{
        Filesystem,
        error::{Error, Result},
        guard::BlockGuard,
        inode::{Inode, InodeGuard, InodeNo},
        now,
    },
};

/// Block numbers per pointer block.
pub const POINTER_PER_BLOCK: u32 = BLOCK_SIZE / size_of::<U32>() as u32;

/// A block holding an array of block numbers. Zero means "not present";
/// nonzero entries fill from the lowest slot upward.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PointerBlock {
    pub entries: [U32; POINTER_PER_BLOCK as usize],
}

impl PointerBlock {
    fn get(&self, slot: u32) -> BlockNo {
        self.entries[slot as usize].get()
    }

    fn set(&mut self, slot: u32, blockno: BlockNo) {
        self.entries[slot as usize].set(blockno);
    }
}

/// The extent engine: mapping of a file's logical block index onto physical
/// blocks through the direct, indirect and double-indirect tiers, and
/// growing/shrinking that structure one block at a time.
impl<S: Storage> Filesystem<S> {
    /// Maps logical block `k` of `inode` to its physical block number.
    ///
    /// # Panics
    /// Panics if any pointer on the path is zero; a hole here means the
    /// filesystem is inconsistent.
    pub(crate) fn locate(&self, inode: &Inode, k: u32) -> Result<BlockNo> {
        if k == 0 {
            let blockno = inode.direct.get();
            assert!(blockno != 0, "inconsistent extent: logical block 0 absent");
            return Ok(blockno);
        }

        if k < 1 + POINTER_PER_BLOCK {
            let ind = inode.indirect.get();
            assert!(ind != 0, "inconsistent extent: indirect tier absent");
            let pointers = BlockGuard::<PointerBlock>::peek(&self.storage, ind)?;
            let blockno = pointers.get(k - 1);
            assert!(blockno != 0, "inconsistent extent: logical block {k} absent");
            return Ok(blockno);
        }

        let o = k - (1 + POINTER_PER_BLOCK);
        let (i, j) = (o / POINTER_PER_BLOCK, o % POINTER_PER_BLOCK);

        let iind = inode.iindirect.get();
        assert!(iind != 0, "inconsistent extent: double-indirect tier absent");
        let outer = BlockGuard::<PointerBlock>::peek(&self.storage, iind)?;
        let mid = outer.get(i);
        assert!(mid != 0, "inconsistent extent: inner pointer block {i} absent");
        let inner = BlockGuard::<PointerBlock>::peek(&self.storage, mid)?;
        let blockno = inner.get(j);
        assert!(blockno != 0, "inconsistent extent: logical block {k} absent");
        Ok(blockno)
    }

    /// Counts the data blocks currently mapped by `inode`, walking the
    /// tiers in order and stopping at the first absent slot.
    pub fn block_count(&self, inode: &Inode) -> Result<u32> {
        if inode.direct.get() == 0 {
            return Ok(0);
        }
        let mut count = 1;

        if inode.indirect.get() == 0 {
            return Ok(count);
        }
        let pointers = BlockGuard::<PointerBlock>::peek(&self.storage, inode.indirect.get())?;
        for slot in 0..POINTER_PER_BLOCK {
            if pointers.get(slot) == 0 {
                return Ok(count);
            }
            count += 1;
        }

        if inode.iindirect.get() == 0 {
            return Ok(count);
        }
        let outer = BlockGuard::<PointerBlock>::peek(&self.storage, inode.iindirect.get())?;
        for i in 0..POINTER_PER_BLOCK {
            if outer.get(i) != 0 {
                // Counted precisely below once the tail inner block is found.
                count += POINTER_PER_BLOCK;
                continue;
            }
            if i > 0 {
                // The previous inner block may be partially filled.
                count -= POINTER_PER_BLOCK;
                let inner = BlockGuard::<PointerBlock>::peek(&self.storage, outer.get(i - 1))?;
                for slot in 0..POINTER_PER_BLOCK {
                    if inner.get(slot) == 0 {
                        break;
                    }
                    count += 1;
                }
            }
            break;
        }
        Ok(count)
    }

    /// Grows or shrinks the file to `new_size` bytes, one block at a time.
    ///
    /// If an allocation fails mid-grow, the partial structure of the failed
    /// step is unwound, the steps that did succeed are released by resizing
    /// back to the original size, and `NoSpace` is returned; a partial grow
    /// is never visible. On success the new size and `ctime` are committed.
    pub fn resize(&mut self, ino: InodeNo, new_size: u64) -> Result<()> {
        let Ok(new_size) = u32::try_from(new_size) else {
            return Err(Error::NoSpace);
        };
        let need = new_size.div_ceil(BLOCK_SIZE);

        let mut inode = InodeGuard::load(self, ino)?;
        let mut have = match self.block_count(&inode) {
            Ok(count) => count,
            Err(err) => {
                inode.discard();
                return Err(err);
            }
        };
        let orig_size = inode.filesize.get();
        inode.ctime.set(now());

        while have < need {
            match self.grow_one(&mut inode, have) {
                Ok(()) => have += 1,
                Err(Error::NoSpace) => {
                    // Keep the blocks that were added, then walk back to the
                    // original size to release them.
                    warn!("resize({ino}, {new_size}): out of space, rolling back");
                    inode.commit(self)?;
                    self.resize(ino, orig_size as u64)?;
                    return Err(Error::NoSpace);
                }
                Err(err) => {
                    inode.discard();
                    return Err(err);
                }
            }
        }
        while have > need {
            match self.shrink_one(&mut inode, have) {
                Ok(()) => have -= 1,
                Err(err) => {
                    inode.discard();
                    return Err(err);
                }
            }
        }

        inode.filesize.set(new_size);
        inode.commit(self)
    }

    /// Extends the mapping by one block, from `have` to `have + 1`. On
    /// `NoSpace` any pointer block created for this step has been released
    /// and the inode record is as before the call.
    fn grow_one(&mut self, inode: &mut Inode, have: u32) -> Result<()> {
        if have == 0 {
            let blockno = self.alloc_data()?;
            inode.direct.set(blockno);
            return Ok(());
        }

        if have < 1 + POINTER_PER_BLOCK {
            let slot = have - 1;
            let mut fresh_indirect = false;
            if slot == 0 {
                let blockno = self.alloc_data()?;
                BlockGuard::<PointerBlock>::zeroed(blockno).commit(&mut self.storage)?;
                inode.indirect.set(blockno);
                fresh_indirect = true;
            }

            match self.alloc_data() {
                Ok(blockno) => {
                    let ind = inode.indirect.get();
                    let mut pointers = BlockGuard::<PointerBlock>::load(&self.storage, ind)?;
                    pointers.set(slot, blockno);
                    pointers.commit(&mut self.storage)?;
                    Ok(())
                }
                Err(err) => {
                    if fresh_indirect {
                        let ind = inode.indirect.get();
                        inode.indirect.set(0);
                        self.free_data(ind)?;
                    }
                    Err(err)
                }
            }
        } else {
            let o = have - (1 + POINTER_PER_BLOCK);
            let (i, j) = (o / POINTER_PER_BLOCK, o % POINTER_PER_BLOCK);

            let mut fresh_outer = false;
            let mut fresh_inner = false;
            if j == 0 {
                if i == 0 {
                    let blockno = self.alloc_data()?;
                    BlockGuard::<PointerBlock>::zeroed(blockno).commit(&mut self.storage)?;
                    inode.iindirect.set(blockno);
                    fresh_outer = true;
                }

                match self.alloc_data() {
                    Ok(blockno) => {
                        BlockGuard::<PointerBlock>::zeroed(blockno).commit(&mut self.storage)?;
                        let iind = inode.iindirect.get();
                        let mut outer = BlockGuard::<PointerBlock>::load(&self.storage, iind)?;
                        outer.set(i, blockno);
                        outer.commit(&mut self.storage)?;
                        fresh_inner = true;
                    }
                    Err(err) => {
                        if fresh_outer {
                            let iind = inode.iindirect.get();
                            inode.iindirect.set(0);
                            self.free_data(iind)?;
                        }
                        return Err(err);
                    }
                }
            }

            let outer = BlockGuard::<PointerBlock>::peek(&self.storage, inode.iindirect.get())?;
            let inner_no = outer.get(i);

            match self.alloc_data() {
                Ok(blockno) => {
                    let mut inner = BlockGuard::<PointerBlock>::load(&self.storage, inner_no)?;
                    inner.set(j, blockno);
                    inner.commit(&mut self.storage)?;
                    Ok(())
                }
                Err(err) => {
                    if fresh_inner {
                        let iind = inode.iindirect.get();
                        let mut outer = BlockGuard::<PointerBlock>::load(&self.storage, iind)?;
                        outer.set(i, 0);
                        outer.commit(&mut self.storage)?;
                        self.free_data(inner_no)?;
                    }
                    if fresh_outer {
                        let iind = inode.iindirect.get();
                        inode.iindirect.set(0);
                        self.free_data(iind)?;
                    }
                    Err(err)
                }
            }
        }
    }

    /// Releases the last mapped block, from `have` to `have - 1`, together
    /// with any pointer block it was the first occupant of. Pointer slots
    /// are cleared and committed before the bitmap bit of their referent.
    fn shrink_one(&mut self, inode: &mut Inode, have: u32) -> Result<()> {
        let k = have - 1;

        if k == 0 {
            let blockno = inode.direct.get();
            inode.direct.set(0);
            return self.free_data(blockno);
        }

        if k < 1 + POINTER_PER_BLOCK {
            let slot = k - 1;
            let ind = inode.indirect.get();
            let mut pointers = BlockGuard::<PointerBlock>::load(&self.storage, ind)?;
            let blockno = pointers.get(slot);
            pointers.set(slot, 0);
            pointers.commit(&mut self.storage)?;
            self.free_data(blockno)?;

            if slot == 0 {
                inode.indirect.set(0);
                self.free_data(ind)?;
            }
            return Ok(());
        }

        let o = k - (1 + POINTER_PER_BLOCK);
        let (i, j) = (o / POINTER_PER_BLOCK, o % POINTER_PER_BLOCK);

        let iind = inode.iindirect.get();
        let outer = BlockGuard::<PointerBlock>::peek(&self.storage, iind)?;
        let inner_no = outer.get(i);

        let mut inner = BlockGuard::<PointerBlock>::load(&self.storage, inner_no)?;
        let blockno = inner.get(j);
        inner.set(j, 0);
        inner.commit(&mut self.storage)?;
        self.free_data(blockno)?;

        if j == 0 {
            let mut outer = BlockGuard::<PointerBlock>::load(&self.storage, iind)?;
            outer.set(i, 0);
            outer.commit(&mut self.storage)?;
            self.free_data(inner_no)?;

            if i == 0 {
                inode.iindirect.set(0);
                self.free_data(iind)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        block::storage::mem::MemStorage,
        fs::inode::InodeKind,
    };

    const BS: u64 = BLOCK_SIZE as u64;

    fn fresh(blocks: u32) -> (Filesystem<MemStorage>, InodeNo) {
        let mut fs = Filesystem::format(MemStorage::new(blocks)).unwrap();
        let ino = fs.alloc_inode().unwrap();
        let mut guard = InodeGuard::load(&fs, ino).unwrap();
        *guard = Inode::new(InodeKind::File, now());
        guard.commit(&mut fs).unwrap();
        (fs, ino)
    }

    fn count(fs: &Filesystem<MemStorage>, ino: InodeNo) -> u32 {
        let inode = fs.read_inode(ino).unwrap();
        fs.block_count(&inode).unwrap()
    }

    fn data_free(fs: &Filesystem<MemStorage>) -> u32 {
        fs.statfs().unwrap().data_block_num_free
    }

    #[test]
    fn empty_file_owns_no_blocks() {
        let (mut fs, ino) = fresh(512);
        let baseline = data_free(&fs);

        fs.resize(ino, 0).unwrap();
        assert_eq!(count(&fs, ino), 0);
        assert_eq!(data_free(&fs), baseline);
    }

    #[test]
    fn grow_within_direct_tier() {
        let (mut fs, ino) = fresh(512);
        let baseline = data_free(&fs);

        fs.resize(ino, 5).unwrap();
        let inode = fs.read_inode(ino).unwrap();
        assert_eq!(inode.filesize.get(), 5);
        assert_eq!(count(&fs, ino), 1);
        assert_ne!(inode.direct.get(), 0);
        assert_eq!(inode.indirect.get(), 0);
        assert_eq!(data_free(&fs), baseline - 1);
    }

    #[test]
    fn grow_into_indirect_tier() {
        let (mut fs, ino) = fresh(512);
        let baseline = data_free(&fs);

        fs.resize(ino, 13 * BS).unwrap();
        assert_eq!(count(&fs, ino), 13);
        // 13 data blocks plus the indirect pointer block.
        assert_eq!(data_free(&fs), baseline - 14);

        let inode = fs.read_inode(ino).unwrap();
        assert_ne!(inode.indirect.get(), 0);
        assert_eq!(inode.iindirect.get(), 0);
        for k in 0..13 {
            assert_ne!(fs.locate(&inode, k).unwrap(), 0);
        }
    }

    #[test]
    fn grow_into_double_indirect_tier() {
        let (mut fs, ino) = fresh(1200);
        let baseline = data_free(&fs);

        let blocks = 1 + POINTER_PER_BLOCK + 5;
        fs.resize(ino, blocks as u64 * BS).unwrap();
        assert_eq!(count(&fs, ino), blocks);
        // Data blocks plus one indirect, one outer and one inner pointer block.
        assert_eq!(data_free(&fs), baseline - (blocks + 3));

        let inode = fs.read_inode(ino).unwrap();
        assert_ne!(inode.iindirect.get(), 0);
        assert_ne!(fs.locate(&inode, blocks - 1).unwrap(), 0);
    }

    #[test]
    fn block_count_recovers_partial_inner_block() {
        let (mut fs, ino) = fresh(2700);

        let blocks = 1 + POINTER_PER_BLOCK + POINTER_PER_BLOCK + 300;
        fs.resize(ino, blocks as u64 * BS).unwrap();
        assert_eq!(count(&fs, ino), blocks);
    }

    #[test]
    fn shrink_releases_everything() {
        let (mut fs, ino) = fresh(1200);
        let baseline = data_free(&fs);

        fs.resize(ino, (1 + POINTER_PER_BLOCK + 5) as u64 * BS).unwrap();
        fs.resize(ino, 0).unwrap();

        assert_eq!(count(&fs, ino), 0);
        assert_eq!(data_free(&fs), baseline);

        let inode = fs.read_inode(ino).unwrap();
        assert_eq!(inode.direct.get(), 0);
        assert_eq!(inode.indirect.get(), 0);
        assert_eq!(inode.iindirect.get(), 0);
    }

    #[test]
    fn shrink_steps_through_tier_boundaries() {
        let (mut fs, ino) = fresh(1200);
        let baseline = data_free(&fs);

        fs.resize(ino, (1 + POINTER_PER_BLOCK + 2) as u64 * BS).unwrap();
        // Back below the double-indirect tier: outer and inner released.
        fs.resize(ino, (1 + POINTER_PER_BLOCK) as u64 * BS).unwrap();
        let inode = fs.read_inode(ino).unwrap();
        assert_eq!(inode.iindirect.get(), 0);
        assert_eq!(data_free(&fs), baseline - (1 + POINTER_PER_BLOCK + 1));

        // Back to a single block: indirect released too.
        fs.resize(ino, BS).unwrap();
        let inode = fs.read_inode(ino).unwrap();
        assert_eq!(inode.indirect.get(), 0);
        assert_eq!(data_free(&fs), baseline - 1);
    }

    #[test]
    fn resize_is_idempotent() {
        let (mut fs, ino) = fresh(512);

        fs.resize(ino, 10 * BS).unwrap();
        let before = fs.read_inode(ino).unwrap();
        let free_before = data_free(&fs);

        fs.resize(ino, 10 * BS).unwrap();
        let after = fs.read_inode(ino).unwrap();

        assert_eq!(before.filesize.get(), after.filesize.get());
        assert_eq!(before.direct.get(), after.direct.get());
        assert_eq!(before.indirect.get(), after.indirect.get());
        assert_eq!(before.iindirect.get(), after.iindirect.get());
        assert_eq!(data_free(&fs), free_before);
    }

    #[test]
    fn failed_grow_rolls_back() {
        let (mut fs, ino) = fresh(256);
        let total = data_free(&fs);

        fs.resize(ino, 10 * BS).unwrap();
        let free_before = data_free(&fs);
        let size_before = fs.read_inode(ino).unwrap().filesize.get();

        let err = fs.resize(ino, (total as u64 + 10) * BS).unwrap_err();
        assert_eq!(err, Error::NoSpace);

        assert_eq!(fs.read_inode(ino).unwrap().filesize.get(), size_before);
        assert_eq!(count(&fs, ino), 10);
        assert_eq!(data_free(&fs), free_before);
    }

    #[test]
    fn failed_grow_releases_fresh_pointer_block() {
        let (mut fs, ino) = fresh(256);

        fs.resize(ino, BS).unwrap();

        // Consume every free block but one, so the next grow can allocate
        // the indirect pointer block but not the data block behind it.
        let mut hog = Vec::new();
        while data_free(&fs) > 1 {
            hog.push(fs.alloc_data().unwrap());
        }

        assert_eq!(fs.resize(ino, 2 * BS).unwrap_err(), Error::NoSpace);
        assert_eq!(data_free(&fs), 1);
        assert_eq!(count(&fs, ino), 1);
        assert_eq!(fs.read_inode(ino).unwrap().indirect.get(), 0);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let (mut fs, ino) = fresh(256);
        assert_eq!(fs.resize(ino, u64::MAX).unwrap_err(), Error::NoSpace);
        assert_eq!(count(&fs, ino), 0);
    }
}
