use log::debug;

use crate::{
    block::{BlockNo, storage::Storage},
    fs::{
        Filesystem,
        bitmap::Bitmap,
        error::{Error, Result},
        guard::BlockGuard,
        inode::InodeNo,
        superblock::{SUPER_BLOCKNO, Superblock},
    },
};

/// Allocation of inodes and data blocks.
///
/// Each operation updates the relevant bitmap and the superblock counter
/// together: the bit flip commits first, then the counter, so a counter on
/// disk never claims space the bitmap has not recorded. Freeing a bit that
/// is already clear is a programming error and asserts.
///
/// The two first-zero hints approximate "allocate upward": an allocation
/// raises the hint to the returned position, a free lowers it so the slot is
/// reconsidered. Correctness never depends on them.
impl<S: Storage> Filesystem<S> {
    pub fn alloc_inode(&mut self) -> Result<InodeNo> {
        let sb = self.superblock()?;
        if sb.inode_num_free.get() == 0 {
            return Err(Error::NoSpace);
        }

        let bitmap = inode_bitmap(&sb);
        let pos = bitmap
            .first_zero(&self.storage, self.inode_hint)?
            .expect("inode bitmap has a zero bit while the free count is nonzero");
        bitmap.set(&mut self.storage, pos)?;

        let mut sb = BlockGuard::<Superblock>::load(&self.storage, SUPER_BLOCKNO)?;
        let free = sb.inode_num_free.get();
        sb.inode_num_free.set(free - 1);
        sb.commit(&mut self.storage)?;

        self.inode_hint = self.inode_hint.max(pos);
        debug!("alloc_inode -> {pos}");
        Ok(pos)
    }

    pub fn free_inode(&mut self, ino: InodeNo) -> Result<()> {
        let sb = self.superblock()?;
        let bitmap = inode_bitmap(&sb);
        assert!(
            bitmap.get(&self.storage, ino)?,
            "freeing unallocated inode {ino}"
        );
        bitmap.clear(&mut self.storage, ino)?;

        let mut sb = BlockGuard::<Superblock>::load(&self.storage, SUPER_BLOCKNO)?;
        let free = sb.inode_num_free.get();
        sb.inode_num_free.set(free + 1);
        sb.commit(&mut self.storage)?;

        self.inode_hint = self.inode_hint.min(ino);
        debug!("free_inode {ino}");
        Ok(())
    }

    /// Allocates one data block, returning its absolute block number.
    pub fn alloc_data(&mut self) -> Result<BlockNo> {
        let sb = self.superblock()?;
        if sb.data_block_num_free.get() == 0 {
            return Err(Error::NoSpace);
        }

        let bitmap = data_bitmap(&sb);
        let pos = bitmap
            .first_zero(&self.storage, self.data_hint)?
            .expect("data bitmap has a zero bit while the free count is nonzero");
        bitmap.set(&mut self.storage, pos)?;

        let mut guard = BlockGuard::<Superblock>::load(&self.storage, SUPER_BLOCKNO)?;
        let free = guard.data_block_num_free.get();
        guard.data_block_num_free.set(free - 1);
        guard.commit(&mut self.storage)?;

        self.data_hint = self.data_hint.max(pos);
        let blockno = sb.data_block_offset.get() + pos;
        debug!("alloc_data -> {blockno}");
        Ok(blockno)
    }

    /// Frees the data block at absolute block number `blockno`.
    pub fn free_data(&mut self, blockno: BlockNo) -> Result<()> {
        let sb = self.superblock()?;
        assert!(
            blockno >= sb.data_block_offset.get(),
            "block {blockno} is not in the data region"
        );
        let pos = blockno - sb.data_block_offset.get();

        let bitmap = data_bitmap(&sb);
        assert!(
            bitmap.get(&self.storage, pos)?,
            "freeing unallocated data block {blockno}"
        );
        bitmap.clear(&mut self.storage, pos)?;

        let mut guard = BlockGuard::<Superblock>::load(&self.storage, SUPER_BLOCKNO)?;
        let free = guard.data_block_num_free.get();
        guard.data_block_num_free.set(free + 1);
        guard.commit(&mut self.storage)?;

        self.data_hint = self.data_hint.min(pos);
        debug!("free_data {blockno}");
        Ok(())
    }
}

fn inode_bitmap(sb: &Superblock) -> Bitmap {
    Bitmap::new(
        sb.inode_bitmap_offset.get(),
        sb.data_block_bitmap_offset.get(),
    )
}

fn data_bitmap(sb: &Superblock) -> Bitmap {
    Bitmap::new(
        sb.data_block_bitmap_offset.get(),
        sb.inode_block_offset.get(),
    )
}
