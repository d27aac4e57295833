pub mod error;
use error::*;
pub mod alloc;
pub mod bitmap;
pub mod dir;
pub mod extent;
pub mod file;
pub mod guard;
pub mod inode;
pub mod ops;
pub mod superblock;

use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::{
    block::{BLOCK_SIZE, BlockNo, storage::Storage},
    fs::{
        bitmap::{BITS_PER_BLOCK, BitmapBlock},
        guard::BlockGuard,
        inode::{Inode, InodeGuard, InodeKind, InodeNo, ROOT_INO},
        superblock::{MAGIC, SUPER_BLOCKNO, Superblock},
    },
};

/// The on-disk filesystem over a storage device.
///
/// All persistent state lives on the device; the only in-memory state is
/// the pair of first-zero hints for the bitmaps. Operations run strictly
/// serially; callers must not interleave them.
pub struct Filesystem<S: Storage> {
    pub(crate) storage: S,
    pub(crate) inode_hint: u32,
    pub(crate) data_hint: u32,
}

impl<S: Storage> Filesystem<S> {
    /// Formats a storage device and returns the mounted filesystem.
    /// Creates inode 0 as the empty root directory.
    ///
    /// # Panics
    /// Panics if the device is too small to hold every metadata region.
    pub fn format(mut storage: S) -> Result<Self> {
        let block_count = storage.capacity()?;
        let sb = Superblock::new(block_count);

        let mut guard = BlockGuard::<Superblock>::zeroed(SUPER_BLOCKNO);
        *guard = sb;
        guard.commit(&mut storage)?;

        format_bitmap(
            &mut storage,
            sb.inode_bitmap_offset.get(),
            sb.data_block_bitmap_offset.get(),
            sb.inode_num_tot.get(),
        )?;
        format_bitmap(
            &mut storage,
            sb.data_block_bitmap_offset.get(),
            sb.inode_block_offset.get(),
            sb.data_block_num_tot.get(),
        )?;

        let mut fs = Filesystem {
            storage,
            inode_hint: 0,
            data_hint: 0,
        };

        let root = fs.alloc_inode()?;
        assert_eq!(root, ROOT_INO, "first allocated inode must be the root");
        let mut inode = InodeGuard::load(&fs, root)?;
        *inode = Inode::new(InodeKind::Directory, now());
        inode.commit(&mut fs)?;

        info!(
            "formatted {} blocks: {} inodes, {} data blocks",
            block_count,
            sb.inode_num_tot.get(),
            sb.data_block_num_tot.get()
        );

        Ok(fs)
    }

    /// Opens an already-formatted device, validating the superblock magic.
    pub fn open(storage: S) -> Result<Self> {
        let sb = BlockGuard::<Superblock>::peek(&storage, SUPER_BLOCKNO)?;
        if sb.magic.get() != MAGIC {
            return Err(Error::InvalidSuperblock);
        }
        Ok(Self {
            storage,
            inode_hint: 0,
            data_hint: 0,
        })
    }

    /// Reads the superblock. Geometry is consulted on every allocator call
    /// and inode-table lookup rather than cached.
    pub(crate) fn superblock(&self) -> Result<Superblock> {
        Ok(BlockGuard::<Superblock>::peek(
            &self.storage,
            SUPER_BLOCKNO,
        )?)
    }

    pub fn statfs(&self) -> Result<FsStat> {
        let sb = self.superblock()?;
        Ok(FsStat {
            block_size: BLOCK_SIZE,
            data_block_num_tot: sb.data_block_num_tot.get(),
            data_block_num_free: sb.data_block_num_free.get(),
            inode_num_tot: sb.inode_num_tot.get(),
            inode_num_free: sb.inode_num_free.get(),
        })
    }

    /// Returns the attributes of an inode.
    pub fn attr(&self, ino: InodeNo) -> Result<Attr> {
        let inode = self.read_inode(ino)?;
        Ok(Attr {
            ino,
            kind: inode.kind(),
            size: inode.filesize.get(),
            atime: inode.atime.get(),
            mtime: inode.mtime.get(),
            ctime: inode.ctime.get(),
        })
    }
}

/// Writes a zeroed bitmap covering `valid_bits` positions over the blocks
/// `[start, end)`, with the slack tail of the final block pre-set so the
/// free count always equals the clear-bit population.
fn format_bitmap<S: Storage>(
    storage: &mut S,
    start: BlockNo,
    end: BlockNo,
    valid_bits: u32,
) -> Result<()> {
    for (idx, blockno) in (start..end).enumerate() {
        let mut guard = BlockGuard::<BitmapBlock>::zeroed(blockno);
        let first_bit = idx as u32 * BITS_PER_BLOCK;
        if first_bit + BITS_PER_BLOCK > valid_bits {
            guard.fill_from(valid_bits.saturating_sub(first_bit));
        }
        guard.commit(storage)?;
    }
    Ok(())
}

/// Attributes of one inode as reported by `getattr`.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub ino: InodeNo,
    pub kind: InodeKind,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// Filesystem-wide counters as reported by `statfs`.
#[derive(Debug, Clone, Copy)]
pub struct FsStat {
    pub block_size: u32,
    pub data_block_num_tot: u32,
    pub data_block_num_free: u32,
    pub inode_num_tot: u32,
    pub inode_num_free: u32,
}

/// Seconds since the epoch, saturating at zero on a pre-epoch clock.
pub(crate) fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::storage::mem::MemStorage;

    #[test]
    fn format_creates_empty_root() {
        let fs = Filesystem::format(MemStorage::new(1024)).unwrap();

        let attr = fs.attr(ROOT_INO).unwrap();
        assert_eq!(attr.kind, InodeKind::Directory);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn format_counters_start_at_baseline() {
        let fs = Filesystem::format(MemStorage::new(1024)).unwrap();

        let stat = fs.statfs().unwrap();
        assert_eq!(stat.block_size, BLOCK_SIZE);
        assert_eq!(stat.data_block_num_free, stat.data_block_num_tot);
        // The root directory occupies the only used inode.
        assert_eq!(stat.inode_num_free, stat.inode_num_tot - 1);
    }

    #[test]
    fn open_formatted_device() {
        let storage = {
            let fs = Filesystem::format(MemStorage::new(1024)).unwrap();
            fs.storage
        };

        let fs = Filesystem::open(storage).unwrap();
        assert_eq!(fs.attr(ROOT_INO).unwrap().kind, InodeKind::Directory);
    }

    #[test]
    fn open_unformatted_device_fails() {
        let err = Filesystem::open(MemStorage::new(1024)).unwrap_err();
        assert_eq!(err, Error::InvalidSuperblock);
    }
}
