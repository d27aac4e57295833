use std::ops::{Deref, DerefMut};

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::U32,
};

use crate::{
    block::{BLOCK_SIZE, BlockNo, storage::Storage},
    fs::{Filesystem, error::Result, guard::BlockGuard, superblock::Superblock},
};

/// An inode number: a dense index into the inode table.
pub type InodeNo = u32;

/// The root directory's inode number.
pub const ROOT_INO: InodeNo = 0;

/// Inode records per inode-table block.
pub const INODE_PER_BLOCK: u32 = BLOCK_SIZE / size_of::<Inode>() as u32;

/// On-disk metadata record for one file or directory.
///
/// `direct` maps logical block 0; `indirect` names a pointer block covering
/// the next `POINTER_PER_BLOCK` logical blocks; `iindirect` names a pointer
/// block of pointer blocks covering the rest. A zero pointer means absent.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Inode {
    kind: U32,
    pub filesize: U32,
    pub atime: U32,
    pub mtime: U32,
    pub ctime: U32,
    pub direct: U32,
    pub indirect: U32,
    pub iindirect: U32,
}

impl Inode {
    /// Constructs a fresh empty inode with all times set to `time`.
    pub fn new(kind: InodeKind, time: u32) -> Self {
        Self {
            kind: U32::new(kind as u32),
            filesize: U32::new(0),
            atime: U32::new(time),
            mtime: U32::new(time),
            ctime: U32::new(time),
            direct: U32::new(0),
            indirect: U32::new(0),
            iindirect: U32::new(0),
        }
    }

    pub fn kind(&self) -> InodeKind {
        if self.kind.get() == InodeKind::Directory as u32 {
            InodeKind::Directory
        } else {
            InodeKind::File
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InodeKind {
    File = 0,
    Directory = 1,
}

/// One block of the inode table.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct InodeTableBlock {
    pub inodes: [Inode; INODE_PER_BLOCK as usize],
}

/// Locates the table block holding `ino` and the slot within it.
fn locate_inode(sb: &Superblock, ino: InodeNo) -> (BlockNo, usize) {
    let blockno = sb.inode_block_offset.get() + ino / INODE_PER_BLOCK;
    (blockno, (ino % INODE_PER_BLOCK) as usize)
}

impl<S: Storage> Filesystem<S> {
    /// Reads an inode record without the commit-or-discard obligation.
    pub fn read_inode(&self, ino: InodeNo) -> Result<Inode> {
        let sb = self.superblock()?;
        let (blockno, slot) = locate_inode(&sb, ino);
        let table = BlockGuard::<InodeTableBlock>::peek(&self.storage, blockno)?;
        Ok(table.inodes[slot])
    }
}

/// A scoped handle over one inode, with the same commit-or-discard
/// discipline as [`BlockGuard`]. Construction copies the record out of its
/// table block; commit rewrites the block with the modified record.
pub struct InodeGuard {
    ino: InodeNo,
    inode: Inode,
    closed: bool,
}

impl InodeGuard {
    pub fn load<S: Storage>(fs: &Filesystem<S>, ino: InodeNo) -> Result<Self> {
        Ok(Self {
            ino,
            inode: fs.read_inode(ino)?,
            closed: false,
        })
    }

    pub fn commit<S: Storage>(mut self, fs: &mut Filesystem<S>) -> Result<()> {
        self.closed = true;
        let sb = fs.superblock()?;
        let (blockno, slot) = locate_inode(&sb, self.ino);
        let mut table = BlockGuard::<InodeTableBlock>::load(&fs.storage, blockno)?;
        table.inodes[slot] = self.inode;
        table.commit(&mut fs.storage)?;
        Ok(())
    }

    pub fn discard(mut self) {
        self.closed = true;
    }

    pub fn ino(&self) -> InodeNo {
        self.ino
    }
}

impl Deref for InodeGuard {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        &self.inode
    }
}

impl DerefMut for InodeGuard {
    fn deref_mut(&mut self) -> &mut Inode {
        &mut self.inode
    }
}

impl Drop for InodeGuard {
    fn drop(&mut self) {
        debug_assert!(
            self.closed,
            "inode {} guard dropped without commit or discard",
            self.ino
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::storage::mem::MemStorage;

    #[test]
    fn inode_record_is_32_bytes() {
        assert_eq!(size_of::<Inode>(), 32);
        assert_eq!(INODE_PER_BLOCK, 128);
        assert_eq!(size_of::<InodeTableBlock>(), BLOCK_SIZE as usize);
    }

    #[test]
    fn guard_roundtrip() {
        let mut fs = Filesystem::format(MemStorage::new(512)).unwrap();
        let ino = fs.alloc_inode().unwrap();

        let mut guard = InodeGuard::load(&fs, ino).unwrap();
        *guard = Inode::new(InodeKind::File, 1234);
        guard.filesize.set(77);
        guard.commit(&mut fs).unwrap();

        let inode = fs.read_inode(ino).unwrap();
        assert_eq!(inode.kind(), InodeKind::File);
        assert_eq!(inode.filesize.get(), 77);
        assert_eq!(inode.ctime.get(), 1234);
    }

    #[test]
    fn discard_leaves_record_untouched() {
        let mut fs = Filesystem::format(MemStorage::new(512)).unwrap();
        let ino = fs.alloc_inode().unwrap();

        let mut guard = InodeGuard::load(&fs, ino).unwrap();
        *guard = Inode::new(InodeKind::File, 1);
        guard.commit(&mut fs).unwrap();

        let mut guard = InodeGuard::load(&fs, ino).unwrap();
        guard.filesize.set(999);
        guard.discard();

        assert_eq!(fs.read_inode(ino).unwrap().filesize.get(), 0);
    }

    #[test]
    fn inodes_in_distinct_table_slots() {
        let mut fs = Filesystem::format(MemStorage::new(512)).unwrap();
        let a = fs.alloc_inode().unwrap();
        let b = fs.alloc_inode().unwrap();

        let mut guard = InodeGuard::load(&fs, a).unwrap();
        *guard = Inode::new(InodeKind::File, 10);
        guard.commit(&mut fs).unwrap();

        let mut guard = InodeGuard::load(&fs, b).unwrap();
        *guard = Inode::new(InodeKind::Directory, 20);
        guard.commit(&mut fs).unwrap();

        assert_eq!(fs.read_inode(a).unwrap().ctime.get(), 10);
        assert_eq!(fs.read_inode(b).unwrap().ctime.get(), 20);
    }
}
