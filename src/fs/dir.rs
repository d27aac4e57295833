use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::U32,
};

use crate::{
    block::storage::Storage,
    fs::{
        Filesystem,
        error::Result,
        inode::InodeNo,
    },
};

/// Bytes per directory entry.
pub const DIR_ENTRY_SIZE: u32 = 32;

/// Capacity of the name field, including the terminating NUL.
pub const NAME_FIELD_LEN: usize = 28;

/// Longest leaf name the namespace layer accepts.
pub const NAME_MAX: usize = 24;

/// A fixed-size directory entry: an inode number and a NUL-terminated name.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DirEntry {
    pub ino: U32,
    name: [u8; NAME_FIELD_LEN],
}

impl DirEntry {
    /// Constructs an entry for `ino` named `name`.
    ///
    /// # Panics
    /// Panics if `name` does not leave room for the terminating NUL.
    pub fn new(ino: InodeNo, name: &str) -> Self {
        let mut entry = Self {
            ino: U32::new(ino),
            name: [0; NAME_FIELD_LEN],
        };
        entry.set_name(name);
        entry
    }

    /// The name bytes up to the terminating NUL.
    pub fn name(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_FIELD_LEN);
        &self.name[..end]
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name()).into_owned()
    }

    /// Byte-for-byte name comparison up to the NUL.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name() == name.as_bytes()
    }

    pub fn set_name(&mut self, name: &str) {
        assert!(name.len() < NAME_FIELD_LEN, "entry name too long");
        self.name.fill(0);
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }
}

/// A directory viewed through its inode: a file whose size is a whole
/// multiple of `DIR_ENTRY_SIZE`.
#[derive(Clone, Copy)]
pub struct Dir {
    ino: InodeNo,
}

impl Dir {
    pub fn new(ino: InodeNo) -> Self {
        Self { ino }
    }

    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    /// Number of entries.
    pub fn len<S: Storage>(&self, fs: &Filesystem<S>) -> Result<u32> {
        let inode = fs.read_inode(self.ino)?;
        Ok(inode.filesize.get() / DIR_ENTRY_SIZE)
    }

    /// Reads the entry at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn get<S: Storage>(&self, fs: &mut Filesystem<S>, index: u32) -> Result<DirEntry> {
        assert!(index < self.len(fs)?, "directory index out of range");
        let mut bytes = [0u8; DIR_ENTRY_SIZE as usize];
        fs.read_at(self.ino, (index * DIR_ENTRY_SIZE) as u64, &mut bytes)?;
        Ok(DirEntry::read_from_bytes(&bytes).expect("entry size matches"))
    }

    /// Overwrites the entry at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn set<S: Storage>(
        &self,
        fs: &mut Filesystem<S>,
        index: u32,
        entry: &DirEntry,
    ) -> Result<()> {
        assert!(index < self.len(fs)?, "directory index out of range");
        fs.write_at(self.ino, (index * DIR_ENTRY_SIZE) as u64, entry.as_bytes())?;
        Ok(())
    }

    /// Appends an entry, growing the directory by one slot. Nothing is
    /// appended if the grow fails.
    pub fn push<S: Storage>(&self, fs: &mut Filesystem<S>, entry: &DirEntry) -> Result<()> {
        let len = self.len(fs)?;
        fs.resize(self.ino, ((len + 1) * DIR_ENTRY_SIZE) as u64)?;
        self.set(fs, len, entry)
    }

    /// Removes the entry at `index` by moving the last entry over it and
    /// shrinking the directory by one slot.
    pub fn erase<S: Storage>(&self, fs: &mut Filesystem<S>, index: u32) -> Result<()> {
        let len = self.len(fs)?;
        let last = self.get(fs, len - 1)?;
        self.set(fs, index, &last)?;
        fs.resize(self.ino, ((len - 1) * DIR_ENTRY_SIZE) as u64)
    }

    /// Looks up `name`, returning the entry and its index.
    pub fn find<S: Storage>(
        &self,
        fs: &mut Filesystem<S>,
        name: &str,
    ) -> Result<Option<(u32, DirEntry)>> {
        for index in 0..self.len(fs)? {
            let entry = self.get(fs, index)?;
            if entry.name_matches(name) {
                return Ok(Some((index, entry)));
            }
        }
        Ok(None)
    }

    /// Reads all entries in storage order.
    pub fn entries<S: Storage>(&self, fs: &mut Filesystem<S>) -> Result<Vec<DirEntry>> {
        let len = self.len(fs)?;
        let mut entries = Vec::with_capacity(len as usize);
        for index in 0..len {
            entries.push(self.get(fs, index)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        block::storage::mem::MemStorage,
        fs::{
            now,
            inode::{Inode, InodeGuard, InodeKind},
        },
    };

    fn fresh_dir() -> (Filesystem<MemStorage>, Dir) {
        let mut fs = Filesystem::format(MemStorage::new(512)).unwrap();
        let ino = fs.alloc_inode().unwrap();
        let mut guard = InodeGuard::load(&fs, ino).unwrap();
        *guard = Inode::new(InodeKind::Directory, now());
        guard.commit(&mut fs).unwrap();
        (fs, Dir::new(ino))
    }

    #[test]
    fn entry_layout() {
        assert_eq!(size_of::<DirEntry>(), DIR_ENTRY_SIZE as usize);

        let entry = DirEntry::new(7, "hello");
        assert_eq!(entry.ino.get(), 7);
        assert_eq!(entry.name(), b"hello");
        assert!(entry.name_matches("hello"));
        assert!(!entry.name_matches("hell"));
        assert!(!entry.name_matches("hello!"));
    }

    #[test]
    fn push_and_find() {
        let (mut fs, dir) = fresh_dir();

        dir.push(&mut fs, &DirEntry::new(1, "a")).unwrap();
        dir.push(&mut fs, &DirEntry::new(2, "b")).unwrap();
        dir.push(&mut fs, &DirEntry::new(3, "c")).unwrap();
        assert_eq!(dir.len(&fs).unwrap(), 3);

        let (index, entry) = dir.find(&mut fs, "b").unwrap().unwrap();
        assert_eq!(index, 1);
        assert_eq!(entry.ino.get(), 2);
        assert!(dir.find(&mut fs, "d").unwrap().is_none());
    }

    #[test]
    fn erase_swaps_with_last() {
        let (mut fs, dir) = fresh_dir();

        dir.push(&mut fs, &DirEntry::new(1, "a")).unwrap();
        dir.push(&mut fs, &DirEntry::new(2, "b")).unwrap();
        dir.push(&mut fs, &DirEntry::new(3, "c")).unwrap();

        dir.erase(&mut fs, 0).unwrap();
        assert_eq!(dir.len(&fs).unwrap(), 2);
        assert_eq!(dir.get(&mut fs, 0).unwrap().name(), b"c");
        assert_eq!(dir.get(&mut fs, 1).unwrap().name(), b"b");
    }

    #[test]
    fn erase_last_entry() {
        let (mut fs, dir) = fresh_dir();

        dir.push(&mut fs, &DirEntry::new(1, "a")).unwrap();
        dir.push(&mut fs, &DirEntry::new(2, "b")).unwrap();

        dir.erase(&mut fs, 1).unwrap();
        assert_eq!(dir.len(&fs).unwrap(), 1);
        assert_eq!(dir.get(&mut fs, 0).unwrap().name(), b"a");
    }

    #[test]
    fn empty_directory_releases_blocks() {
        let (mut fs, dir) = fresh_dir();
        let baseline = fs.statfs().unwrap().data_block_num_free;

        dir.push(&mut fs, &DirEntry::new(1, "a")).unwrap();
        assert_eq!(fs.statfs().unwrap().data_block_num_free, baseline - 1);

        dir.erase(&mut fs, 0).unwrap();
        assert_eq!(dir.len(&fs).unwrap(), 0);
        assert_eq!(fs.statfs().unwrap().data_block_num_free, baseline);
    }

    #[test]
    #[should_panic(expected = "directory index out of range")]
    fn get_out_of_range_asserts() {
        let (mut fs, dir) = fresh_dir();
        let _ = dir.get(&mut fs, 0);
    }

    #[test]
    fn entries_span_multiple_blocks() {
        let (mut fs, dir) = fresh_dir();

        // 4096 / 32 = 128 entries per block; cross into a second block.
        for i in 0..200u32 {
            dir.push(&mut fs, &DirEntry::new(i, &format!("f{i}"))).unwrap();
        }

        let entries = dir.entries(&mut fs).unwrap();
        assert_eq!(entries.len(), 200);
        let (index, entry) = dir.find(&mut fs, "f150").unwrap().unwrap();
        assert_eq!(index, 150);
        assert_eq!(entry.ino.get(), 150);
    }
}
