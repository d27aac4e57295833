use log::debug;

use crate::{
    block::storage::Storage,
    fs::{
        Attr, Filesystem,
        dir::{Dir, DirEntry, NAME_MAX},
        error::{Error, Result},
        inode::{Inode, InodeGuard, InodeKind, InodeNo, ROOT_INO},
        now,
    },
};

/// Splits a path on `/`, dropping empty components.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

/// Splits a path into its parent and leaf name.
fn split_leaf(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(at) => (&path[..at], &path[at + 1..]),
        None => ("", path),
    }
}

/// The namespace: walking paths from the root and creating, deleting and
/// renaming leaves. The path-shaped operations mirror what the user-space
/// filesystem shim dispatches; the `*_at` forms work relative to an already
/// resolved parent directory.
impl<S: Storage> Filesystem<S> {
    /// Walks `path` from the root, returning the inode number it names.
    pub fn resolve(&mut self, path: &str) -> Result<InodeNo> {
        let mut ino = ROOT_INO;
        for name in split_path(path) {
            if self.read_inode(ino)?.kind() != InodeKind::Directory {
                return Err(Error::NotFound);
            }
            ino = self.lookup_at(ino, name)?.ok_or(Error::NotFound)?;
        }
        Ok(ino)
    }

    /// Looks `name` up in the directory `parent`.
    pub fn lookup_at(&mut self, parent: InodeNo, name: &str) -> Result<Option<InodeNo>> {
        let found = Dir::new(parent).find(self, name)?;
        Ok(found.map(|(_, entry)| entry.ino.get()))
    }

    /// Creates a leaf named `name` under `parent`, returning its inode
    /// number. Creating a name that already exists is a no-op returning the
    /// existing inode.
    pub fn create_at(&mut self, parent: InodeNo, name: &str, kind: InodeKind) -> Result<InodeNo> {
        let dir = Dir::new(parent);
        if let Some((_, entry)) = dir.find(self, name)? {
            return Ok(entry.ino.get());
        }
        if name.is_empty() {
            return Err(Error::NotFound);
        }
        if name.len() > NAME_MAX {
            return Err(Error::NoSpace);
        }

        let ino = self.alloc_inode()?;
        let mut inode = InodeGuard::load(self, ino)?;
        *inode = Inode::new(kind, now());
        inode.commit(self)?;

        if let Err(err) = dir.push(self, &DirEntry::new(ino, name)) {
            self.free_inode(ino)?;
            return Err(err);
        }

        debug!("create {name:?} under inode {parent} -> inode {ino}");
        Ok(ino)
    }

    /// Deletes the leaf named `name` under `parent`, releasing its data
    /// and pointer blocks and its inode.
    pub fn remove_at(&mut self, parent: InodeNo, name: &str) -> Result<()> {
        let dir = Dir::new(parent);
        let (index, entry) = dir.find(self, name)?.ok_or(Error::NotFound)?;
        let ino = entry.ino.get();

        self.resize(ino, 0)?;
        dir.erase(self, index)?;
        self.free_inode(ino)?;

        debug!("remove {name:?} under inode {parent} (inode {ino})");
        Ok(())
    }

    /// Moves the entry `old_name` under `old_parent` to `new_name` under
    /// `new_parent`. The inode itself is untouched. Fails with `Exists` if
    /// the target name is taken; never overwrites.
    pub fn rename_at(
        &mut self,
        old_parent: InodeNo,
        old_name: &str,
        new_parent: InodeNo,
        new_name: &str,
    ) -> Result<()> {
        if new_name.len() > NAME_MAX {
            return Err(Error::NoSpace);
        }

        let old_dir = Dir::new(old_parent);
        let (index, mut entry) = old_dir.find(self, old_name)?.ok_or(Error::NotFound)?;
        if self.lookup_at(new_parent, new_name)?.is_some() {
            return Err(Error::Exists);
        }

        entry.set_name(new_name);
        if old_parent == new_parent {
            old_dir.set(self, index, &entry)?;
        } else {
            // Push into the new parent first; on failure the old entry is
            // untouched.
            Dir::new(new_parent).push(self, &entry)?;
            old_dir.erase(self, index)?;
        }
        Ok(())
    }

    /// Returns a file handle (the inode number) for `path`.
    pub fn open(&mut self, path: &str) -> Result<InodeNo> {
        self.resolve(path)
    }

    /// Returns a directory handle for `path`.
    pub fn opendir(&mut self, path: &str) -> Result<InodeNo> {
        self.resolve(path)
    }

    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        let ino = self.resolve(path)?;
        self.attr(ino)
    }

    /// Creates a regular file.
    pub fn mknod(&mut self, path: &str) -> Result<()> {
        let (parent_path, leaf) = split_leaf(path);
        let parent = self.resolve(parent_path)?;
        self.create_at(parent, leaf, InodeKind::File)?;
        Ok(())
    }

    /// Creates a directory.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (parent_path, leaf) = split_leaf(path);
        let parent = self.resolve(parent_path)?;
        self.create_at(parent, leaf, InodeKind::Directory)?;
        Ok(())
    }

    /// Deletes a file.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent_path, leaf) = split_leaf(path);
        let parent = self.resolve(parent_path)?;
        self.remove_at(parent, leaf)
    }

    /// Deletes a directory. Emptiness is not checked; entries of a removed
    /// directory become unreachable.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.unlink(path)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let (old_parent_path, old_leaf) = split_leaf(old);
        let (new_parent_path, new_leaf) = split_leaf(new);

        if new_leaf.len() > NAME_MAX {
            return Err(Error::NoSpace);
        }

        let old_parent = self.resolve(old_parent_path)?;
        let new_parent = self.resolve(new_parent_path)?;
        self.rename_at(old_parent, old_leaf, new_parent, new_leaf)
    }

    /// Reads from an open file handle.
    pub fn read(&mut self, fh: InodeNo, offset: u64, buf: &mut [u8]) -> Result<u64> {
        self.read_at(fh, offset, buf)
    }

    /// Writes to an open file handle, growing the file to `offset +
    /// buf.len()` first if necessary. If the grow fails, no byte is
    /// written.
    pub fn write(&mut self, fh: InodeNo, offset: u64, buf: &[u8]) -> Result<u64> {
        let filesize = self.read_inode(fh)?.filesize.get() as u64;
        let end = offset + buf.len() as u64;
        if end > filesize {
            self.resize(fh, end)?;
        }
        self.write_at(fh, offset, buf)
    }

    /// Grows or shrinks the file at `path` to `size` bytes.
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let ino = self.resolve(path)?;
        self.resize(ino, size)
    }

    /// Sets access and modification times; the change time becomes now.
    pub fn utime(&mut self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        let ino = self.resolve(path)?;
        self.set_times(ino, atime, mtime)
    }

    /// The inode-addressed form of [`utime`](Self::utime).
    pub fn set_times(&mut self, ino: InodeNo, atime: u32, mtime: u32) -> Result<()> {
        let mut inode = InodeGuard::load(self, ino)?;
        inode.atime.set(atime);
        inode.mtime.set(mtime);
        inode.ctime.set(now());
        inode.commit(self)
    }

    /// Lists a directory given its file handle.
    pub fn read_dir(&mut self, fh: InodeNo) -> Result<Vec<DirEntry>> {
        Dir::new(fh).entries(self)
    }
}
