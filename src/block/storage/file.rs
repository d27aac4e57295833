use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
};

use libc::EIO;

use crate::block::{
    BLOCK_SIZE, Block, BlockNo,
    storage::{Result, Storage},
};

/// Storage that uses a regular file as the block device.
pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Opens a file to be used as `FileStorage`.
    /// If the file's size is not a multiple of `BLOCK_SIZE` the remaining
    /// bytes are not addressable.
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .into_errno()?;
        Ok(Self { file })
    }

    /// Creates a file to be used as `FileStorage`.
    /// The file's size is `block_count * BLOCK_SIZE` bytes.
    pub fn create(path: &str, block_count: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .into_errno()?;
        file.set_len(block_count as u64 * BLOCK_SIZE as u64)
            .into_errno()?;
        Ok(Self { file })
    }
}

impl Storage for FileStorage {
    fn read_at(&self, block: &mut Block, blockno: BlockNo) -> Result<()> {
        self.file
            .read_at(&mut block.data, blockno as u64 * BLOCK_SIZE as u64)
            .into_errno()
            .and_then(|b| {
                if b != BLOCK_SIZE as usize {
                    Err(EIO)
                } else {
                    Ok(())
                }
            })
    }

    fn write_at(&mut self, block: &Block, blockno: BlockNo) -> Result<()> {
        self.file
            .write_at(&block.data, blockno as u64 * BLOCK_SIZE as u64)
            .into_errno()
            .and_then(|b| {
                if b != BLOCK_SIZE as usize {
                    Err(EIO)
                } else {
                    Ok(())
                }
            })
    }

    fn capacity(&self) -> Result<u32> {
        let size = self.file.metadata().into_errno()?.len();
        Ok((size / BLOCK_SIZE as u64) as u32)
    }
}

trait IntoErrno {
    type T;

    fn into_errno(self) -> Result<Self::T>;
}

impl<T> IntoErrno for io::Result<T> {
    type T = T;

    fn into_errno(self) -> Result<Self::T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.raw_os_error().unwrap_or(EIO)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let path = path.to_str().unwrap();

        let mut storage = FileStorage::create(path, 8).unwrap();
        assert_eq!(storage.capacity().unwrap(), 8);

        let mut block = Block::default();
        block.data.fill(0xAB);
        storage.write_at(&block, 3).unwrap();

        let mut read_block = Block::default();
        storage.read_at(&mut read_block, 3).unwrap();
        assert_eq!(read_block.data, block.data);
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let path = path.to_str().unwrap();

        let mut block = Block::default();
        block.data.fill(0x5C);
        {
            let mut storage = FileStorage::create(path, 4).unwrap();
            storage.write_at(&block, 1).unwrap();
        }

        let storage = FileStorage::open(path).unwrap();
        let mut read_block = Block::default();
        storage.read_at(&mut read_block, 1).unwrap();
        assert_eq!(read_block.data, block.data);
    }

    #[test]
    fn open_missing_fails() {
        assert!(FileStorage::open("/nonexistent/oxfs-disk.img").is_err());
    }
}
