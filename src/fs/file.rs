use crate::{
    block::{BLOCK_SIZE, Block, storage::Storage},
    fs::{
        Filesystem,
        error::Result,
        guard::BlockGuard,
        inode::{InodeGuard, InodeNo},
        now,
    },
};

/// Byte-granular I/O over the extent engine. Offsets and lengths are
/// clamped to the current file size; growing is the caller's business.
impl<S: Storage> Filesystem<S> {
    /// Reads up to `buf.len()` bytes at `offset`, returning how many were
    /// copied. Updates the inode's access time.
    pub fn read_at(&mut self, ino: InodeNo, offset: u64, buf: &mut [u8]) -> Result<u64> {
        let mut inode = InodeGuard::load(self, ino)?;
        inode.atime.set(now());
        let record = *inode;
        inode.commit(self)?;

        let filesize = record.filesize.get() as u64;
        let end = filesize.min(offset + buf.len() as u64);
        if end <= offset {
            return Ok(0);
        }

        let total = end - offset;
        let mut offset = offset;
        let mut out = &mut buf[..total as usize];

        while !out.is_empty() {
            let k = (offset / BLOCK_SIZE as u64) as u32;
            let in_block = (offset % BLOCK_SIZE as u64) as usize;
            let chunk = out.len().min(BLOCK_SIZE as usize - in_block);

            let blockno = self.locate(&record, k)?;
            let block = BlockGuard::<Block>::peek(&self.storage, blockno)?;

            let (dst, rest) = out.split_at_mut(chunk);
            dst.copy_from_slice(&block.data[in_block..in_block + chunk]);

            out = rest;
            offset += chunk as u64;
        }

        Ok(total)
    }

    /// Writes up to `buf.len()` bytes at `offset`, clamped to the current
    /// file size; nothing past end-of-file is written. Returns how many
    /// bytes were stored. Updates the inode's modification time.
    pub fn write_at(&mut self, ino: InodeNo, offset: u64, buf: &[u8]) -> Result<u64> {
        let mut inode = InodeGuard::load(self, ino)?;
        inode.mtime.set(now());
        let record = *inode;
        inode.commit(self)?;

        let filesize = record.filesize.get() as u64;
        let end = filesize.min(offset + buf.len() as u64);
        if end <= offset {
            return Ok(0);
        }

        let total = end - offset;
        let mut offset = offset;
        let mut input = &buf[..total as usize];

        while !input.is_empty() {
            let k = (offset / BLOCK_SIZE as u64) as u32;
            let in_block = (offset % BLOCK_SIZE as u64) as usize;
            let chunk = input.len().min(BLOCK_SIZE as usize - in_block);

            let blockno = self.locate(&record, k)?;
            let mut block = BlockGuard::<Block>::load(&self.storage, blockno)?;

            let (src, rest) = input.split_at(chunk);
            block.data[in_block..in_block + chunk].copy_from_slice(src);
            block.commit(&mut self.storage)?;

            input = rest;
            offset += chunk as u64;
        }

        Ok(total)
    }
}
