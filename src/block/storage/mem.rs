use libc::EIO;

use crate::block::{
    Block, BlockNo,
    storage::{Result, Storage},
};

/// Fixed-capacity in-memory storage. Blocks read as zeros until written.
pub struct MemStorage {
    blocks: Vec<Block>,
}

impl MemStorage {
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![Block::default(); block_count as usize],
        }
    }
}

impl Storage for MemStorage {
    fn read_at(&self, block: &mut Block, blockno: BlockNo) -> Result<()> {
        *block = *self.blocks.get(blockno as usize).ok_or(EIO)?;
        Ok(())
    }

    fn write_at(&mut self, block: &Block, blockno: BlockNo) -> Result<()> {
        let slot = self.blocks.get_mut(blockno as usize).ok_or(EIO)?;
        *slot = *block;
        Ok(())
    }

    fn capacity(&self) -> Result<u32> {
        Ok(self.blocks.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut storage = MemStorage::new(4);

        let mut block = Block::default();
        block.data.fill(0xCD);
        storage.write_at(&block, 2).unwrap();

        let mut read_block = Block::default();
        storage.read_at(&mut read_block, 2).unwrap();
        assert_eq!(read_block.data, block.data);
    }

    #[test]
    fn reads_zeros_until_written() {
        let storage = MemStorage::new(4);
        let mut block = Block::new(b"junk");
        storage.read_at(&mut block, 0).unwrap();
        assert!(block.data.iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_fails() {
        let mut storage = MemStorage::new(4);
        let mut block = Block::default();
        assert!(storage.read_at(&mut block, 4).is_err());
        assert!(storage.write_at(&block, 4).is_err());
    }
}
