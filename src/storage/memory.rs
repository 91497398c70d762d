//! In-memory disk.

use super::{check_block, BlockStorage, StorageError, BLOCK_SIZE, NUM_BLOCKS};
use crate::word::Word;

/// A disk whose blocks live in memory.
#[derive(Debug, Clone)]
pub struct MemoryDisk {
    blocks: Vec<Vec<Word>>,
}

impl MemoryDisk {
    /// Create a blank disk.
    pub fn new() -> Self {
        Self {
            blocks: vec![vec![Word::empty(); BLOCK_SIZE]; NUM_BLOCKS],
        }
    }

    /// The words of a block.
    pub fn block(&self, block: usize) -> Option<&[Word]> {
        self.blocks.get(block).map(Vec::as_slice)
    }

    /// Write words at the start of a block, leaving the rest untouched.
    pub fn fill_block(&mut self, block: usize, words: &[Word]) -> Result<(), StorageError> {
        if block >= NUM_BLOCKS {
            return Err(StorageError::BlockOutOfRange(block));
        }
        if words.len() > BLOCK_SIZE {
            return Err(StorageError::BadPageSize(words.len()));
        }
        self.blocks[block][..words.len()].clone_from_slice(words);
        Ok(())
    }
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStorage for MemoryDisk {
    fn read_block(&mut self, block: usize, page: &mut [Word]) -> Result<(), StorageError> {
        check_block(block, page.len())?;
        page.clone_from_slice(&self.blocks[block]);
        Ok(())
    }

    fn write_block(&mut self, block: usize, page: &[Word]) -> Result<(), StorageError> {
        check_block(block, page.len())?;
        self.blocks[block].clone_from_slice(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut disk = MemoryDisk::new();
        let mut page = vec![Word::empty(); BLOCK_SIZE];
        page[0] = Word::from(7);
        page[BLOCK_SIZE - 1] = Word::from_text("last").unwrap();

        disk.write_block(3, &page).unwrap();

        let mut back = vec![Word::empty(); BLOCK_SIZE];
        disk.read_block(3, &mut back).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_bounds() {
        let mut disk = MemoryDisk::new();
        let mut page = vec![Word::empty(); BLOCK_SIZE];
        assert_eq!(
            disk.read_block(NUM_BLOCKS, &mut page).unwrap_err(),
            StorageError::BlockOutOfRange(NUM_BLOCKS)
        );
        let mut short = vec![Word::empty(); 3];
        assert_eq!(disk.read_block(0, &mut short).unwrap_err(), StorageError::BadPageSize(3));
    }

    #[test]
    fn test_fill_block() {
        let mut disk = MemoryDisk::new();
        disk.fill_block(1, &[Word::from(1), Word::from(2)]).unwrap();
        let block = disk.block(1).unwrap();
        assert_eq!(block[1].as_integer(), 2);
        assert!(block[2].is_empty());
    }
}
