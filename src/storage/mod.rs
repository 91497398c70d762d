//! Block storage behind the XSM disk.
//!
//! The disk is an array of blocks, each exactly one page of words. The
//! machine only talks to it through [`BlockStorage`]; two backends are
//! provided:
//! - [`MemoryDisk`] - blocks held in memory (tests, scratch disks)
//! - [`FileDisk`] - a flat disk image file

mod file;
mod memory;

pub use file::FileDisk;
pub use memory::MemoryDisk;

use thiserror::Error;
use crate::cpu::memory::PAGE_SIZE;
use crate::word::Word;

/// Number of blocks on a disk.
pub const NUM_BLOCKS: usize = 512;

/// Words per block (one page).
pub const BLOCK_SIZE: usize = PAGE_SIZE;

/// A block device the machine can load pages from and store pages to.
pub trait BlockStorage {
    /// Copy block `block` into `page`.
    fn read_block(&mut self, block: usize, page: &mut [Word]) -> Result<(), StorageError>;

    /// Copy `page` into block `block`.
    fn write_block(&mut self, block: usize, page: &[Word]) -> Result<(), StorageError>;

    /// Flush and release the backend.
    fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl<T: BlockStorage + ?Sized> BlockStorage for Box<T> {
    fn read_block(&mut self, block: usize, page: &mut [Word]) -> Result<(), StorageError> {
        (**self).read_block(block, page)
    }

    fn write_block(&mut self, block: usize, page: &[Word]) -> Result<(), StorageError> {
        (**self).write_block(block, page)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        (**self).close()
    }
}

fn check_block(block: usize, len: usize) -> Result<(), StorageError> {
    if block >= NUM_BLOCKS {
        return Err(StorageError::BlockOutOfRange(block));
    }
    if len != BLOCK_SIZE {
        return Err(StorageError::BadPageSize(len));
    }
    Ok(())
}

/// Errors that can occur during disk operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("block {0} out of range")]
    BlockOutOfRange(usize),

    #[error("page buffer has {0} words, expected one block")]
    BadPageSize(usize),

    #[error("block {block} word {index} is not valid text")]
    BadWord { block: usize, index: usize },

    #[error("disk image is {size} bytes, expected {expected}")]
    BadImage { size: u64, expected: u64 },
}
