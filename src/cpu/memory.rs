//! XSM memory and paging hardware.
//!
//! Physical memory is a flat array of 65536 words organized as 128 pages of
//! 512 words. User-mode addresses are translated through a page table of
//! two-word entries: the physical frame number followed by a flags string
//! whose second character is the valid bit and third character the write bit.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::word::Word;

/// Words per page.
pub const PAGE_SIZE: usize = 512;

/// Number of physical pages.
pub const NUM_PAGES: usize = 128;

/// Total number of words.
pub const MEMORY_SIZE: usize = PAGE_SIZE * NUM_PAGES;

/// Words per page table entry.
pub const PTE_SIZE: usize = 2;

const VALID_BIT: usize = 1;
const WRITE_BIT: usize = 2;

/// The active address space, as held in PTBR and PTLR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTable {
    /// Physical address of the first entry.
    pub base: i64,
    /// Number of entries.
    pub length: i64,
}

/// A decoded page table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub frame: i64,
    pub flags: String,
}

impl PageEntry {
    pub fn is_valid(&self) -> bool {
        self.flag(VALID_BIT)
    }

    pub fn is_writable(&self) -> bool {
        self.flag(WRITE_BIT)
    }

    fn flag(&self, index: usize) -> bool {
        self.flags.as_bytes().get(index) == Some(&b'1')
    }
}

/// XSM physical memory.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    words: Vec<Word>,
}

impl Memory {
    /// Create a new memory with all words empty.
    pub fn new() -> Self {
        Self {
            words: vec![Word::empty(); MEMORY_SIZE],
        }
    }

    /// Clear all memory.
    pub fn clear(&mut self) {
        for word in &mut self.words {
            *word = Word::empty();
        }
    }

    /// Check whether `addr` names a physical word.
    #[inline]
    pub fn is_valid_address(addr: i64) -> bool {
        (0..MEMORY_SIZE as i64).contains(&addr)
    }

    fn index(addr: i64) -> Result<usize, MemoryError> {
        if Self::is_valid_address(addr) {
            Ok(addr as usize)
        } else {
            Err(MemoryError::OutOfRange(addr))
        }
    }

    /// Read a word by physical address.
    pub fn get_word(&self, addr: i64) -> Result<&Word, MemoryError> {
        Ok(&self.words[Self::index(addr)?])
    }

    /// Mutable access to a word by physical address.
    pub fn get_word_mut(&mut self, addr: i64) -> Result<&mut Word, MemoryError> {
        Ok(&mut self.words[Self::index(addr)?])
    }

    /// The words of a physical page.
    pub fn get_page(&self, page: usize) -> Result<&[Word], MemoryError> {
        let start = Self::page_start(page)?;
        Ok(&self.words[start..start + PAGE_SIZE])
    }

    /// Mutable access to the words of a physical page.
    pub fn get_page_mut(&mut self, page: usize) -> Result<&mut [Word], MemoryError> {
        let start = Self::page_start(page)?;
        Ok(&mut self.words[start..start + PAGE_SIZE])
    }

    fn page_start(page: usize) -> Result<usize, MemoryError> {
        if page >= NUM_PAGES {
            return Err(MemoryError::PageOutOfRange(page));
        }
        Ok(page * PAGE_SIZE)
    }

    /// Write a run of words starting at a physical address.
    pub fn load_words(&mut self, start: i64, words: &[Word]) -> Result<(), MemoryError> {
        let first = Self::index(start)?;
        let end = first + words.len();
        if end > MEMORY_SIZE {
            return Err(MemoryError::OutOfRange(end as i64 - 1));
        }
        self.words[first..end].clone_from_slice(words);
        Ok(())
    }

    // ==================================================================
    // Paging hardware
    // ==================================================================

    /// Read the entry for virtual page `page` of a page table.
    pub fn page_entry(&self, table: PageTable, page: i64) -> Result<PageEntry, MemoryError> {
        if page < 0 || page >= table.length {
            return Err(MemoryError::PageFault { page });
        }

        let entry_addr = table.base + page * PTE_SIZE as i64;
        let frame = self.get_word(entry_addr)?.as_integer();
        let flags = self.get_word(entry_addr + 1)?.as_string();

        Ok(PageEntry { frame, flags })
    }

    /// Translate a virtual address to a physical one.
    pub fn translate(&self, table: PageTable, vaddr: i64, for_write: bool) -> Result<i64, MemoryError> {
        if vaddr < 0 {
            return Err(MemoryError::OutOfRange(vaddr));
        }

        let page_size = PAGE_SIZE as i64;
        let page = vaddr / page_size;
        let offset = vaddr % page_size;

        let entry = self.page_entry(table, page)?;
        if !entry.is_valid() {
            return Err(MemoryError::PageFault { page });
        }
        if for_write && !entry.is_writable() {
            return Err(MemoryError::ProtectionFault { page, addr: vaddr });
        }

        let physical = entry.frame * page_size + offset;
        if !Self::is_valid_address(physical) {
            return Err(MemoryError::OutOfRange(physical));
        }
        Ok(physical)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.words.iter().filter(|word| !word.is_empty()).count();

        f.debug_struct("Memory")
            .field("used_words", &used)
            .field("total_words", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address is outside physical memory.
    #[error("address {0} out of range")]
    OutOfRange(i64),

    /// Page index is outside physical memory.
    #[error("page {0} out of range")]
    PageOutOfRange(usize),

    /// Page is beyond PTLR or marked invalid.
    #[error("page fault on virtual page {page}")]
    PageFault { page: i64 },

    /// Write through a read-only entry.
    #[error("write to read-only page {page} at address {addr}")]
    ProtectionFault { page: i64, addr: i64 },
}
