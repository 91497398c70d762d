//! XSM register file.
//!
//! The machine has 33 word-sized registers:
//! - R0-R19: general purpose
//! - P0-P3: port registers used by the console
//! - BP, SP: base and stack pointers (SP is a virtual address in user mode)
//! - IP: physical address of the next instruction
//! - PTBR, PTLR: page table base and length
//! - EIP, EC, EPN, EMA: exception information

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::word::{Word, WordError};

/// Number of registers in the file.
pub const NUM_REG: usize = 33;

/// Number of general purpose registers.
pub const NUM_GENERAL: usize = 20;

const NAMES: [&str; NUM_REG] = [
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9",
    "R10", "R11", "R12", "R13", "R14", "R15", "R16", "R17", "R18", "R19",
    "P0", "P1", "P2", "P3",
    "BP", "SP", "IP", "PTBR", "PTLR",
    "EIP", "EC", "EPN", "EMA",
];

/// Identity of a register, an index into the file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegId(u8);

impl RegId {
    pub const P0: RegId = RegId(20);
    pub const P1: RegId = RegId(21);
    pub const P2: RegId = RegId(22);
    pub const P3: RegId = RegId(23);
    pub const BP: RegId = RegId(24);
    pub const SP: RegId = RegId(25);
    pub const IP: RegId = RegId(26);
    pub const PTBR: RegId = RegId(27);
    pub const PTLR: RegId = RegId(28);
    pub const EIP: RegId = RegId(29);
    pub const EC: RegId = RegId(30);
    pub const EPN: RegId = RegId(31);
    pub const EMA: RegId = RegId(32);

    /// General purpose register `Rn`.
    ///
    /// # Panics
    /// Panics if `n` is not in `0..20`.
    pub fn general(n: usize) -> Self {
        assert!(n < NUM_GENERAL, "no general purpose register R{}", n);
        RegId(n as u8)
    }

    /// Look a register up by name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .map(|index| RegId(index as u8))
    }

    /// Canonical name of the register.
    pub fn name(self) -> &'static str {
        NAMES[self.0 as usize]
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Check whether this is one of R0-R19.
    pub fn is_general(self) -> bool {
        self.index() < NUM_GENERAL
    }

    /// Check whether this is one of P0-P3.
    pub fn is_port(self) -> bool {
        (Self::P0.0..=Self::P3.0).contains(&self.0)
    }

    /// Check whether user-mode code may name this register.
    pub fn user_accessible(self) -> bool {
        self.is_general() || self == Self::BP || self == Self::SP
    }
}

impl fmt::Debug for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The XSM register file.
#[derive(Clone, Serialize, Deserialize)]
pub struct Registers {
    words: Vec<Word>,
    zero: Word,
}

impl Registers {
    /// Create a new register file with all registers empty.
    pub fn new() -> Self {
        Self {
            words: vec![Word::empty(); NUM_REG],
            zero: Word::Int(0),
        }
    }

    /// Reset all registers to empty.
    pub fn reset(&mut self) {
        for word in &mut self.words {
            *word = Word::empty();
        }
    }

    /// Register names in file order.
    pub fn names() -> &'static [&'static str] {
        &NAMES
    }

    /// The constant-zero register.
    pub fn zero(&self) -> &Word {
        &self.zero
    }

    // ------------------------------------------------------------------
    // Access by name
    // ------------------------------------------------------------------

    pub fn get(&self, name: &str) -> Result<&Word, RegisterError> {
        let id = Self::lookup(name)?;
        Ok(self.word(id))
    }

    pub fn get_integer(&self, name: &str) -> Result<i64, RegisterError> {
        Ok(self.get(name)?.as_integer())
    }

    pub fn get_string(&self, name: &str) -> Result<String, RegisterError> {
        Ok(self.get(name)?.as_string())
    }

    pub fn set_integer(&mut self, name: &str, value: i64) -> Result<(), RegisterError> {
        let id = Self::lookup(name)?;
        self.set_int(id, value)?;
        Ok(())
    }

    pub fn set_string(&mut self, name: &str, text: &str) -> Result<(), RegisterError> {
        let id = Self::lookup(name)?;
        self.words[id.index()].store_string(text)?;
        Ok(())
    }

    fn lookup(name: &str) -> Result<RegId, RegisterError> {
        RegId::parse(name).ok_or_else(|| RegisterError::Unknown(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Access by identity
    // ------------------------------------------------------------------

    #[inline]
    pub fn word(&self, id: RegId) -> &Word {
        &self.words[id.index()]
    }

    #[inline]
    pub fn word_mut(&mut self, id: RegId) -> &mut Word {
        &mut self.words[id.index()]
    }

    /// Integer value of a register.
    #[inline]
    pub fn int(&self, id: RegId) -> i64 {
        self.word(id).as_integer()
    }

    /// Store an integer into a register.
    pub fn set_int(&mut self, id: RegId, value: i64) -> Result<(), WordError> {
        self.words[id.index()].store_integer(value)
    }

    /// Copy a word into a register.
    pub fn set_word(&mut self, id: RegId, value: &Word) {
        self.words[id.index()].copy_from(value);
    }

    /// Iterate over `(name, value)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Word)> {
        NAMES.iter().copied().zip(self.words.iter())
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, word) in self.iter().filter(|(_, word)| !word.is_empty()) {
            map.entry(&name, word);
        }
        map.finish()
    }
}

/// Errors raised by name-based register access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("unknown register {0:?}")]
    Unknown(String),

    #[error(transparent)]
    Word(#[from] WordError),
}
