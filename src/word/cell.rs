//! Fixed-capacity machine words.
//!
//! A word holds either an integer or a short piece of text. The machine never
//! stores a type tag: whether a word is an integer is decided by looking at its
//! text, so `"42"` stored as a string behaves exactly like the integer 42.

use std::cmp::Ordering;
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Capacity of a word in bytes of text.
pub const WORD_SIZE: usize = 16;

/// Syntactic classification of a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordKind {
    /// Optional sign followed by digits only.
    Integer,
    /// Anything else.
    String,
}

/// A single machine word.
///
/// Integers written by the machine are kept as `Int`; everything else,
/// including numeric-looking text stored as a string, is kept as `Text`.
/// Both variants obey the same observable rules.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Word {
    Int(i64),
    Text(String),
}

impl Word {
    /// The empty word. Classifies as an integer with value 0.
    #[inline]
    pub const fn empty() -> Self {
        Word::Text(String::new())
    }

    /// Create an integer word, failing if its rendering does not fit.
    pub fn from_int(value: i64) -> Result<Self, WordError> {
        let mut word = Word::empty();
        word.store_integer(value)?;
        Ok(word)
    }

    /// Create a string word, failing if the text does not fit.
    pub fn from_text(text: &str) -> Result<Self, WordError> {
        let mut word = Word::empty();
        word.store_string(text)?;
        Ok(word)
    }

    /// Classify the word by the shape of its text.
    pub fn classify(&self) -> WordKind {
        match self {
            Word::Int(_) => WordKind::Integer,
            Word::Text(text) => classify_text(text),
        }
    }

    /// Check whether the word reads as an integer.
    #[inline]
    pub fn is_integer(&self) -> bool {
        self.classify() == WordKind::Integer
    }

    /// Integer value of the word.
    ///
    /// Text is parsed permissively: leading whitespace, an optional sign and
    /// the longest run of digits. Text without such a prefix reads as 0.
    pub fn as_integer(&self) -> i64 {
        match self {
            Word::Int(value) => *value,
            Word::Text(text) => parse_prefix(text),
        }
    }

    /// Text rendering of the word.
    pub fn as_string(&self) -> String {
        match self {
            Word::Int(value) => value.to_string(),
            Word::Text(text) => text.clone(),
        }
    }

    /// Overwrite the word with an integer.
    pub fn store_integer(&mut self, value: i64) -> Result<(), WordError> {
        let len = rendered_len(value);
        if len > WORD_SIZE {
            return Err(WordError::IntegerOverflow(value));
        }
        *self = Word::Int(value);
        Ok(())
    }

    /// Overwrite the word with a string.
    pub fn store_string(&mut self, text: &str) -> Result<(), WordError> {
        if text.len() > WORD_SIZE {
            return Err(WordError::StringOverflow {
                len: text.len(),
            });
        }
        *self = Word::Text(text.to_string());
        Ok(())
    }

    /// Copy another word's value into this one.
    #[inline]
    pub fn copy_from(&mut self, other: &Word) {
        self.clone_from(other);
    }

    /// Check whether the word holds no text at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, Word::Text(text) if text.is_empty())
    }

    /// Character at `index` of the word's text, if any.
    pub fn char_at(&self, index: usize) -> Option<char> {
        match self {
            Word::Int(value) => value.to_string().chars().nth(index),
            Word::Text(text) => text.chars().nth(index),
        }
    }

    /// Compare two words the way the comparison instructions do.
    ///
    /// Two string words compare by their text; any other pairing compares by
    /// integer value.
    pub fn compare(&self, other: &Word) -> Ordering {
        match (self.classify(), other.classify()) {
            (WordKind::String, WordKind::String) => self.as_string().cmp(&other.as_string()),
            _ => self.as_integer().cmp(&other.as_integer()),
        }
    }
}

impl Default for Word {
    fn default() -> Self {
        Word::empty()
    }
}

impl PartialEq for Word {
    /// Words are equal when their text is equal.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Word::Int(a), Word::Int(b)) => a == b,
            _ => self.as_string() == other.as_string(),
        }
    }
}

impl Eq for Word {}

impl From<i32> for Word {
    fn from(value: i32) -> Self {
        Word::Int(i64::from(value))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Int(value) => write!(f, "{}", value),
            Word::Text(text) => write!(f, "{}", text),
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Int(value) => write!(f, "{}", value),
            Word::Text(text) => write!(f, "{:?}", text),
        }
    }
}

fn classify_text(text: &str) -> WordKind {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        WordKind::Integer
    } else {
        WordKind::String
    }
}

fn parse_prefix(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for b in rest.bytes().take_while(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    if negative { -value } else { value }
}

fn rendered_len(value: i64) -> usize {
    let sign = usize::from(value < 0);
    let mut magnitude = value.unsigned_abs();
    let mut digits = 1;
    while magnitude >= 10 {
        magnitude /= 10;
        digits += 1;
    }
    sign + digits
}

/// Errors raised when a value does not fit in a word.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordError {
    #[error("integer {0} does not fit in a word")]
    IntegerOverflow(i64),

    #[error("string of {len} bytes does not fit in a word")]
    StringOverflow { len: usize },
}
