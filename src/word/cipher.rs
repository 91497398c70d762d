//! Word scrambling for the `ENCRYPT` instruction.
//!
//! This is a reversible substitution, not cryptography: digits rotate by
//! three within `0-9` and letters rotate by thirteen within their case. Every
//! other byte is left alone, so integers stay integers and the text length
//! never changes.

use super::Word;

const DIGIT_SHIFT: u8 = 3;
const LETTER_SHIFT: u8 = 13;

/// Scramble a word in place.
pub fn encrypt(word: &mut Word) {
    let scrambled: String = word.as_string().chars().map(scramble_char).collect();
    // Same length as the input, so the store cannot overflow.
    *word = Word::Text(scrambled);
}

/// Undo [`encrypt`].
pub fn decrypt(word: &mut Word) {
    let restored: String = word.as_string().chars().map(unscramble_char).collect();
    *word = Word::Text(restored);
}

fn scramble_char(c: char) -> char {
    rotate(c, DIGIT_SHIFT, LETTER_SHIFT)
}

fn unscramble_char(c: char) -> char {
    rotate(c, 10 - DIGIT_SHIFT, 26 - LETTER_SHIFT)
}

fn rotate(c: char, digit_shift: u8, letter_shift: u8) -> char {
    match c {
        '0'..='9' => (b'0' + (c as u8 - b'0' + digit_shift) % 10) as char,
        'a'..='z' => (b'a' + (c as u8 - b'a' + letter_shift) % 26) as char,
        'A'..='Z' => (b'A' + (c as u8 - b'A' + letter_shift) % 26) as char,
        _ => c,
    }
}
