//! Console terminal attached to the machine.
//!
//! The console device prints one word per request and reads one line per
//! request. [`StdConsole`] talks to the process's stdin/stdout;
//! [`BufferConsole`] scripts input and records output.

use std::collections::VecDeque;
use std::io::{self, Write};
use crate::word::{Word, WORD_SIZE};

/// Line-oriented terminal.
pub trait Console {
    /// Read one line, without its terminator.
    fn read_line(&mut self) -> io::Result<String>;

    /// Print one line.
    fn write_line(&mut self, text: &str) -> io::Result<()>;
}

/// Turn a line of input into a word, cutting it to the word's capacity.
pub fn line_to_word(line: &str) -> Word {
    let mut end = line.len().min(WORD_SIZE);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    Word::Text(line[..end].to_string())
}

/// Console on the process's standard streams.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", text)?;
        out.flush()
    }
}

/// Console with scripted input and captured output.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    input: VecDeque<String>,
    output: Vec<String>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a console that will answer reads with `lines` in order.
    pub fn with_input<I, T>(lines: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            output: Vec::new(),
        }
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }
}

impl Console for BufferConsole {
    fn read_line(&mut self) -> io::Result<String> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "console input exhausted"))
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.output.push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_to_word_truncates() {
        assert_eq!(line_to_word("short").as_string(), "short");
        assert_eq!(line_to_word("a line that is far too long").as_string(), "a line that is f");
        assert!(line_to_word("123").is_integer());
    }

    #[test]
    fn test_buffer_console() {
        let mut console = BufferConsole::with_input(["one", "two"]);
        assert_eq!(console.read_line().unwrap(), "one");
        assert_eq!(console.read_line().unwrap(), "two");
        assert!(console.read_line().is_err());

        console.write_line("out").unwrap();
        assert_eq!(console.output(), ["out".to_string()]);
    }
}
