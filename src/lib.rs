//! # XSM Emulator
//!
//! An emulator of the XSM teaching machine.
//!
//! XSM is a small word-addressed computer built for operating systems
//! courses: words hold short strings or integers, memory is paged behind a
//! single-level MMU, and a kernel/user privilege split guards the disk and
//! console, which complete asynchronously and report back by interrupt.

pub mod word;
pub mod cpu;
pub mod storage;
pub mod console;
pub mod image;
pub mod debugger;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use word::{Word, WordError, WordKind};
pub use cpu::{Machine, MachineError, MachineState, Mode, Options, Fault, Step, Memory, Registers, Instruction};
pub use storage::{BlockStorage, FileDisk, MemoryDisk, StorageError};
pub use console::{BufferConsole, Console, StdConsole};
pub use image::{disassemble, load_listing, Listing, ListingError};
pub use debugger::ConsoleDebugger;

#[cfg(feature = "tui")]
pub use tui::TuiDebugger;
