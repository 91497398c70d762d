//! CPU emulation for the XSM machine.
//!
//! This module implements the complete XSM architecture:
//! - 33 word registers, including the page table and exception registers
//! - 64K words of memory in 512-word pages behind a single-level MMU
//! - 35 instructions across a kernel/user privilege split
//! - interrupt-driven disk and console devices ticked once per instruction

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod interrupt;
pub mod device;
pub mod config;
pub mod debug;

pub use memory::{Memory, MemoryError, PageTable, PAGE_SIZE};
pub use registers::{RegId, Registers};
pub use decode::{Instruction, DecodeError};
pub use execute::{Fault, Machine, MachineError, MachineState, Mode, Snapshot, Step};
pub use config::{ConfigError, Options};
pub use debug::{DebugHook, MachineView, NoDebugger, Resume};
