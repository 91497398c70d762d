//! TUI debugger for the XSM emulator.
//!
//! Provides a full-screen debugger hook with:
//! - Register file view
//! - Memory page view
//! - Disassembly around IP
//! - Step/continue/halt controls

mod app;
mod ui;

pub use app::{DebuggerApp, TuiDebugger};
