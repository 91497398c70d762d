//! Debugger application state and logic.

use std::io::{self, Stdout};
use std::time::Duration;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use crate::cpu::debug::{DebugHook, MachineView, Resume};
use crate::cpu::decode::INSTRUCTION_SIZE;
use crate::cpu::memory::{NUM_PAGES, PAGE_SIZE};
use crate::image::disassemble_slot;

/// Debugger view state, kept across pauses.
pub struct DebuggerApp {
    /// Status message to display.
    pub status: String,
    /// Physical page shown in the memory view.
    pub mem_page: usize,
    /// Memory view scroll offset within the page.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    pub fn new() -> Self {
        Self {
            status: "Paused. Press 's' to step, 'c' to continue, 'q' to halt.".into(),
            mem_page: 0,
            mem_scroll: 0,
        }
    }

    /// Show the page holding the next instruction.
    pub fn follow(&mut self, view: &MachineView<'_>) {
        let ip = view.ip();
        if ip >= 0 {
            let page = ip as usize / PAGE_SIZE;
            if page != self.mem_page && page < NUM_PAGES {
                self.mem_page = page;
                self.mem_scroll = 0;
            }
        }
        self.status = format!("IP={} ({:?}): {}", ip, view.mode(), view.next_instruction());
    }

    /// Handle a key press. Returns a decision once the user leaves the pause.
    pub fn handle_key(&mut self, code: KeyCode) -> Option<Resume> {
        match code {
            KeyCode::Char('s') => return Some(Resume::Step),
            KeyCode::Char('c') => return Some(Resume::Continue),
            KeyCode::Char('q') => return Some(Resume::Halt),
            KeyCode::Up => self.mem_scroll = self.mem_scroll.saturating_sub(1),
            KeyCode::Down => {
                if self.mem_scroll + 1 < PAGE_SIZE {
                    self.mem_scroll += 1;
                }
            }
            KeyCode::PageUp => {
                self.mem_page = self.mem_page.saturating_sub(1);
                self.mem_scroll = 0;
            }
            KeyCode::PageDown => {
                if self.mem_page + 1 < NUM_PAGES {
                    self.mem_page += 1;
                    self.mem_scroll = 0;
                }
            }
            _ => {}
        }
        None
    }

    /// Get disassembly around the current IP.
    pub fn get_disassembly(&self, view: &MachineView<'_>, lines: usize) -> Vec<(i64, String, bool)> {
        let ip = view.ip();
        let step = INSTRUCTION_SIZE as i64;
        let start = (ip - (lines as i64 / 2) * step).max(0);

        (0..lines as i64)
            .filter_map(|i| {
                let addr = start + i * step;
                let first = view.word(addr)?;
                let second = view.word(addr + 1)?;
                Some((addr, disassemble_slot(first, second), addr == ip))
            })
            .collect()
    }
}

impl Default for DebuggerApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Full-screen debugger on the terminal.
///
/// The terminal is taken over on the first pause and given back when the
/// machine continues or halts.
pub struct TuiDebugger {
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
    app: DebuggerApp,
}

impl TuiDebugger {
    pub fn new() -> Self {
        Self { terminal: None, app: DebuggerApp::new() }
    }

    fn session(&mut self, view: &MachineView<'_>) -> io::Result<Resume> {
        if self.terminal.is_none() {
            enable_raw_mode()?;
            io::stdout().execute(EnterAlternateScreen)?;
            self.terminal = Some(Terminal::new(CrosstermBackend::new(io::stdout()))?);
        }
        self.app.follow(view);

        loop {
            if let Some(terminal) = self.terminal.as_mut() {
                let app = &self.app;
                terminal.draw(|frame| super::ui::draw(frame, app, view))?;
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(resume) = self.app.handle_key(key.code) {
                            return Ok(resume);
                        }
                    }
                }
            }
        }
    }

    fn restore(&mut self) -> io::Result<()> {
        if self.terminal.take().is_some() {
            disable_raw_mode()?;
            io::stdout().execute(LeaveAlternateScreen)?;
        }
        Ok(())
    }
}

impl Default for TuiDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugHook for TuiDebugger {
    fn pause(&mut self, view: &MachineView<'_>) -> Resume {
        let resume = match self.session(view) {
            Ok(resume) => resume,
            Err(e) => {
                log::error!("debugger terminal error: {}", e);
                Resume::Halt
            }
        };
        if resume != Resume::Step {
            if let Err(e) = self.restore() {
                log::error!("failed to restore terminal: {}", e);
            }
        }
        resume
    }
}

impl Drop for TuiDebugger {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
