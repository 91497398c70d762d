//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use crate::cpu::debug::MachineView;
use crate::cpu::execute::{MachineState, Mode};
use crate::cpu::memory::PAGE_SIZE;
use crate::cpu::registers::RegId;
use super::app::DebuggerApp;

const REGISTERS_PER_LINE: usize = 3;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp, view: &MachineView<'_>) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(60),
            Constraint::Percentage(40),
        ])
        .split(frame.area());

    // Left side: code, registers and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(8),
            Constraint::Length(15),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app, view);
    draw_registers(frame, left_chunks[1], view);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app, view);
    draw_help(frame, right_chunks[1]);
}

/// Draw disassembly around IP.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp, view: &MachineView<'_>) {
    let disasm = app.get_disassembly(view, (area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!("{}{:05}: {}", prefix, addr, instr)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw the register file.
fn draw_registers(frame: &mut Frame, area: Rect, view: &MachineView<'_>) {
    let entries: Vec<(&'static str, String)> = view
        .registers()
        .iter()
        .map(|(name, word)| (name, word.to_string()))
        .collect();

    let mut content: Vec<Line> = entries
        .chunks(REGISTERS_PER_LINE)
        .map(|row| {
            let spans: Vec<Span> = row
                .iter()
                .flat_map(|(name, value)| {
                    let style = if RegId::parse(name) == Some(RegId::IP) {
                        Style::default().fg(Color::Yellow)
                    } else if value.is_empty() {
                        Style::default().fg(Color::DarkGray)
                    } else {
                        Style::default().fg(Color::White)
                    };
                    [
                        Span::raw(format!("{:>4}: ", name)),
                        Span::styled(format!("{:<17}", value), style),
                    ]
                })
                .collect();
            Line::from(spans)
        })
        .collect();

    let mode_style = match view.mode() {
        Mode::Kernel => Style::default().fg(Color::Red),
        Mode::User => Style::default().fg(Color::Green),
    };
    content.push(Line::from(vec![
        Span::raw("Mode: "),
        Span::styled(format!("{:?}", view.mode()), mode_style),
        Span::raw("   Cycles: "),
        Span::styled(format!("{}", view.cycles()), Style::default().fg(Color::Cyan)),
        Span::raw("   State: "),
        Span::styled(format!("{:?}", view.state()),
            if view.state() == MachineState::Running {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Red)
            }),
    ]));

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw one memory page.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp, view: &MachineView<'_>) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let base = app.mem_page * PAGE_SIZE;
    let ip = view.ip();

    let items: Vec<ListItem> = match view.page(app.mem_page) {
        Some(words) => words
            .iter()
            .enumerate()
            .skip(app.mem_scroll)
            .take(visible_rows)
            .map(|(offset, word)| {
                let addr = base + offset;
                let style = if addr as i64 == ip {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else if !word.is_empty() {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                ListItem::new(format!("{:05}: {}", addr, word)).style(style)
            })
            .collect(),
        None => Vec::new(),
    };

    let list = List::new(items)
        .block(Block::default()
            .title(format!(" Memory page {} ", app.mem_page))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  c: Continue  q: Halt"),
        Line::from("↑↓: Scroll  PgUp/PgDn: Page"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
