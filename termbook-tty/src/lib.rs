use std::io::{self, Write};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use termbook_core::{Command, PageView};

pub mod renderer;

pub use renderer::{page_lines, Run, StyledLine, TextRenderer};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    /// Move the paragraph cursor on the current page.
    SelectParagraph { delta: isize },
    ToggleSelectedHighlight,
    OpenChapters,
    OpenHighlights,
    CloseOverlay,
    OverlayMoveSelection { delta: isize },
    OverlayActivateSelection,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Chapters,
    Highlights,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Chapters | InputMode::Highlights => self.map_event_overlay(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('j'), KeyModifiers::NONE)
                | (KeyCode::Char(' '), KeyModifiers::NONE)
                | (KeyCode::Down, KeyModifiers::NONE)
                | (KeyCode::Right, KeyModifiers::NONE)
                | (KeyCode::PageDown, _) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::NextPage { count })
                }
                (KeyCode::Char('k'), KeyModifiers::NONE)
                | (KeyCode::Up, KeyModifiers::NONE)
                | (KeyCode::Left, KeyModifiers::NONE)
                | (KeyCode::PageUp, _) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::PrevPage { count })
                }
                (KeyCode::Char(']'), _) => {
                    let count = self.take_count();
                    UiEvent::SelectParagraph {
                        delta: count as isize,
                    }
                }
                (KeyCode::Char('['), _) => {
                    let count = self.take_count();
                    UiEvent::SelectParagraph {
                        delta: -(count as isize),
                    }
                }
                (KeyCode::Char('x'), KeyModifiers::NONE) | (KeyCode::Enter, _) => {
                    self.reset_count();
                    UiEvent::ToggleSelectedHighlight
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                    self.reset_count();
                    UiEvent::Command(Command::GotoStart)
                }
                (KeyCode::Char('t'), _) => {
                    self.reset_count();
                    UiEvent::OpenChapters
                }
                (KeyCode::Char('H'), modifiers)
                    if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
                {
                    self.reset_count();
                    UiEvent::OpenHighlights
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_overlay(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => UiEvent::CloseOverlay,
                (KeyCode::Char('t'), _) if self.mode == InputMode::Chapters => {
                    UiEvent::CloseOverlay
                }
                (KeyCode::Char('H'), _) if self.mode == InputMode::Highlights => {
                    UiEvent::CloseOverlay
                }
                (KeyCode::Enter, _) => UiEvent::OverlayActivateSelection,
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    UiEvent::OverlayMoveSelection { delta: 1 }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    UiEvent::OverlayMoveSelection { delta: -1 }
                }
                (KeyCode::Char('q'), _) => UiEvent::Quit,
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

/// One-line summary of where the reader is.
pub fn status_text(title: &str, view: &PageView) -> String {
    let mut status = format!(
        "{} | {} | p{}",
        title,
        view.chapter.name,
        view.page_index + 1
    );
    if view.exhausted {
        status.push_str(&format!("/{}", view.pages_known));
    }
    status.push_str(&format!(
        " | {:.1}% | chapter {:.0}%",
        view.progress_percent(),
        view.chapter_progress * 100.0
    ));
    status
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
