use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::cursor;
use crossterm::event::{self, Event};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use termbook_core::{
    resolve_user_id, BookSource, Command, FileStore, HighlightStore, KeyValueStore, Library,
    MeasureOracle, MemoryStore, Namespace, ReaderConfig, Session, SessionEvent,
    StoredReadingState, CONFIG_FILE_NAME,
};
use termbook_render::{CellGridOracle, DirectorySource, HttpSource, STATUS_ROWS};
use termbook_tty::{
    page_lines, status_text, write_status_line, EventMapper, InputMode, TextRenderer, UiEvent,
};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "termbook",
    version,
    about = "Reflowing terminal reader for plain-text books"
)]
struct Args {
    /// Reader id to keep state under (defaults to a generated, stored id)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Directory holding `<id>.txt` books and an optional library.toml
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Reader config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for saved reading state
    #[arg(long = "state-dir", global = true)]
    state_dir: Option<PathBuf>,

    /// Fetch book text from `<url>/<id>` instead of the library directory
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Open a book in the interactive reader
    Read { book: String },
    /// List books with reading progress
    Library,
    /// List saved highlights of a book
    Highlights { book: String },
    /// Print pages laid out for a fixed grid without touching saved state
    Dump {
        book: String,
        #[arg(long, default_value_t = 60)]
        columns: u16,
        #[arg(long, default_value_t = 20)]
        rows: u16,
        /// Stop after this many pages
        #[arg(long)]
        pages: Option<usize>,
    },
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

struct App {
    config: ReaderConfig,
    library_root: PathBuf,
    library: Option<Library>,
    url: Option<String>,
}

impl App {
    fn source(&self) -> Box<dyn BookSource> {
        match &self.url {
            Some(url) => Box::new(HttpSource::new(url)),
            None => Box::new(DirectorySource::new(self.library_root.clone())),
        }
    }

    /// Config for one book; a library entry's start marker applies unless the
    /// config file sets one.
    fn config_for(&self, book_id: &str) -> ReaderConfig {
        let mut config = self.config.clone();
        if config.normalizer.start_marker.is_none() {
            config.normalizer.start_marker = self
                .library
                .as_ref()
                .and_then(|library| library.get(book_id))
                .and_then(|entry| entry.start_marker.clone());
        }
        config
    }

    fn title_for(&self, book_id: &str) -> String {
        self.library
            .as_ref()
            .and_then(|library| library.get(book_id))
            .map(|entry| entry.title.clone())
            .unwrap_or_else(|| book_id.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "termbook", "termbook")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let interactive = matches!(args.command, CliCommand::Read { .. });
    let _log_guard = init_logging(&project_dirs, !interactive)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join(CONFIG_FILE_NAME));
    let config = ReaderConfig::load(&config_path);

    let library_root = args
        .library
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().join("books"));
    let library = match Library::load(&library_root) {
        Ok(library) => Some(library),
        Err(err) => {
            debug!("no library catalog: {err:#}");
            None
        }
    };

    let app = App {
        config,
        library_root,
        library,
        url: args.url.clone(),
    };

    match &args.command {
        CliCommand::Dump {
            book,
            columns,
            rows,
            pages,
        } => return dump(&app, book, *columns, *rows, *pages).await,
        CliCommand::Library if app.library.is_none() => {
            Library::load(&app.library_root).with_context(|| {
                format!("failed to load library from {:?}", app.library_root)
            })?;
        }
        _ => {}
    }

    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().join("state"));
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(state_dir)?);
    let user_id = args
        .user
        .clone()
        .unwrap_or_else(|| resolve_user_id(store.as_ref()));

    match &args.command {
        CliCommand::Read { book } => read(&app, store, &user_id, book).await,
        CliCommand::Library => list_library(&app, store.as_ref(), &user_id),
        CliCommand::Highlights { book } => list_highlights(&app, store.as_ref(), &user_id, book),
        CliCommand::Dump { .. } => Ok(()),
    }
}

async fn read(
    app: &App,
    store: Arc<dyn KeyValueStore>,
    user_id: &str,
    book_id: &str,
) -> Result<()> {
    let source = app.source();
    let raw = source
        .fetch(book_id)
        .await
        .with_context(|| format!("failed to open {book_id}"))?;
    let config = app.config_for(book_id);
    let title = app.title_for(book_id);

    let (columns, rows) = terminal::size()?;
    let mut oracle = CellGridOracle::for_terminal(columns, rows, &config.surface);
    let mut session = Session::load(
        &raw,
        Arc::clone(&store),
        user_id,
        book_id,
        config.clone(),
        &mut oracle,
    )
    .with_context(|| format!("failed to open {book_id}"))?;

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = TextRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut reader = ReaderState::default();
    let mut dirty = true;

    loop {
        if let Some(mode) = reader.overlay.mode() {
            event_mapper.set_mode(mode);
        } else if event_mapper.mode() != InputMode::Normal {
            event_mapper.set_mode(InputMode::Normal);
        }

        if dirty {
            let pending = event_mapper.pending_input();
            redraw(
                &mut renderer,
                &mut session,
                &oracle,
                &title,
                pending.as_deref(),
                &mut reader,
            )?;
            dirty = false;
        }

        if !matches!(session.tick(Instant::now()), Ok(false)) {
            dirty |= drain_events(&session, &mut reader);
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            if let Event::Resize(columns, rows) = ev {
                let resized = CellGridOracle::for_terminal(columns, rows, &config.surface);
                if resized.capacity() > 0 {
                    if let Err(err) = session.flush() {
                        debug!("save before re-pagination failed: {err}");
                    }
                    oracle = resized;
                    session.repaginate(&mut oracle)?;
                    reader.selected = None;
                }
                drain_events(&session, &mut reader);
                dirty = true;
                continue;
            }

            let ui_event = event_mapper.map_event(ev);
            match handle_event(ui_event, &mut session, &mut oracle, &mut reader)? {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
            dirty |= drain_events(&session, &mut reader);
            if !dirty {
                if let Some(pending) = event_mapper.pending_input() {
                    let view = session.view();
                    let status = combine_status(
                        Some(status_text(&title, &view)),
                        Some(pending.as_str()),
                    );
                    if let Some(status) = status {
                        draw_status_line(&mut renderer, &status)?;
                    }
                }
            }
        }
    }

    renderer.clear_all()?;
    if let Err(err) = session.flush() {
        debug!("final save failed: {err}");
    }
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

#[derive(Default)]
struct ReaderState {
    overlay: OverlayState,
    /// Paragraph cursor on the current page.
    selected: Option<usize>,
    notice: Option<String>,
}

#[derive(Default)]
enum OverlayState {
    #[default]
    None,
    Chapters(ListWindow),
    Highlights(ListWindow),
}

impl OverlayState {
    fn deactivate(&mut self) {
        *self = OverlayState::None;
    }

    fn is_active(&self) -> bool {
        !matches!(self, OverlayState::None)
    }

    fn mode(&self) -> Option<InputMode> {
        match self {
            OverlayState::None => None,
            OverlayState::Chapters(_) => Some(InputMode::Chapters),
            OverlayState::Highlights(_) => Some(InputMode::Highlights),
        }
    }

    fn window_mut(&mut self) -> Option<&mut ListWindow> {
        match self {
            OverlayState::Chapters(window) | OverlayState::Highlights(window) => Some(window),
            OverlayState::None => None,
        }
    }
}

struct ListEntry {
    label: String,
    target: Command,
}

struct ListWindow {
    title: &'static str,
    empty_message: &'static str,
    entries: Vec<ListEntry>,
    selected: usize,
    scroll_offset: usize,
}

impl ListWindow {
    fn chapters(session: &Session) -> Self {
        let current = session.current_chapter().ordinal;
        let entries: Vec<ListEntry> = session
            .chapters()
            .iter()
            .enumerate()
            .map(|(idx, chapter)| ListEntry {
                label: chapter.name.clone(),
                target: Command::GotoChapter { ordinal: idx },
            })
            .collect();
        let selected = session
            .chapters()
            .iter()
            .position(|chapter| chapter.ordinal == current)
            .unwrap_or(0);
        Self {
            title: "Chapters",
            empty_message: "No chapters found",
            entries,
            selected,
            scroll_offset: 0,
        }
    }

    fn highlights(session: &Session) -> Self {
        let entries = session
            .highlights()
            .list()
            .into_iter()
            .filter_map(|highlight| {
                let paragraph = session.book().paragraph(&highlight.paragraph_id)?;
                Some(ListEntry {
                    label: format!(
                        "[{}] {}",
                        highlight.chapter.name,
                        highlight.text.replace('\n', " ")
                    ),
                    target: Command::GotoOffset {
                        offset: paragraph.start_offset,
                    },
                })
            })
            .collect();
        Self {
            title: "Highlights",
            empty_message: "No highlights yet",
            entries,
            selected: 0,
            scroll_offset: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn selected_entry(&self) -> Option<&ListEntry> {
        self.entries.get(self.selected)
    }

    fn move_selection(&mut self, delta: isize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let len = self.entries.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    fn ensure_visible(&mut self, viewport_height: usize) {
        if viewport_height == 0 || self.entries.is_empty() {
            self.scroll_offset = 0;
            return;
        }
        let max_offset = self.entries.len().saturating_sub(viewport_height);
        if self.scroll_offset > max_offset {
            self.scroll_offset = max_offset;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
            return;
        }
        let bottom = self.scroll_offset + viewport_height;
        if self.selected >= bottom {
            self.scroll_offset = self.selected + 1 - viewport_height;
        }
    }
}

fn handle_event(
    event: UiEvent,
    session: &mut Session,
    oracle: &mut CellGridOracle,
    reader: &mut ReaderState,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(cmd) => {
            let before = session.page_index();
            session.apply(cmd, oracle)?;
            if session.page_index() != before {
                reader.selected = None;
            }
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::SelectParagraph { delta } => {
            let len = session.view().paragraphs.len();
            let next = step_selection(reader.selected, delta, len);
            if next != reader.selected {
                reader.selected = next;
                return Ok(LoopAction::ContinueRedraw);
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::ToggleSelectedHighlight => {
            let view = session.view();
            let Some(idx) = reader.selected else {
                reader.selected = step_selection(None, 1, view.paragraphs.len());
                return Ok(LoopAction::ContinueRedraw);
            };
            if let Some(paragraph) = view.paragraphs.get(idx) {
                session.apply(
                    Command::ToggleHighlight {
                        paragraph_id: paragraph.paragraph_id.clone(),
                    },
                    oracle,
                )?;
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::OpenChapters => {
            reader.overlay = OverlayState::Chapters(ListWindow::chapters(session));
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::OpenHighlights => {
            reader.overlay = OverlayState::Highlights(ListWindow::highlights(session));
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::CloseOverlay => {
            if reader.overlay.is_active() {
                reader.overlay.deactivate();
                Ok(LoopAction::ContinueRedraw)
            } else {
                Ok(LoopAction::Continue)
            }
        }
        UiEvent::OverlayMoveSelection { delta } => {
            if let Some(window) = reader.overlay.window_mut() {
                if window.move_selection(delta) {
                    return Ok(LoopAction::ContinueRedraw);
                }
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::OverlayActivateSelection => {
            let target = reader.overlay.window_mut().and_then(|window| {
                window
                    .selected_entry()
                    .map(|entry| entry.target.clone())
            });
            if let Some(target) = target {
                session.apply(target, oracle)?;
                reader.overlay.deactivate();
                reader.selected = None;
                return Ok(LoopAction::ContinueRedraw);
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue),
    }
}

/// Move a paragraph cursor by `delta`. With no cursor yet, forward steps
/// count from the top of the page and backward steps from the bottom.
fn step_selection(selected: Option<usize>, delta: isize, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let next = match selected {
        Some(current) => current as isize + delta,
        None if delta >= 0 => delta - 1,
        None => len as isize + delta,
    };
    Some(next.clamp(0, len as isize - 1) as usize)
}

/// Consume queued session events. Returns whether a redraw was requested.
fn drain_events(session: &Session, reader: &mut ReaderState) -> bool {
    let events = session.events();
    let mut events = events.lock();
    let mut redraw = false;
    for event in events.drain(..) {
        match event {
            SessionEvent::RedrawNeeded => redraw = true,
            SessionEvent::PersistenceFailed { reason } => {
                reader.notice = Some(format!("not saved: {reason}"));
                redraw = true;
            }
            SessionEvent::StateSaved => {
                if reader.notice.take().is_some() {
                    redraw = true;
                }
            }
            SessionEvent::Loaded { .. } | SessionEvent::HighlightToggled { .. } => {}
        }
    }
    redraw
}

fn redraw(
    renderer: &mut TextRenderer<io::Stdout>,
    session: &mut Session,
    oracle: &CellGridOracle,
    title: &str,
    pending_input: Option<&str>,
    reader: &mut ReaderState,
) -> Result<()> {
    let (total_cols, total_rows) = terminal::size()?;
    let text_rows = total_rows.saturating_sub(STATUS_ROWS);
    let view = session.view();

    renderer.clear_all()?;
    if let Some(window) = reader.overlay.window_mut() {
        draw_list_overlay(renderer.writer(), window, total_cols, text_rows)?;
    } else {
        let surface = &session.config().surface;
        let mut lines = page_lines(
            &view,
            usize::from(oracle.columns()),
            usize::from(oracle.paragraph_gap()),
            reader.selected,
        );
        lines.truncate(usize::from(oracle.rows()));
        renderer.draw_lines(&lines, surface.margin_columns, surface.margin_rows)?;
    }

    let mut status = status_text(title, &view);
    if let Some(notice) = &reader.notice {
        status.push_str(" | ");
        status.push_str(notice);
    }
    if let Some(status) = combine_status(Some(status), pending_input) {
        draw_status_line(renderer, &status)?;
    }
    Ok(())
}

fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

fn draw_status_line(renderer: &mut TextRenderer<io::Stdout>, status: &str) -> Result<()> {
    let (total_cols, total_rows) = terminal::size()?;
    let status_row = total_rows.saturating_sub(1);
    let status: String = status.chars().take(usize::from(total_cols)).collect();
    let writer = renderer.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(writer, &status)?;
    Ok(())
}

fn draw_list_overlay(
    writer: &mut impl Write,
    window: &mut ListWindow,
    total_cols: u16,
    rows_available: u16,
) -> Result<()> {
    if total_cols < 20 || rows_available < 6 {
        return Ok(());
    }

    let total_cols = usize::from(total_cols);
    let max_inner_width = total_cols.saturating_sub(6);
    if max_inner_width < 10 {
        return Ok(());
    }

    let base_width = if window.is_empty() {
        window.empty_message.len() + 2
    } else {
        window
            .entries
            .iter()
            .map(|entry| entry.label.chars().count() + 2)
            .max()
            .unwrap_or(0)
            .max(window.title.len())
    };
    let inner_width = base_width.min(max_inner_width).max(20.min(max_inner_width));

    let max_window_height = usize::from(rows_available).saturating_sub(2);
    if max_window_height < 6 {
        return Ok(());
    }
    let max_content_height = max_window_height - 4;
    let total_entries = window.entries.len().max(1);
    let content_height = total_entries.min(max_content_height).max(1);
    window.ensure_visible(content_height);

    let window_height = content_height + 4;
    let window_width = inner_width + 2;
    let start_col = (total_cols.saturating_sub(window_width) / 2) as u16;
    let mut row = (usize::from(rows_available).saturating_sub(window_height) / 2) as u16;

    let horizontal_border = format!("+{}+", "-".repeat(inner_width));
    print_inverted(writer, start_col, row, &horizontal_border)?;
    row = row.saturating_add(1);
    let title_line = format!("|{: ^inner_width$}|", window.title);
    print_inverted(writer, start_col, row, &title_line)?;
    row = row.saturating_add(1);
    print_inverted(writer, start_col, row, &format!("|{}|", "-".repeat(inner_width)))?;
    row = row.saturating_add(1);

    if window.is_empty() {
        let content = truncate_with_ellipsis(format!("  {}", window.empty_message), inner_width);
        print_inverted(writer, start_col, row, &format!("|{}|", content))?;
        row = row.saturating_add(1);
    } else {
        let end_index = (window.scroll_offset + content_height).min(window.entries.len());
        for idx in window.scroll_offset..end_index {
            let marker = if idx == window.selected { '>' } else { ' ' };
            let content = truncate_with_ellipsis(
                format!("{} {}", marker, window.entries[idx].label),
                inner_width,
            );
            print_inverted(writer, start_col, row, &format!("|{}|", content))?;
            row = row.saturating_add(1);
        }
        for _ in (end_index - window.scroll_offset)..content_height {
            print_inverted(writer, start_col, row, &format!("|{}|", " ".repeat(inner_width)))?;
            row = row.saturating_add(1);
        }
    }

    print_inverted(writer, start_col, row, &horizontal_border)?;
    Ok(())
}

fn print_inverted(writer: &mut impl Write, col: u16, row: u16, content: &str) -> Result<()> {
    crossterm::execute!(
        writer,
        cursor::MoveTo(col, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn truncate_with_ellipsis(text: String, width: usize) -> String {
    let len = text.chars().count();
    let mut text = if len > width {
        if width <= 3 {
            text.chars().take(width).collect()
        } else {
            let mut truncated: String = text.chars().take(width - 3).collect();
            truncated.push_str("...");
            truncated
        }
    } else {
        text
    };
    let len = text.chars().count();
    if len < width {
        text.push_str(&" ".repeat(width - len));
    }
    text
}

async fn dump(
    app: &App,
    book_id: &str,
    columns: u16,
    rows: u16,
    pages: Option<usize>,
) -> Result<()> {
    let config = app.config_for(book_id);
    let gap = config.surface.paragraph_gap;
    let mut oracle = CellGridOracle::new(columns, rows, gap);
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let source = app.source();
    let mut session = Session::open(&*source, store, "dump", book_id, config, &mut oracle)
        .await
        .with_context(|| format!("failed to open {book_id}"))?;

    let mut stdout = io::stdout().lock();
    write_pages(&mut session, &mut oracle, columns, gap, pages, &mut stdout)?;
    Ok(())
}

/// Print pages from the current one onwards until pagination wraps or
/// `limit` pages are out. Returns the number of pages printed.
fn write_pages<W: Write>(
    session: &mut Session,
    oracle: &mut dyn MeasureOracle,
    columns: u16,
    gap: u16,
    limit: Option<usize>,
    out: &mut W,
) -> Result<usize> {
    let mut printed = 0usize;
    loop {
        let view = session.view();
        writeln!(out, "--- page {} ---", view.page_index + 1)?;
        for line in page_lines(&view, usize::from(columns), usize::from(gap), None) {
            writeln!(out, "{}", line.text())?;
        }
        printed += 1;
        if limit.is_some_and(|limit| printed >= limit) {
            break;
        }
        session.apply(Command::NextPage { count: 1 }, oracle)?;
        session.events().lock().clear();
        if session.page_index() == 0 {
            break;
        }
    }
    Ok(printed)
}

fn list_library(app: &App, store: &dyn KeyValueStore, user_id: &str) -> Result<()> {
    let Some(library) = &app.library else {
        return Ok(());
    };
    let listing = library.listing(store, user_id);
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{} books available", listing.len())?;
    for item in &listing {
        let mut line = format!("{:<16} {}", item.entry.id, item.entry.title);
        if let Some(author) = &item.entry.author {
            line.push_str(&format!(" by {author}"));
        }
        if let Some(year) = item.entry.year {
            line.push_str(&format!(" ({year})"));
        }
        writeln!(
            stdout,
            "{line}  {:.1}%  {}",
            item.progress_percent,
            item.action.label()
        )?;
    }
    for entry in library.books().iter().filter(|entry| !entry.is_available()) {
        writeln!(stdout, "{:<16} {}  coming soon", entry.id, entry.title)?;
    }
    Ok(())
}

fn list_highlights(
    app: &App,
    store: &dyn KeyValueStore,
    user_id: &str,
    book_id: &str,
) -> Result<()> {
    let state = StoredReadingState::load(store, &Namespace::book(user_id, book_id));
    let highlights = HighlightStore::from_saved(state.highlights);
    let mut stdout = io::stdout().lock();
    if highlights.is_empty() {
        writeln!(stdout, "no highlights in {}", app.title_for(book_id))?;
        return Ok(());
    }
    for highlight in highlights.list() {
        writeln!(
            stdout,
            "{:>5}  [{}] {}",
            highlight.global_index,
            highlight.chapter.name,
            highlight.text.replace('\n', " ")
        )?;
    }
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "termbook.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // Raw mode owns the terminal while reading.
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_starts_from_the_nearest_edge() {
        assert_eq!(step_selection(None, 1, 4), Some(0));
        assert_eq!(step_selection(None, -1, 4), Some(3));
        assert_eq!(step_selection(Some(1), 5, 4), Some(3));
        assert_eq!(step_selection(Some(1), -5, 4), Some(0));
        assert_eq!(step_selection(Some(0), 1, 0), None);
    }

    #[test]
    fn truncation_pads_and_elides_by_characters() {
        assert_eq!(truncate_with_ellipsis("ab".to_string(), 4), "ab  ");
        assert_eq!(truncate_with_ellipsis("caf\u{e9} au lait".to_string(), 7), "caf\u{e9}...");
    }

    #[test]
    fn status_joins_pending_count() {
        assert_eq!(
            combine_status(Some("Dracula | p1".to_string()), Some("12")).as_deref(),
            Some("Dracula | p1 | 12")
        );
        assert_eq!(combine_status(None, Some("")), None);
    }

    #[test]
    fn list_window_keeps_selection_visible() {
        let mut window = ListWindow {
            title: "Chapters",
            empty_message: "",
            entries: (0..10)
                .map(|ordinal| ListEntry {
                    label: format!("Chapter {ordinal}"),
                    target: Command::GotoChapter { ordinal },
                })
                .collect(),
            selected: 0,
            scroll_offset: 0,
        };
        assert!(window.move_selection(7));
        window.ensure_visible(3);
        assert_eq!(window.scroll_offset, 5);
        assert!(!window.move_selection(-20) || window.selected == 0);
        window.ensure_visible(3);
        assert_eq!(window.scroll_offset, 0);
    }

    #[test]
    fn write_pages_leaves_no_queued_events() {
        let text = (0..40)
            .map(|n| format!("Paragraph {n} has a handful of words in it."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut oracle = CellGridOracle::new(30, 6, 1);
        let mut session = Session::load(
            &text,
            store,
            "dump",
            "sample",
            ReaderConfig::default(),
            &mut oracle,
        )
        .unwrap();
        session.events().lock().clear();

        let mut out = Vec::new();
        let printed = write_pages(&mut session, &mut oracle, 30, 1, None, &mut out).unwrap();

        assert!(printed > 3);
        assert!(session.events().lock().is_empty());
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("--- page ").count(), printed);
    }
}
