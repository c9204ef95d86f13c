use std::io::{self, Stdout, Write};

use anyhow::{Context, Result};
use crossterm::cursor::MoveToPreviousLine;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Print, PrintStyledContent, Stylize};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{QueueableCommand, execute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Header,
    Hint,
    Context,
    Removed,
    Expanded,
    Kept,
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledLine {
    pub style: LineStyle,
    pub text: String,
}

impl StyledLine {
    pub fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
    Backspace,
    Char(char),
    Interrupt,
    Other,
}

/// Frame-at-a-time output. Escape sequences stay in [`CrosstermTerminal`].
pub trait Terminal {
    /// Replaces the previous frame with `lines`.
    fn render(&mut self, lines: &[StyledLine]) -> Result<()>;
    /// Erases the previous frame.
    fn clear(&mut self) -> Result<()>;
    fn read_key(&mut self) -> Result<Key>;
}

pub struct CrosstermTerminal {
    out: Stdout,
    rendered: u16,
    colorize: bool,
}

impl CrosstermTerminal {
    pub fn new(colorize: bool) -> Self {
        Self {
            out: io::stdout(),
            rendered: 0,
            colorize,
        }
    }

    fn size(&self) -> (usize, usize) {
        let (cols, rows) = terminal::size().unwrap_or((120, 40));
        (usize::from(cols).max(20), usize::from(rows).max(2))
    }

    fn queue_line(&mut self, line: &StyledLine, width: usize) -> io::Result<()> {
        let text = fit_to_width(&line.text, width - 1);
        if !self.colorize {
            self.out.queue(Print(text))?;
            return Ok(());
        }
        let styled = match line.style {
            LineStyle::Header => text.bold().cyan(),
            LineStyle::Hint | LineStyle::Pending => text.dark_grey(),
            LineStyle::Context => text.stylize(),
            LineStyle::Removed => text.red(),
            LineStyle::Expanded => text.magenta(),
            LineStyle::Kept => text.green().bold(),
            LineStyle::Running => text.yellow(),
            LineStyle::Succeeded => text.green(),
            LineStyle::Failed => text.red().bold(),
        };
        self.out.queue(PrintStyledContent(styled))?;
        Ok(())
    }
}

impl Terminal for CrosstermTerminal {
    fn render(&mut self, lines: &[StyledLine]) -> Result<()> {
        self.clear()?;
        let (width, height) = self.size();
        // Rows that scroll off the top cannot be erased again.
        let visible = lines.len().min(height - 1);
        for line in &lines[..visible] {
            self.queue_line(line, width)?;
            self.out.queue(Print("\r\n"))?;
        }
        self.out.flush().context("flushing terminal output")?;
        self.rendered = u16::try_from(visible).unwrap_or(u16::MAX);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.rendered > 0 {
            execute!(
                self.out,
                MoveToPreviousLine(self.rendered),
                Clear(ClearType::FromCursorDown)
            )
            .context("clearing previous frame")?;
            self.rendered = 0;
        }
        Ok(())
    }

    fn read_key(&mut self) -> Result<Key> {
        terminal::enable_raw_mode().context("enabling raw mode")?;
        let key = next_key();
        terminal::disable_raw_mode().context("disabling raw mode")?;
        key
    }
}

impl Drop for CrosstermTerminal {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn next_key() -> Result<Key> {
    loop {
        let Event::Key(event) = event::read().context("reading key")? else {
            continue;
        };
        if event.kind != KeyEventKind::Press {
            continue;
        }
        let key = match event.code {
            KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => Key::Interrupt,
            KeyCode::Up => Key::Up,
            KeyCode::Down => Key::Down,
            KeyCode::Enter => Key::Enter,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Char(ch) => Key::Char(ch),
            _ => Key::Other,
        };
        return Ok(key);
    }
}

/// Cuts `text` to `width` characters so that one frame line is one screen row.
fn fit_to_width(text: &str, width: usize) -> String {
    let expanded = text.replace('\t', "    ");
    if expanded.chars().count() <= width {
        return expanded;
    }
    let mut cut: String = expanded.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
