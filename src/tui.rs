//! Terminal session handling.
//!
//! This module opens the controlling terminal, switches it to raw mode for
//! the lifetime of a `TerminalSession`, and provides the few screen
//! operations the interactive loop needs. The display always goes to the
//! terminal device so stdout stays free for the final command output.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode, Clear, ClearType};
use tracing::{debug, warn};

#[cfg(unix)]
const TTY_PATH: &str = "/dev/tty";
#[cfg(windows)]
const TTY_PATH: &str = "CONOUT$";

/// Writer used for everything drawn on the terminal.
pub type TtyWriter = CrLf<File>;

/// The controlling terminal in raw mode.
///
/// Raw mode is restored when the session is dropped, on every exit path.
pub struct TerminalSession {
    tty: File,
    cols: u16,
    rows: u16,
}

impl TerminalSession {
    /// Opens the terminal device, reads its size and enables raw mode.
    pub fn open() -> Result<Self> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TTY_PATH)
            .with_context(|| format!("terminal device {} unavailable", TTY_PATH))?;
        let (cols, rows) = terminal::size().context("failed to query terminal size")?;
        enable_raw_mode().context("failed to enable raw mode")?;
        debug!(cols, rows, "terminal session opened");
        Ok(Self { tty, cols, rows })
    }

    /// Terminal width in columns.
    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Terminal height in rows.
    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// A new handle for drawing on the terminal.
    pub fn writer(&self) -> io::Result<TtyWriter> {
        Ok(CrLf::new(self.tty.try_clone()?))
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            warn!(error = %err, "failed to restore terminal mode");
        }
    }
}

/// Clears the screen and moves the cursor to the first row and column.
pub fn reset_screen<W: Write>(w: &mut W) -> io::Result<()> {
    queue!(w, Clear(ClearType::All), MoveTo(0, 0))?;
    w.flush()
}

/// Draws the prompt followed by the current input.
pub fn print_prompt<W: Write>(w: &mut W, prompt: &str, input: &str) -> io::Result<()> {
    queue!(w, Print(prompt), Print(input))?;
    w.flush()
}

/// Places the cursor on the prompt row, `column` cells to the right.
pub fn cursor_after_prompt<W: Write>(w: &mut W, column: u16) -> io::Result<()> {
    queue!(w, MoveTo(column, 0))?;
    w.flush()
}

/// Cursor column right after `prompt` followed by `input_chars` characters.
pub fn prompt_column(prompt: &str, input_chars: usize) -> u16 {
    let column = prompt.chars().count() + input_chars;
    u16::try_from(column).unwrap_or(u16::MAX)
}

/// Translates `\n` into `\r\n`.
///
/// Raw mode turns off the terminal's own output translation, so line feeds
/// alone would not return the cursor to the first column.
pub struct CrLf<W> {
    inner: W,
}

impl<W: Write> CrLf<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrLf<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut start = 0;
        for (idx, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                self.inner.write_all(&buf[start..idx])?;
                self.inner.write_all(b"\r\n")?;
                start = idx + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_translates_line_feeds() {
        let mut writer = CrLf::new(Vec::new());
        writer.write_all(b"\nfoo\nbar").unwrap();
        assert_eq!(writer.into_inner(), b"\r\nfoo\r\nbar");
    }

    #[test]
    fn reset_screen_clears_and_homes_cursor() {
        let mut out = Vec::new();
        reset_screen(&mut out).unwrap();
        assert_eq!(out, b"\x1b[2J\x1b[1;1H");
    }

    #[test]
    fn prompt_is_drawn_before_input() {
        let mut out = Vec::new();
        print_prompt(&mut out, ">> ", "föo").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">> föo");
    }

    #[test]
    fn cursor_lands_after_prompt_and_input() {
        let column = prompt_column(">> ", 3);
        assert_eq!(column, 6);

        let mut out = Vec::new();
        cursor_after_prompt(&mut out, column).unwrap();
        assert_eq!(out, b"\x1b[1;7H");
    }
}
