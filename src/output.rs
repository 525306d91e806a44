//! Output lines and the viewport-bounded line renderer.
//!
//! This module defines the lines a run produces (`OutputLine`) and the
//! `LineRenderer` that writes them below the prompt, clipped to the terminal's
//! columns and rows. The renderer is shared between the coordinator, which
//! starts a new page on every keystroke, and the task pumping a run's output.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use strip_ansi_escapes::strip;

/// Indicates the source stream of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

/// A single line of output from a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// The text, including its trailing line feed unless it was the final
    /// unterminated chunk of the stream.
    pub text: String,
    /// The stream it originated from (stdout/stderr).
    pub stream: StreamKind,
}

/// Identifies one page of output; every `reset` starts a new one.
pub type Epoch = u64;

struct Page<W> {
    target: W,
    printed: usize,
    epoch: Epoch,
}

/// Writes output lines into a fixed `max_cols` x `max_rows` viewport.
///
/// Lines past the last row are dropped, and each line is cut to `max_cols`
/// visible characters. All access goes through an internal lock.
pub struct LineRenderer<W> {
    page: Mutex<Page<W>>,
    max_cols: usize,
    max_rows: usize,
}

impl<W: Write> LineRenderer<W> {
    /// Creates a renderer writing to `target`.
    pub fn new(target: W, max_cols: usize, max_rows: usize) -> Self {
        Self {
            page: Mutex::new(Page {
                target,
                printed: 0,
                epoch: 0,
            }),
            max_cols,
            max_rows,
        }
    }

    /// Prints a line on the current page.
    ///
    /// Returns the number of line bytes written, or `0` once the row limit is
    /// reached.
    pub fn print(&self, line: &str) -> io::Result<usize> {
        let mut page = self.lock();
        self.print_line(&mut page, line)
    }

    /// Prints a line only if `epoch` is still the current page.
    ///
    /// Output from a superseded run is dropped the same way excess rows are.
    pub fn print_in(&self, epoch: Epoch, line: &str) -> io::Result<usize> {
        let mut page = self.lock();
        if page.epoch != epoch {
            return Ok(0);
        }
        self.print_line(&mut page, line)
    }

    /// Restores the full row budget and starts a new page.
    ///
    /// Does not touch the target.
    pub fn reset(&self) -> Epoch {
        let mut page = self.lock();
        Self::next_page(&mut page)
    }

    /// Runs `draw` against the target, then starts a new page.
    ///
    /// Both happen under the lock, so no line from an earlier page can land
    /// between the redraw and the reset.
    pub fn redraw<F>(&self, draw: F) -> io::Result<Epoch>
    where
        F: FnOnce(&mut W) -> io::Result<()>,
    {
        let mut page = self.lock();
        draw(&mut page.target)?;
        Ok(Self::next_page(&mut page))
    }

    /// Runs `draw` against the target if `epoch` is still current.
    ///
    /// Returns whether anything was drawn.
    pub fn draw_in<F>(&self, epoch: Epoch, draw: F) -> io::Result<bool>
    where
        F: FnOnce(&mut W) -> io::Result<()>,
    {
        let mut page = self.lock();
        if page.epoch != epoch {
            return Ok(false);
        }
        draw(&mut page.target)?;
        Ok(true)
    }

    fn next_page(page: &mut Page<W>) -> Epoch {
        page.printed = 0;
        page.epoch = page.epoch.wrapping_add(1);
        page.epoch
    }

    fn print_line(&self, page: &mut Page<W>, line: &str) -> io::Result<usize> {
        if page.printed >= self.max_rows {
            return Ok(0);
        }

        if page.printed == 0 {
            page.target.write_all(b"\n")?;
        }

        let text = line.strip_suffix('\n').unwrap_or(line);
        let text = sanitize_text(text);
        let visible: String = text.chars().take(self.max_cols).collect();

        let mut buf = visible.into_bytes();
        // No line feed after the last row, or the viewport would scroll.
        if page.printed + 1 < self.max_rows {
            buf.push(b'\n');
        }
        page.target.write_all(&buf)?;
        page.target.flush()?;

        page.printed += 1;
        Ok(buf.len())
    }

    fn lock(&self) -> MutexGuard<'_, Page<W>> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sanitizes text for display.
///
/// ANSI escape codes are removed, tabs become a single space and remaining
/// control characters are dropped, so that one character is one column.
pub fn sanitize_text(text: &str) -> String {
    let stripped = strip(text.replace('\t', " ").as_bytes());
    String::from_utf8_lossy(&stripped)
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}
