//! The interactive loop.
//!
//! This module holds the `App`, which owns the input line and the single
//! current `Runner`. Every keystroke that edits the input cancels the current
//! run in the background, redraws the prompt and starts a fresh run whose
//! output is pumped into the shared `LineRenderer`. Enter or Ctrl-D waits for
//! the current run and hands its stdout back to the caller.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::events::{Event, Key};
use crate::input::InputBuffer;
use crate::output::{Epoch, LineRenderer, OutputLine};
use crate::runner::Runner;
use crate::tui;

/// Lifecycle of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Empty input, nothing running.
    Idle,
    /// Non-empty input; the current run may still be producing output.
    Running,
    /// Enter or Ctrl-D was pressed; waiting for the last run, where only an
    /// interrupt is still handled.
    Terminating,
}

/// How the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Enter or Ctrl-D; the bytes to print on stdout.
    Commit(Vec<u8>),
    /// Escape, or the key reader went away.
    Abort,
    /// Ctrl-C or a termination signal.
    Interrupted,
}

/// Coordinates keystrokes, runs and the display.
pub struct App<W> {
    renderer: Arc<LineRenderer<W>>,
    template: Vec<String>,
    placeholder: String,
    prompt: String,
    print_input: bool,
    stdin: Arc<[u8]>,
    input: InputBuffer,
    current: Option<Runner>,
    state: State,
}

impl<W> App<W>
where
    W: Write + Send + 'static,
{
    /// Creates the loop for `settings`; `stdin` is fed to every run.
    pub fn new(settings: Settings, stdin: Arc<[u8]>, renderer: Arc<LineRenderer<W>>) -> Self {
        Self {
            renderer,
            template: settings.template,
            placeholder: settings.placeholder,
            prompt: settings.prompt,
            print_input: settings.print_input,
            stdin,
            input: InputBuffer::new(settings.initial_input),
            current: None,
            state: State::Idle,
        }
    }

    /// Processes events one at a time until the session ends.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> Result<Exit> {
        info!(template = ?self.template, "interactive loop started");
        self.refresh()?;

        while let Some(event) = events.recv().await {
            let key = match event {
                Event::Key(key) => key,
                Event::Interrupt => Key::Interrupt,
            };
            match key {
                Key::Char(c) => self.input.push(c),
                Key::EraseChar => self.input.pop_char(),
                Key::EraseWord => self.input.erase_word(),
                Key::Commit => return self.commit(&mut events).await,
                Key::Escape => return self.abort(Exit::Abort),
                Key::Interrupt => return self.abort(Exit::Interrupted),
                Key::Ignored => continue,
            }
            self.refresh()?;
        }

        debug!("key reader closed");
        self.abort(Exit::Abort)
    }

    /// Cancels the current run, redraws the prompt and starts a new run for
    /// the current input.
    fn refresh(&mut self) -> Result<()> {
        if let Some(mut runner) = self.current.take() {
            runner.cancel();
            tokio::spawn(async move { runner.kill_wait().await });
        }

        let prompt = &self.prompt;
        let input = self.input.as_str();
        let epoch = self
            .renderer
            .redraw(|w| {
                tui::reset_screen(w)?;
                tui::print_prompt(w, prompt, input)
            })
            .context("failed to draw prompt")?;

        if self.input.is_empty() {
            self.state = State::Idle;
            return Ok(());
        }
        self.state = State::Running;
        self.start_run(epoch)
    }

    fn start_run(&mut self, epoch: Epoch) -> Result<()> {
        let column = tui::prompt_column(&self.prompt, self.input.char_count());
        let mut runner = Runner::new(
            &self.template,
            &self.placeholder,
            self.input.as_str(),
            Arc::clone(&self.stdin),
        );

        match runner.run() {
            Ok(lines) => {
                debug!(epoch, pid = runner.pid(), "run started");
                tokio::spawn(pump_output(lines, Arc::clone(&self.renderer), epoch, column));
                self.current = Some(runner);
            }
            Err(err) => {
                warn!(error = %err, "run failed to start");
                let message = format!("{}\n", err);
                self.renderer
                    .print_in(epoch, &message)
                    .context("failed to draw run error")?;
                self.renderer
                    .draw_in(epoch, |w| tui::cursor_after_prompt(w, column))
                    .context("failed to place cursor")?;
            }
        }
        Ok(())
    }

    async fn commit(mut self, events: &mut mpsc::Receiver<Event>) -> Result<Exit> {
        self.state = State::Terminating;
        let mut output = Vec::new();
        if let Some(mut runner) = self.current.take() {
            if !self.finish_run(&mut runner, events).await {
                self.current = Some(runner);
                return self.abort(Exit::Interrupted);
            }
            output = runner.stdout();
        }
        self.renderer
            .redraw(|w| tui::reset_screen(w))
            .context("failed to reset screen")?;

        if self.input.is_empty() {
            return Ok(Exit::Commit(Vec::new()));
        }
        if output.is_empty() && self.print_input {
            output = format!("{}\n", self.input.as_str()).into_bytes();
        }
        info!(bytes = output.len(), "session committed");
        Ok(Exit::Commit(output))
    }

    /// Waits for `runner` to finish on its own while still listening for
    /// interrupts. Returns `false` if an interrupt came first.
    async fn finish_run(&self, runner: &mut Runner, events: &mut mpsc::Receiver<Event>) -> bool {
        let mut listening = true;
        loop {
            tokio::select! {
                _ = runner.wait() => return true,
                event = events.recv(), if listening => match event {
                    Some(Event::Interrupt | Event::Key(Key::Interrupt)) => return false,
                    Some(event) => debug!(?event, state = ?self.state, "event ignored"),
                    None => listening = false,
                },
            }
        }
    }

    fn abort(mut self, exit: Exit) -> Result<Exit> {
        if let Some(mut runner) = self.current.take() {
            runner.cancel();
            tokio::spawn(async move { runner.kill_wait().await });
        }
        self.renderer
            .redraw(|w| tui::reset_screen(w))
            .context("failed to reset screen")?;
        info!(?exit, state = ?self.state, "session ended without output");
        Ok(exit)
    }
}

/// Feeds a run's output into the renderer until the run's stream closes,
/// then puts the cursor back on the prompt.
async fn pump_output<W: Write>(
    mut lines: mpsc::Receiver<OutputLine>,
    renderer: Arc<LineRenderer<W>>,
    epoch: Epoch,
    column: u16,
) {
    while let Some(line) = lines.recv().await {
        if let Err(err) = renderer.print_in(epoch, &line.text) {
            debug!(epoch, error = %err, "printing output failed");
        }
    }
    if let Err(err) = renderer.draw_in(epoch, |w| tui::cursor_after_prompt(w, column)) {
        debug!(epoch, error = %err, "placing cursor failed");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[derive(Clone, Default)]
    struct Screen(Arc<Mutex<Vec<u8>>>);

    impl Screen {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Screen {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn settings(args: &[&str], print_input: bool) -> Settings {
        Settings::new(
            args.iter().map(|a| a.to_string()).collect(),
            "{{}}".into(),
            ">> ".into(),
            print_input,
        )
        .unwrap()
    }

    fn app(args: &[&str], stdin: &[u8], print_input: bool) -> (App<Screen>, Screen) {
        let screen = Screen::default();
        let renderer = Arc::new(LineRenderer::new(screen.clone(), 80, 10));
        let app = App::new(settings(args, print_input), Arc::from(stdin.to_vec()), renderer);
        (app, screen)
    }

    async fn drive(app: App<Screen>, events: Vec<Event>) -> Exit {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        timeout(Duration::from_secs(10), app.run(rx))
            .await
            .expect("session should finish")
            .unwrap()
    }

    fn typed(text: &str) -> Vec<Event> {
        text.chars().map(|c| Event::Key(Key::Char(c))).collect()
    }

    #[tokio::test]
    async fn commit_prints_last_run_stdout() {
        let (app, _) = app(&["echo", "{{}}", "bar"], b"", false);
        let mut events = typed("foo");
        events.push(Event::Key(Key::Commit));
        assert_eq!(drive(app, events).await, Exit::Commit(b"foo bar\n".to_vec()));
    }

    #[tokio::test]
    async fn edits_apply_before_commit() {
        let (app, _) = app(&["echo", "{{}}"], b"", false);
        let mut events = typed("one two");
        events.push(Event::Key(Key::EraseWord));
        events.extend(typed("threx"));
        events.push(Event::Key(Key::EraseChar));
        events.push(Event::Key(Key::Char('e')));
        events.push(Event::Key(Key::Ignored));
        events.push(Event::Key(Key::Commit));
        assert_eq!(
            drive(app, events).await,
            Exit::Commit(b"one three\n".to_vec())
        );
    }

    #[tokio::test]
    async fn commit_with_empty_input_prints_nothing() {
        let (app, _) = app(&["echo", "{{}}"], b"", true);
        let mut events = typed("x");
        events.push(Event::Key(Key::EraseChar));
        events.push(Event::Key(Key::Commit));
        assert_eq!(drive(app, events).await, Exit::Commit(Vec::new()));
    }

    #[tokio::test]
    async fn escape_discards_output() {
        let (app, screen) = app(&["echo", "{{}}"], b"", false);
        let mut events = typed("foo");
        events.push(Event::Key(Key::Escape));
        assert_eq!(drive(app, events).await, Exit::Abort);
        assert!(screen.contents().ends_with("\x1b[2J\x1b[1;1H"));
    }

    #[tokio::test]
    async fn interrupt_ends_session() {
        let (app, _) = app(&["sleep", "{{}}"], b"", false);
        let mut events = typed("30");
        events.push(Event::Interrupt);
        assert_eq!(drive(app, events).await, Exit::Interrupted);
    }

    #[tokio::test]
    async fn interrupt_while_waiting_for_commit() {
        let (app, screen) = app(&["sleep", "{{}}"], b"", false);
        let mut events = typed("30");
        events.push(Event::Key(Key::Commit));
        events.push(Event::Interrupt);
        let (tx, rx) = mpsc::channel(events.len());
        for event in events {
            tx.send(event).await.unwrap();
        }
        let exit = timeout(Duration::from_secs(3), app.run(rx))
            .await
            .expect("interrupt must end a pending commit")
            .unwrap();
        assert_eq!(exit, Exit::Interrupted);
        assert!(screen.contents().ends_with("\x1b[2J\x1b[1;1H"));
    }

    #[tokio::test]
    async fn ctrl_c_key_while_waiting_for_commit() {
        let (app, _) = app(&["sleep", "{{}}"], b"", false);
        let mut events = typed("30");
        events.push(Event::Key(Key::Commit));
        events.push(Event::Key(Key::Char('x')));
        events.push(Event::Key(Key::Interrupt));
        let exit = timeout(Duration::from_secs(3), drive(app, events))
            .await
            .expect("ctrl-c must end a pending commit");
        assert_eq!(exit, Exit::Interrupted);
    }

    #[tokio::test]
    async fn keys_during_commit_wait_do_not_edit_input() {
        let (app, _) = app(&["sh", "-c", "sleep 0.2; echo {{}}"], b"", false);
        let mut events = typed("foo");
        events.push(Event::Key(Key::Commit));
        events.push(Event::Key(Key::EraseChar));
        events.push(Event::Key(Key::Char('x')));
        assert_eq!(drive(app, events).await, Exit::Commit(b"foo\n".to_vec()));
    }

    #[tokio::test]
    async fn print_input_when_command_is_silent() {
        let (app, _) = app(&["true", "{{}}"], b"", true);
        let mut events = typed("hello");
        events.push(Event::Key(Key::Commit));
        assert_eq!(drive(app, events).await, Exit::Commit(b"hello\n".to_vec()));
    }

    #[tokio::test]
    async fn prefilled_input_runs_immediately_and_uses_stdin() {
        let (app, _) = app(&["grep", "{{fo}}"], b"foo\nbar\n", false);
        let events = vec![Event::Key(Key::Char('o')), Event::Key(Key::Commit)];
        assert_eq!(drive(app, events).await, Exit::Commit(b"foo\n".to_vec()));
    }

    #[tokio::test]
    async fn launch_failure_is_shown_and_session_continues() {
        let (app, screen) = app(&["fzz-missing-{{}}", "x"], b"", false);
        let mut events = typed("a");
        events.push(Event::Key(Key::Commit));
        assert_eq!(drive(app, events).await, Exit::Commit(Vec::new()));
        assert!(screen.contents().contains("failed to start `fzz-missing-a x`"));
    }

    #[tokio::test]
    async fn closed_key_reader_aborts() {
        let (app, _) = app(&["echo", "{{}}"], b"", false);
        assert_eq!(drive(app, typed("foo")).await, Exit::Abort);
    }

    #[tokio::test]
    async fn prompt_is_redrawn_on_every_edit() {
        let (app, screen) = app(&["echo", "{{}}"], b"", false);
        let mut events = typed("ab");
        events.push(Event::Key(Key::Commit));
        drive(app, events).await;
        let contents = screen.contents();
        assert!(contents.contains(">> a"));
        assert!(contents.contains(">> ab"));
    }

    #[tokio::test]
    async fn output_reaches_the_screen() {
        let screen = Screen::default();
        let renderer = Arc::new(LineRenderer::new(screen.clone(), 80, 10));
        let app = App::new(settings(&["echo", "{{}}"], false), Arc::from(Vec::new()), renderer);
        let (tx, rx) = mpsc::channel(4);
        let session = tokio::spawn(app.run(rx));

        tx.send(Event::Key(Key::Char('z'))).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while !screen.contents().contains("\nz\n") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("output should be rendered");

        tx.send(Event::Key(Key::Escape)).await.unwrap();
        assert_eq!(session.await.unwrap().unwrap(), Exit::Abort);
    }

    #[tokio::test]
    async fn state_follows_input() {
        let (mut app, _) = app(&["echo", "{{}}"], b"", false);
        assert_eq!(app.state, State::Idle);
        app.input.push('x');
        app.refresh().unwrap();
        assert_eq!(app.state, State::Running);
        assert_eq!(app.input.as_str(), "x");
        app.input.pop_char();
        app.refresh().unwrap();
        assert_eq!(app.state, State::Idle);
    }
}
