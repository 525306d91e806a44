//! Entry point for the `fzz` binary.
//!
//! Parses command-line arguments, captures piped stdin, puts the terminal into
//! raw mode and hands keystrokes to the interactive loop. When the loop is
//! committed, the output of the last run is printed on stdout.

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fzz::app::{App, Exit};
use fzz::config::{Settings, DEFAULT_PLACEHOLDER, DEFAULT_PROMPT};
use fzz::events::{Event, Key};
use fzz::logging::{self, LogLevel};
use fzz::output::LineRenderer;
use fzz::tui::TerminalSession;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "fzz",
    version,
    about = "Run a command interactively, re-running it on every keystroke",
    after_help = "The command MUST include the placeholder, '{{}}' by default.\n\
                  Type to edit the input, Enter or Ctrl-D prints the last output, Esc quits.",
    styles = help_styles()
)]
struct Cli {
    /// Print the typed input after exiting if the command produced no output.
    #[arg(short = 'p', long)]
    print_input: bool,
    /// Token replaced by the typed input.
    #[arg(long, env = "FZZ_PLACEHOLDER", default_value = DEFAULT_PLACEHOLDER)]
    placeholder: String,
    /// Prompt shown in front of the input.
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FZZ_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,
    /// Append logs to this file.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Command template, e.g. `grep -i {{}} notes.txt`.
    #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level, cli.log_file.as_deref())?;

    let settings = Settings::new(cli.command, cli.placeholder, cli.prompt, cli.print_input)?;
    let stdin = read_piped_stdin()?;

    match run_session(settings, stdin).await? {
        Exit::Commit(output) => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&output)?;
            stdout.flush()?;
        }
        Exit::Abort => {}
        // The terminal is already restored at this point.
        Exit::Interrupted => std::process::exit(1),
    }
    Ok(())
}

// Raw mode only lasts as long as the session, so the terminal is back to
// normal before anything is printed on stdout.
async fn run_session(settings: Settings, stdin: Arc<[u8]>) -> Result<Exit> {
    let session = TerminalSession::open()?;
    let writer = session
        .writer()
        .context("failed to open terminal for writing")?;
    // The prompt takes the first row.
    let rows = session.rows().saturating_sub(1);
    let renderer = Arc::new(LineRenderer::new(
        writer,
        usize::from(session.cols()),
        usize::from(rows),
    ));

    let (event_tx, event_rx) = mpsc::channel(64);
    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx);

    App::new(settings, stdin, renderer).run(event_rx).await
}

fn read_piped_stdin() -> Result<Arc<[u8]>> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(Arc::from(Vec::new()));
    }
    let mut buf = Vec::new();
    stdin
        .read_to_end(&mut buf)
        .context("failed to read piped stdin")?;
    debug!(bytes = buf.len(), "captured piped stdin");
    Ok(Arc::from(buf))
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if tx.is_closed() {
            break;
        }
        match crossterm::event::poll(Duration::from_millis(100)) {
            Ok(true) => match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => {
                    let Some(key) = Key::from_key_event(key) else {
                        continue;
                    };
                    if tx.blocking_send(Event::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "reading terminal input failed");
                    break;
                }
            },
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "polling terminal input failed");
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(Event::Interrupt).await;
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}
