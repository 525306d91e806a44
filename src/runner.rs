//! Process execution for a single snapshot of the input.
//!
//! This module contains the `Runner`, which substitutes the input into the
//! command template, spawns the child, and streams its stdout and stderr as
//! lines over one channel. Stdout is also captured so it can be printed once
//! the session is committed. A supervisor task owns the child and only
//! finishes after the process has exited and both stream readers are done,
//! which is what `wait` and `kill_wait` block on.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::output::{OutputLine, StreamKind};

/// Errors returned when a run cannot be started.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("command template is empty")]
    EmptyCommand,

    #[error("a run is already active")]
    AlreadyRunning,

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Builds and runs the command for one input value.
pub struct Runner {
    argv: Vec<String>,
    stdin: Arc<[u8]>,
    captured: Arc<Mutex<Vec<u8>>>,
    active: Option<ActiveRun>,
}

struct ActiveRun {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    stop_tx: watch::Sender<bool>,
    exited: Arc<AtomicBool>,
    done: JoinHandle<()>,
}

impl Runner {
    /// Creates a runner for `input`.
    ///
    /// Every occurrence of `placeholder` in every template argument is
    /// replaced by `input`. A non-empty `stdin` is fed to each run from the
    /// start.
    pub fn new(template: &[String], placeholder: &str, input: &str, stdin: Arc<[u8]>) -> Self {
        Self {
            argv: substitute(template, placeholder, input),
            stdin,
            captured: Arc::new(Mutex::new(Vec::new())),
            active: None,
        }
    }

    /// The command line, shell-quoted for display.
    pub fn command_line(&self) -> String {
        shell_words::join(&self.argv)
    }

    /// Process id of the active run, if it has one.
    pub fn pid(&self) -> Option<u32> {
        self.active.as_ref().and_then(|active| active.pid)
    }

    /// Everything the last run wrote to stdout so far.
    pub fn stdout(&self) -> Vec<u8> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawns the command and returns the merged stream of its output lines.
    ///
    /// The stream closes once both stdout and stderr reached end of file, or
    /// the run was cancelled. Nothing is left running if this fails.
    pub fn run(&mut self) -> Result<mpsc::Receiver<OutputLine>, RunError> {
        if self.active.is_some() {
            return Err(RunError::AlreadyRunning);
        }
        let (program, args) = self.argv.split_first().ok_or(RunError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if self.stdin.is_empty() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        // Own process group, so cancelling also reaches the command's children.
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            command: self.command_line(),
            source,
        })?;
        let pid = child.id();
        debug!(pid, command = %self.command_line(), "started command");

        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let (line_tx, line_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(3);

        if let Some(stdin) = child.stdin.take() {
            tasks.push(tokio::spawn(feed_stdin(
                stdin,
                Arc::clone(&self.stdin),
                stop_rx.clone(),
            )));
        }
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(stream_lines(
                stdout,
                StreamKind::Stdout,
                line_tx.clone(),
                Some(Arc::clone(&self.captured)),
                stop_rx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(stream_lines(
                stderr,
                StreamKind::Stderr,
                line_tx,
                None,
                stop_rx,
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));
        let done = tokio::spawn(supervise(child, kill_rx, tasks, Arc::clone(&exited)));

        self.active = Some(ActiveRun {
            pid,
            kill_tx: Some(kill_tx),
            stop_tx,
            exited,
            done,
        });
        Ok(line_rx)
    }

    /// Signals the active run to stop without waiting for it.
    ///
    /// The process group is killed right away and the stream readers are
    /// told to stop. The group is killed even after the command itself has
    /// exited, since its background children may still be alive.
    pub fn cancel(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let _ = active.stop_tx.send(true);
        if let Some(pid) = active.pid {
            let exited = active.exited.load(Ordering::SeqCst);
            debug!(pid, exited, "killing process group");
            kill_process_group(pid);
        }
        if let Some(kill_tx) = active.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    /// Kills the active run and waits until it is fully torn down.
    pub async fn kill_wait(&mut self) {
        self.cancel();
        self.wait().await;
    }

    /// Waits for the active run to exit on its own and for its output to
    /// be fully streamed. No-op if nothing is running.
    ///
    /// Dropping the future before it completes leaves the run in place, so
    /// it can still be cancelled afterwards.
    pub async fn wait(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Err(err) = (&mut active.done).await {
            warn!(pid = active.pid, error = %err, "run supervisor failed");
        }
        self.active = None;
    }
}

/// Replaces every occurrence of `placeholder` in every argument.
pub fn substitute(template: &[String], placeholder: &str, input: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(placeholder, input))
        .collect()
}

async fn supervise(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    tasks: Vec<JoinHandle<()>>,
    exited: Arc<AtomicBool>,
) {
    let pid = child.id();
    // A dropped runner counts as a cancellation.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(err) = child.start_kill() {
                debug!(pid, error = %err, "kill after cancellation failed");
            }
            child.wait().await
        }
    };
    exited.store(true, Ordering::SeqCst);

    match status {
        Ok(status) => debug!(pid, %status, "command exited"),
        Err(err) => warn!(pid, error = %err, "waiting for command failed"),
    }

    for task in tasks {
        if let Err(err) = task.await {
            warn!(pid, error = %err, "stream task failed");
        }
    }
    debug!(pid, "run finished");
}

async fn stream_lines<R>(
    reader: R,
    stream: StreamKind,
    tx: mpsc::Sender<OutputLine>,
    capture: Option<Arc<Mutex<Vec<u8>>>>,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = stop.changed() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            // A killed process may leave a broken stream behind.
            Err(err) => {
                debug!(?stream, error = %err, "stream read failed");
                break;
            }
        }

        if let Some(capture) = &capture {
            capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&buf);
        }

        let line = OutputLine {
            text: String::from_utf8_lossy(&buf).into_owned(),
            stream,
        };
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            sent = tx.send(line) => {
                // Nobody listens any more; keep draining so the child never
                // blocks on a full pipe.
                let _ = sent;
            }
        }
    }
}

async fn feed_stdin(mut stdin: ChildStdin, bytes: Arc<[u8]>, mut stop: watch::Receiver<bool>) {
    tokio::select! {
        biased;
        _ = stop.changed() => {}
        written = stdin.write_all(&bytes) => {
            if let Err(err) = written {
                debug!(error = %err, "writing stdin failed");
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    unsafe {
        let _ = libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
