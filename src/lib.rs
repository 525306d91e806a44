//! fzz: run a command interactively.
//!
//! The command template is re-run on every keystroke with the placeholder
//! replaced by the typed input, and its output is streamed below the prompt.
//! Committing with Enter prints the output of the last run on stdout.

pub mod app;
pub mod config;
pub mod events;
pub mod input;
pub mod logging;
pub mod output;
pub mod runner;
pub mod tui;
