//! Startup settings for fzz.
//!
//! This module validates the command template and placeholder handed over by
//! the command line, and extracts a pre-filled input value from the template.

use regex::Regex;
use thiserror::Error;

/// Placeholder used when neither `--placeholder` nor `FZZ_PLACEHOLDER` is set.
pub const DEFAULT_PLACEHOLDER: &str = "{{}}";
/// Prompt drawn in front of the input line.
pub const DEFAULT_PROMPT: &str = ">> ";

/// Errors found while validating the startup configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("command needs at least two words: an executable and the placeholder")]
    TooFewArguments,

    #[error("placeholder must not be empty")]
    EmptyPlaceholder,

    #[error("placeholder '{0}' is not valid, needs an even number of characters")]
    OddPlaceholder(String),

    #[error("no placeholder '{0}' in arguments")]
    MissingPlaceholder(String),
}

/// Validated settings for one interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Command template, one entry per argument.
    pub template: Vec<String>,
    /// Token replaced by the input in every template argument.
    pub placeholder: String,
    /// Input the session starts with.
    pub initial_input: String,
    /// Prompt prefix.
    pub prompt: String,
    /// Print the typed input on commit when the command produced no output.
    pub print_input: bool,
}

impl Settings {
    /// Validates the raw command-line values and builds the session settings.
    pub fn new(
        args: Vec<String>,
        placeholder: String,
        prompt: String,
        print_input: bool,
    ) -> Result<Self, ConfigError> {
        if args.len() < 2 {
            return Err(ConfigError::TooFewArguments);
        }
        validate_placeholder(&placeholder)?;

        let (initial_input, template) = extract_input(&args, &placeholder);
        if !contains_placeholder(&template, &placeholder) {
            return Err(ConfigError::MissingPlaceholder(placeholder));
        }

        Ok(Self {
            template,
            placeholder,
            initial_input,
            prompt,
            print_input,
        })
    }
}

/// Checks that the placeholder splits evenly into a left and right half.
///
/// Length is counted in characters so the halves never split a multi-byte
/// character.
pub fn validate_placeholder(placeholder: &str) -> Result<(), ConfigError> {
    let len = placeholder.chars().count();
    if len == 0 {
        return Err(ConfigError::EmptyPlaceholder);
    }
    if len % 2 != 0 {
        return Err(ConfigError::OddPlaceholder(placeholder.to_string()));
    }
    Ok(())
}

/// Returns true if any argument contains the placeholder.
pub fn contains_placeholder(args: &[String], placeholder: &str) -> bool {
    args.iter().any(|arg| arg.contains(placeholder))
}

/// Splits a pre-filled value out of the template.
///
/// An argument like `pre{{value}}post` yields `value` as the initial input and
/// becomes `pre{{}}post`. When several arguments match, the last one wins.
/// The placeholder must already be validated.
pub fn extract_input(args: &[String], placeholder: &str) -> (String, Vec<String>) {
    let half = placeholder.chars().count() / 2;
    let split = placeholder
        .char_indices()
        .nth(half)
        .map(|(idx, _)| idx)
        .unwrap_or(placeholder.len());
    let (left, right) = placeholder.split_at(split);
    let pattern = format!(
        "^(.*){}(.*){}(.*)$",
        regex::escape(left),
        regex::escape(right)
    );
    let matcher = match Regex::new(&pattern) {
        Ok(matcher) => matcher,
        Err(_) => return (String::new(), args.to_vec()),
    };

    let mut input = String::new();
    let template = args
        .iter()
        .map(|arg| match matcher.captures(arg) {
            Some(caps) => {
                input = caps[2].to_string();
                format!("{}{}{}", &caps[1], placeholder, &caps[3])
            }
            None => arg.clone(),
        })
        .collect();

    (input, template)
}
