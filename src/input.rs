//! The interactive input line.

/// The text typed so far.
///
/// Backed by a `String`, so every edit keeps the buffer valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBuffer {
    text: String,
}

impl InputBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of characters, used to place the cursor after the prompt.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn push(&mut self, c: char) {
        self.text.push(c);
    }

    /// Removes the last complete character. No-op on an empty buffer.
    pub fn pop_char(&mut self) {
        self.text.pop();
    }

    /// Removes the last whitespace-delimited word.
    ///
    /// The remaining words are joined by single spaces and keep one trailing
    /// space, so typing continues as a new word.
    pub fn erase_word(&mut self) {
        let mut fields: Vec<&str> = self.text.split_whitespace().collect();
        fields.pop();
        let mut rest = fields.join(" ");
        if !rest.is_empty() {
            rest.push(' ');
        }
        self.text = rest;
    }
}
