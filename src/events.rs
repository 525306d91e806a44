//! Event definitions for the interactive loop.
//!
//! This module defines the `Event` enum consumed by the coordinator and the
//! `Key` classification that turns raw terminal input into editing actions.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

const KEY_INTERRUPT: u8 = 3;
const KEY_END_OF_TRANSMISSION: u8 = 4;
const KEY_BACKSPACE: u8 = 8;
const KEY_LINE_FEED: u8 = 10;
const KEY_CARRIAGE_RETURN: u8 = 13;
const KEY_WORD_ERASE: u8 = 23;
const KEY_ESCAPE: u8 = 27;
const KEY_DELETE: u8 = 127;

/// Represents an event in the coordinator's loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A keystroke read from the terminal.
    Key(Key),
    /// An interrupt or terminate signal delivered to the process.
    Interrupt,
}

/// A keystroke, classified by what it does to the input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable character to append.
    Char(char),
    /// Backspace or delete: remove the last character.
    EraseChar,
    /// Ctrl-W: remove the last word.
    EraseWord,
    /// Enter or Ctrl-D: finish and print the command output.
    Commit,
    /// Escape: leave without output.
    Escape,
    /// Ctrl-C.
    Interrupt,
    /// Anything else.
    Ignored,
}

impl Key {
    /// Classifies a single input byte using the codes common terminal
    /// drivers produce.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            KEY_BACKSPACE | KEY_DELETE => Key::EraseChar,
            KEY_END_OF_TRANSMISSION | KEY_LINE_FEED | KEY_CARRIAGE_RETURN => Key::Commit,
            KEY_WORD_ERASE => Key::EraseWord,
            KEY_ESCAPE => Key::Escape,
            KEY_INTERRUPT => Key::Interrupt,
            other if other.is_ascii_graphic() || other == b' ' => Key::Char(other as char),
            _ => Key::Ignored,
        }
    }

    /// Classifies a decoded character. ASCII is routed through `from_byte`;
    /// other non-printable characters are ignored.
    pub fn from_char(c: char) -> Self {
        if c.is_ascii() {
            return Key::from_byte(c as u8);
        }
        if is_printable(c) {
            Key::Char(c)
        } else {
            Key::Ignored
        }
    }

    /// Maps a crossterm key event onto the same classification.
    ///
    /// Returns `None` for releases and repeats, which some platforms report
    /// in addition to presses.
    pub fn from_key_event(event: KeyEvent) -> Option<Self> {
        if event.kind != KeyEventKind::Press {
            return None;
        }
        let key = match event.code {
            KeyCode::Char(c) if event.modifiers.contains(KeyModifiers::CONTROL) => {
                if c.is_ascii_alphabetic() {
                    Key::from_byte(c.to_ascii_lowercase() as u8 & 0x1f)
                } else {
                    Key::Ignored
                }
            }
            KeyCode::Char(c) => Key::from_char(c),
            KeyCode::Backspace | KeyCode::Delete => Key::EraseChar,
            KeyCode::Enter => Key::Commit,
            KeyCode::Esc => Key::Escape,
            _ => Key::Ignored,
        };
        Some(key)
    }
}

/// Whether a non-ASCII character has a visible glyph.
///
/// Only the ASCII space counts as printable whitespace. Control, format and
/// private-use characters and noncharacters are rejected too.
fn is_printable(c: char) -> bool {
    !(c.is_control() || c.is_whitespace() || is_format(c) || is_private_or_noncharacter(c))
}

fn is_format(c: char) -> bool {
    matches!(
        c,
        '\u{ad}'
            | '\u{600}'..='\u{605}'
            | '\u{61c}'
            | '\u{6dd}'
            | '\u{70f}'
            | '\u{890}'..='\u{891}'
            | '\u{8e2}'
            | '\u{180e}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206f}'
            | '\u{feff}'
            | '\u{fff9}'..='\u{fffb}'
            | '\u{110bd}'
            | '\u{110cd}'
            | '\u{13430}'..='\u{1343f}'
            | '\u{1bca0}'..='\u{1bca3}'
            | '\u{1d173}'..='\u{1d17a}'
            | '\u{e0001}'
            | '\u{e0020}'..='\u{e007f}'
    )
}

fn is_private_or_noncharacter(c: char) -> bool {
    matches!(
        c,
        '\u{e000}'..='\u{f8ff}'
            | '\u{f0000}'..='\u{ffffd}'
            | '\u{100000}'..='\u{10fffd}'
            | '\u{fdd0}'..='\u{fdef}'
    ) || (c as u32) & 0xfffe == 0xfffe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bytes_map_to_actions() {
        assert_eq!(Key::from_byte(8), Key::EraseChar);
        assert_eq!(Key::from_byte(127), Key::EraseChar);
        assert_eq!(Key::from_byte(4), Key::Commit);
        assert_eq!(Key::from_byte(10), Key::Commit);
        assert_eq!(Key::from_byte(13), Key::Commit);
        assert_eq!(Key::from_byte(23), Key::EraseWord);
        assert_eq!(Key::from_byte(27), Key::Escape);
        assert_eq!(Key::from_byte(3), Key::Interrupt);
    }

    #[test]
    fn printable_bytes_are_appended_and_others_ignored() {
        assert_eq!(Key::from_byte(b'a'), Key::Char('a'));
        assert_eq!(Key::from_byte(b' '), Key::Char(' '));
        assert_eq!(Key::from_byte(1), Key::Ignored);
        assert_eq!(Key::from_byte(9), Key::Ignored);
        assert_eq!(Key::from_byte(0xc3), Key::Ignored);
        assert_eq!(Key::from_char('ö'), Key::Char('ö'));
        assert_eq!(Key::from_char('\u{85}'), Key::Ignored);
    }

    #[test]
    fn invisible_characters_are_ignored() {
        let invisible = [
            '\u{200b}', '\u{a0}', '\u{2028}', '\u{3000}', '\u{feff}', '\u{202e}', '\u{e000}',
            '\u{fffe}',
        ];
        for c in invisible {
            assert_eq!(Key::from_char(c), Key::Ignored, "{:?}", c);
        }
        assert_eq!(Key::from_char('€'), Key::Char('€'));
        assert_eq!(Key::from_char('字'), Key::Char('字'));
        assert_eq!(Key::from_char('\u{301}'), Key::Char('\u{301}'));
    }

    #[test]
    fn crossterm_chords_follow_control_codes() {
        let ctrl = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
        assert_eq!(Key::from_key_event(ctrl('w')), Some(Key::EraseWord));
        assert_eq!(Key::from_key_event(ctrl('d')), Some(Key::Commit));
        assert_eq!(Key::from_key_event(ctrl('c')), Some(Key::Interrupt));
        assert_eq!(Key::from_key_event(ctrl('h')), Some(Key::EraseChar));
        assert_eq!(Key::from_key_event(ctrl('a')), Some(Key::Ignored));

        let plain = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(Key::from_key_event(plain(KeyCode::Char('x'))), Some(Key::Char('x')));
        assert_eq!(Key::from_key_event(plain(KeyCode::Enter)), Some(Key::Commit));
        assert_eq!(Key::from_key_event(plain(KeyCode::Esc)), Some(Key::Escape));
        assert_eq!(Key::from_key_event(plain(KeyCode::Backspace)), Some(Key::EraseChar));
        assert_eq!(Key::from_key_event(plain(KeyCode::Left)), Some(Key::Ignored));
    }

    #[test]
    fn key_releases_are_skipped() {
        let mut event = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE);
        event.kind = KeyEventKind::Release;
        assert_eq!(Key::from_key_event(event), None);
    }
}
