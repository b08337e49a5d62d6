//! Key symbols and the review actions they trigger.
//!
//! Keys are identified by symbol name (`"Q"`, `"Escape"`, `"Left"`, `"Key1"`),
//! the names of the window backend's key enum. The backend translates the host
//! platform's raw key codes, so bindings are portable.

use std::collections::HashMap;

use crate::config::{ConfigError, KeyBindings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Quit,
    Save,
    Back,
    Advance,
}

const NAMED_KEYS: &[&str] = &[
    "Down",
    "Left",
    "Right",
    "Up",
    "Apostrophe",
    "Backquote",
    "Backslash",
    "Comma",
    "Equal",
    "LeftBracket",
    "Minus",
    "Period",
    "RightBracket",
    "Semicolon",
    "Slash",
    "Backspace",
    "Delete",
    "End",
    "Enter",
    "Escape",
    "Home",
    "Insert",
    "Menu",
    "PageDown",
    "PageUp",
    "Pause",
    "Space",
    "Tab",
    "NumLock",
    "CapsLock",
    "ScrollLock",
    "LeftShift",
    "RightShift",
    "LeftCtrl",
    "RightCtrl",
    "NumPadDot",
    "NumPadSlash",
    "NumPadAsterisk",
    "NumPadMinus",
    "NumPadPlus",
    "NumPadEnter",
    "LeftAlt",
    "RightAlt",
    "LeftSuper",
    "RightSuper",
];

fn numbered(name: &str, prefix: &str, range: std::ops::RangeInclusive<u32>) -> bool {
    name.strip_prefix(prefix)
        .filter(|n| !n.starts_with('0') || n.len() == 1)
        .and_then(|n| n.parse::<u32>().ok())
        .is_some_and(|n| range.contains(&n))
}

/// Whether `name` is a key symbol the window can report.
pub fn is_known_key(name: &str) -> bool {
    let single_letter = name.len() == 1 && name.bytes().all(|b| b.is_ascii_uppercase());
    single_letter
        || NAMED_KEYS.contains(&name)
        || numbered(name, "Key", 0..=9)
        || numbered(name, "NumPad", 0..=9)
        || numbered(name, "F", 1..=15)
}

/// Validated key-name to action table.
#[derive(Debug, Clone)]
pub struct KeyMap {
    table: HashMap<String, Action>,
}

impl KeyMap {
    pub fn new(bindings: &KeyBindings) -> Result<Self, ConfigError> {
        Ok(Self {
            table: bindings.resolve()?,
        })
    }

    /// Action bound to `key`, `None` for unbound keys.
    pub fn action(&self, key: &str) -> Option<Action> {
        self.table.get(key).copied()
    }
}
