use std::str::FromStr;

/// Platform-neutral key names understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    F(u8),
    Enter,
    Escape,
    Tab,
    Space,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Shift,
    Control,
    Alt,
}

impl Key {
    /// Reload the current page.
    pub const REFRESH: Key = Key::F(5);
    /// Toggle browser full-screen.
    pub const FULLSCREEN: Key = Key::F(11);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { shift: false, control: false, alt: false };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key name: {0}")]
pub struct UnknownKey(pub String);

impl FromStr for Key {
    type Err = UnknownKey;

    /// Case-insensitive; accepts single letters/digits, F1-F24 and named keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_uppercase();
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_alphanumeric() {
                return Ok(Key::Char(c));
            }
        }
        if let Some(n) = name.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
            if (1..=24).contains(&n) {
                return Ok(Key::F(n));
            }
        }
        let key = match name.as_str() {
            "ENTER" | "RETURN" => Key::Enter,
            "ESCAPE" | "ESC" => Key::Escape,
            "TAB" => Key::Tab,
            "SPACE" => Key::Space,
            "BACKSPACE" => Key::Backspace,
            "DELETE" | "DEL" => Key::Delete,
            "UP" => Key::Up,
            "DOWN" => Key::Down,
            "LEFT" => Key::Left,
            "RIGHT" => Key::Right,
            "HOME" => Key::Home,
            "END" => Key::End,
            "PAGEUP" => Key::PageUp,
            "PAGEDOWN" => Key::PageDown,
            "SHIFT" => Key::Shift,
            "CONTROL" | "CTRL" => Key::Control,
            "ALT" => Key::Alt,
            _ => return Err(UnknownKey(s.to_string())),
        };
        Ok(key)
    }
}
