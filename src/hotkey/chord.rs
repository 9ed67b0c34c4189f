//! Key chords such as `<ctrl>+<alt>+f` and the matcher that detects them.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

impl Modifier {
    const ALL: [Modifier; 4] = [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Meta];

    fn bit(self) -> u8 {
        match self {
            Modifier::Ctrl => 1,
            Modifier::Alt => 2,
            Modifier::Shift => 4,
            Modifier::Meta => 8,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Modifier::Ctrl => "<ctrl>",
            Modifier::Alt => "<alt>",
            Modifier::Shift => "<shift>",
            Modifier::Meta => "<cmd>",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "<ctrl>" => Some(Modifier::Ctrl),
            "<alt>" => Some(Modifier::Alt),
            "<shift>" => Some(Modifier::Shift),
            "<cmd>" | "<super>" | "<meta>" => Some(Modifier::Meta),
            _ => None,
        }
    }
}

/// Set of held modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    pub fn with(self, modifier: Modifier) -> Self {
        Modifiers(self.0 | modifier.bit())
    }

    pub fn contains(self, modifier: Modifier) -> bool {
        self.0 & modifier.bit() != 0
    }
}

/// A modifier set plus exactly one letter or digit.
///
/// Modifier order does not matter: `<alt>+<ctrl>+f` equals `<ctrl>+<alt>+f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub modifiers: Modifiers,
    pub key: char,
}

impl FromStr for KeyChord {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidKeyCombination(s.to_string());
        let mut modifiers = Modifiers::default();
        let mut key = None;

        for token in s.split('+').map(|t| t.trim().to_ascii_lowercase()) {
            if let Some(modifier) = Modifier::parse(&token) {
                modifiers = modifiers.with(modifier);
                continue;
            }
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() && key.is_none() => key = Some(c),
                _ => return Err(invalid()),
            }
        }

        Ok(KeyChord {
            modifiers,
            key: key.ok_or_else(invalid)?,
        })
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in Modifier::ALL {
            if self.modifiers.contains(modifier) {
                write!(f, "{}+", modifier.token())?;
            }
        }
        write!(f, "{}", self.key)
    }
}

/// A key as seen by the matcher, independent of the input backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Modifier(Modifier),
    Char(char),
    Other,
}

/// Tracks held modifiers of one keyboard and reports completed chords.
#[derive(Debug, Default)]
pub struct ChordMatcher {
    // Left and right variants are counted separately
    held: [u8; 4],
}

impl ChordMatcher {
    fn slot(modifier: Modifier) -> usize {
        match modifier {
            Modifier::Ctrl => 0,
            Modifier::Alt => 1,
            Modifier::Shift => 2,
            Modifier::Meta => 3,
        }
    }

    fn modifiers(&self) -> Modifiers {
        Modifier::ALL
            .into_iter()
            .filter(|m| self.held[Self::slot(*m)] > 0)
            .fold(Modifiers::default(), Modifiers::with)
    }

    /// Key went down. Returns the chord completed by a letter or digit.
    pub fn press(&mut self, input: KeyInput) -> Option<KeyChord> {
        match input {
            KeyInput::Modifier(m) => {
                let slot = &mut self.held[Self::slot(m)];
                *slot = slot.saturating_add(1);
                None
            }
            KeyInput::Char(key) => Some(KeyChord {
                modifiers: self.modifiers(),
                key,
            }),
            KeyInput::Other => None,
        }
    }

    /// Key went up.
    pub fn release(&mut self, input: KeyInput) {
        if let KeyInput::Modifier(m) = input {
            let slot = &mut self.held[Self::slot(m)];
            *slot = slot.saturating_sub(1);
        }
    }
}
