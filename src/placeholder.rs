//! Markers that stand in for a sealed password in the plaintext field

use std::env;

/// Languages a marker can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    English,
    German,
}

impl Locale {
    /// Every locale whose marker is recognized on read.
    pub const ALL: [Locale; 2] = [Locale::English, Locale::German];

    pub fn marker(self) -> &'static str {
        match self {
            Locale::English => "enter new password here",
            Locale::German => "hier neues Passwort eingeben",
        }
    }

    /// Parse a language tag such as `de`, `de_DE.UTF-8` or `en-US`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let lang = tag
            .split(['_', '-', '.', '@'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match lang.as_str() {
            "en" | "c" | "posix" => Some(Locale::English),
            "de" => Some(Locale::German),
            _ => None,
        }
    }

    /// Locale of the current process, English unless the environment asks for German.
    pub fn from_env() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|name| env::var(name).ok())
            .find(|value| !value.is_empty())
            .and_then(|value| Self::from_tag(&value))
            .unwrap_or_default()
    }
}

/// Lookup table for secure markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Placeholders {
    current: Locale,
}

impl Placeholders {
    pub fn new(current: Locale) -> Self {
        Self { current }
    }

    /// True if `value` is the marker of any recognized locale.
    pub fn is_secure_marker(&self, value: &str) -> bool {
        Locale::ALL.iter().any(|locale| locale.marker() == value)
    }

    /// The marker written after sealing.
    pub fn current_marker(&self) -> &'static str {
        self.current.marker()
    }
}
