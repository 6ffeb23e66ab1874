//! Flat `KEY=VALUE` config files
//!
//! Comments, blank lines and anything else that is not an assignment are
//! kept verbatim. Assignments that are not modified are written back exactly
//! as read; modified ones keep their quoting and `export ` prefix. Every line
//! keeps its own terminator, so CRLF files stay CRLF and a missing final
//! newline stays missing.
//!
//! Secret pairs are `<PREFIX>_SECURE_PASSWORD` / `<PREFIX>_PASSWORD`, with
//! suffix and sibling lookup case-insensitive.

use crate::context::VaultContext;
use crate::error::Result;
use crate::file_ops;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

const SECURE_SUFFIX: &str = "_SECURE_PASSWORD";
const PLAIN_SUFFIX: &str = "_PASSWORD";
const EXPORT_PREFIX: &str = "export ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    key: String,
    value: String,
    quote: Option<char>,
    export: bool,
    /// Original line without its terminator, dropped once the value changes.
    raw: Option<String>,
    /// `"\n"`, `"\r\n"` or empty for a last line without one.
    ending: String,
}

impl EnvEntry {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    fn set_value(&mut self, value: String) {
        self.value = value;
        self.raw = None;
    }

    fn render(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let export = if self.export { EXPORT_PREFIX } else { "" };
        match self.quote {
            Some(q) => format!("{}{}={}{}{}", export, self.key, q, self.value, q),
            None => format!("{}{}={}", export, self.key, self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvLine {
    /// The full line including its terminator.
    Verbatim(String),
    Entry(EnvEntry),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<EnvLine>,
}

impl EnvFile {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .split_inclusive('\n')
            .map(|chunk| {
                let body = match chunk.strip_suffix('\n') {
                    Some(line) => line.strip_suffix('\r').unwrap_or(line),
                    None => chunk,
                };
                match parse_assignment(body) {
                    Some(mut entry) => {
                        entry.ending = chunk[body.len()..].to_string();
                        EnvLine::Entry(entry)
                    }
                    None => EnvLine::Verbatim(chunk.to_string()),
                }
            })
            .collect();
        Self { lines }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                EnvLine::Verbatim(text) => out.push_str(text),
                EnvLine::Entry(entry) => {
                    out.push_str(&entry.render());
                    out.push_str(&entry.ending);
                }
            }
        }
        out
    }

    pub fn entries(&self) -> impl Iterator<Item = &EnvEntry> {
        self.lines.iter().filter_map(|line| match line {
            EnvLine::Entry(entry) => Some(entry),
            EnvLine::Verbatim(_) => None,
        })
    }

    /// Value of the last assignment to exactly `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries()
            .filter(|entry| entry.key == key)
            .last()
            .map(|entry| entry.value.as_str())
    }

    fn entry_mut(&mut self, index: usize) -> Option<&mut EnvEntry> {
        match self.lines.get_mut(index) {
            Some(EnvLine::Entry(entry)) => Some(entry),
            _ => None,
        }
    }

    /// `(secure line, plaintext line)` index pairs, in file order.
    fn pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            let EnvLine::Entry(entry) = line else {
                continue;
            };
            let Some(sibling) = plaintext_sibling(&entry.key) else {
                continue;
            };
            let found = self.lines.iter().position(|other| {
                matches!(other, EnvLine::Entry(e) if e.key.eq_ignore_ascii_case(&sibling))
            });
            match found {
                Some(j) => pairs.push((i, j)),
                None => tracing::warn!(
                    key = entry.key.as_str(),
                    "skipping secure key without plaintext sibling"
                ),
            }
        }
        pairs
    }

    /// Seal new plaintext secrets. Returns whether the file changed.
    pub fn seal_secrets(&mut self, ctx: &VaultContext) -> Result<bool> {
        let placeholders = ctx.placeholders();
        let mut changed = false;
        for (secure, plain) in self.pairs() {
            let Some(plaintext) = self.entry_mut(plain).map(|e| e.value.clone()) else {
                continue;
            };
            if plaintext.is_empty() || placeholders.is_secure_marker(&plaintext) {
                continue;
            }
            let sealed = ctx.seal(&plaintext)?;
            if let Some(entry) = self.entry_mut(secure) {
                tracing::debug!(key = entry.key.as_str(), "sealed new plaintext secret");
                entry.set_value(sealed);
            }
            if let Some(entry) = self.entry_mut(plain) {
                entry.set_value(placeholders.current_marker().to_string());
            }
            changed = true;
        }
        Ok(changed)
    }

    /// Decrypt every sealed secret into its plaintext sibling.
    pub fn open_secrets(&mut self, ctx: &VaultContext) -> Result<()> {
        for (secure, plain) in self.pairs() {
            let Some(entry) = self.entry_mut(secure) else {
                continue;
            };
            if entry.value.is_empty() {
                continue;
            }
            let key = entry.key.clone();
            let plaintext = ctx
                .open(&entry.value)
                .map_err(|e| e.with_context(format!("failed to decrypt {}", key)))?;
            if let Some(entry) = self.entry_mut(plain) {
                entry.set_value(plaintext);
            }
        }
        Ok(())
    }
}

/// Plaintext sibling of a secure key, keeping the key's prefix as written.
fn plaintext_sibling(key: &str) -> Option<String> {
    let split = key.len().checked_sub(SECURE_SUFFIX.len())?;
    let suffix = key.get(split..)?;
    if !suffix.eq_ignore_ascii_case(SECURE_SUFFIX) {
        return None;
    }
    Some(format!("{}{}", &key[..split], PLAIN_SUFFIX))
}

fn parse_assignment(line: &str) -> Option<EnvEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (body, export) = match trimmed.strip_prefix(EXPORT_PREFIX) {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    };
    let (key, value) = body.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let (value, quote) = unquote(value.trim());
    Some(EnvEntry {
        key: key.to_string(),
        value: value.to_string(),
        quote,
        export,
        raw: Some(line.to_string()),
        ending: String::new(),
    })
}

fn unquote(value: &str) -> (&str, Option<char>) {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return (&value[1..value.len() - 1], Some(q));
        }
    }
    (value, None)
}

/// Values of a loaded `.env` file with secrets decrypted.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    values: BTreeMap<String, String>,
    rewritten: bool,
}

impl EnvConfig {
    /// Load `path`, sealing new plaintext secrets on disk.
    ///
    /// Without `override_env`, keys already set in the process environment
    /// keep the environment's value. With `clean_config` the secrets are
    /// written back in plaintext and the file is always rewritten.
    ///
    /// The process environment itself is never modified: read the values
    /// through [`EnvConfig::get`] and pass them to child processes explicitly.
    pub fn load(
        ctx: &VaultContext,
        path: impl AsRef<Path>,
        override_env: bool,
        clean_config: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = match file_ops::read_config(path)? {
            Some(raw) => EnvFile::parse(&raw),
            None => EnvFile::default(),
        };

        let mut changed = file
            .seal_secrets(ctx)
            .map_err(|e| e.with_context("failed to check passwords"))?;
        if clean_config {
            file.open_secrets(ctx)
                .map_err(|e| e.with_context("failed to decode passwords"))?;
            changed = true;
        }
        if changed {
            file_ops::write_config(path, file.render().as_bytes())
                .map_err(|e| e.with_context(format!("failed to write to {}", path.display())))?;
        }
        if !clean_config {
            file.open_secrets(ctx)
                .map_err(|e| e.with_context("failed to decode passwords"))?;
        }

        let mut values = BTreeMap::new();
        for entry in file.entries() {
            let value = match env::var(&entry.key) {
                Ok(existing) if !override_env => existing,
                _ => entry.value.clone(),
            };
            values.insert(entry.key.clone(), value);
        }
        Ok(Self {
            values,
            rewritten: changed,
        })
    }

    /// Value of `key`, falling back to the process environment, then to `default`.
    pub fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .or_else(|| env::var(key).ok())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key) || env::var_os(key).is_some()
    }

    /// Whether loading rewrote the file.
    pub fn rewritten(&self) -> bool {
        self.rewritten
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
