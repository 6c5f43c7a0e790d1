//! # Payload Sections
//!
//! The flat representation handed to the transmission agent: an ordered
//! list of named sections, each an ordered list of `key=value` entries.
//! Rendering is deterministic — same payload, same text, byte for byte.
//!
//! [`Payload::parse`] recovers section boundaries and entries from
//! rendered text (skipping free-text noise lines), backing the
//! round-trip guarantee that no non-empty field is silently dropped.

use serde::{Deserialize, Serialize};

/// One named section of `key=value` entries. Entry order is preserved
/// exactly as built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    /// Start an empty section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Append an entry only when the value is present. Absent optionals
    /// produce no entry at all — never an empty `key=`.
    pub fn entry_opt(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        if let Some(v) = value {
            self.entries.push((key.into(), v));
        }
        self
    }

    /// Look up an entry value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An ordered sequence of sections — the full payload for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub sections: Vec<Section>,
}

impl Payload {
    /// Build from an ordered section list.
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// Render to the agent's text form:
    ///
    /// ```text
    /// [name]
    /// key=value
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    /// Re-parse rendered text into sections.
    ///
    /// Lines that are neither a `[section]` header nor a `key=value`
    /// entry, and entries appearing before any header, are skipped as
    /// noise.
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(name) = line
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                sections.push(Section::new(name));
            } else if let Some((key, value)) = line.split_once('=') {
                if let Some(current) = sections.last_mut() {
                    if !key.is_empty() {
                        current
                            .entries
                            .push((key.to_string(), value.to_string()));
                    }
                }
            }
        }
        Self { sections }
    }

    /// Find a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// All non-empty `(section, key, value)` triples, in order.
    pub fn fields(&self) -> Vec<(&str, &str, &str)> {
        self.sections
            .iter()
            .flat_map(|s| {
                s.entries
                    .iter()
                    .filter(|(_, v)| !v.is_empty())
                    .map(move |(k, v)| (s.name.as_str(), k.as_str(), v.as_str()))
            })
            .collect()
    }
}
