//! `String` value storage (spec.md §3.1): immutable Unicode sequence.

use std::rc::Rc;

/// Immutable, reference-counted string. Cloning is O(1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VString(Rc<str>);

impl VString {
    #[must_use]
    pub fn new(s: impl Into<Rc<str>>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    /// Returns the codepoint at `index`, already resolved against length (spec.md §3.1: "supports
    /// indexing (codepoint positions)").
    #[must_use]
    pub fn char_at(&self, index: usize) -> Option<String> {
        self.0.chars().nth(index).map(|c| c.to_string())
    }

    #[must_use]
    pub fn slice(&self, start: usize, stop: usize) -> String {
        self.0.chars().skip(start).take(stop.saturating_sub(start)).collect()
    }

    #[must_use]
    pub fn concat(&self, other: &str) -> Self {
        Self(format!("{}{}", self.0, other).into())
    }
}

impl From<&str> for VString {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for VString {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for VString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
