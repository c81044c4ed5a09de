//! String interning for names referenced by bytecode (`LOAD_ATTR`, global/local name tables).
//!
//! Grounded on the teacher's `intern::Interns` table: a single append-only string pool shared
//! by the compiler and the VM, indexed by small integer ids so that name comparisons in hot
//! paths are integer comparisons rather than string comparisons.

use ahash::AHashMap;

/// Index into an [`Interner`]'s string pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct StringId(pub u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Append-only string interning table.
///
/// One `Interner` is shared by an entire compilation unit (root `Code` plus all its children).
#[derive(Debug, Default, Clone)]
pub struct Interner {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its stable id. Repeated interning of an equal string returns the
    /// same id.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.lookup.insert(s.to_owned(), id);
        id
    }

    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Rebuilds a fresh interner from a flat list of strings, preserving ids (used when
    /// unmarshalling a `Code` external form, spec.md §4.2).
    #[must_use]
    pub fn from_strings(strings: Vec<String>) -> Self {
        let mut lookup = AHashMap::default();
        for (i, s) in strings.iter().enumerate() {
            lookup.insert(s.clone(), StringId(i as u32));
        }
        Self { strings, lookup }
    }

    #[must_use]
    pub fn into_strings(self) -> Vec<String> {
        self.strings
    }

    #[must_use]
    pub fn strings(&self) -> &[String] {
        &self.strings
    }
}
