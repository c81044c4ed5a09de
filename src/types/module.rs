//! `Module` value storage (spec.md §3.1, §6.2): a named, read-only namespace produced by the
//! host's import resolution.
//!
//! Grounded on the teacher's `modules::os` (a fixed namespace of builtin bindings surfaced as a
//! value), generalized to a host-populated, order-preserving namespace rather than a hardcoded
//! builtin table, since import resolution is explicitly an external collaborator (spec.md §6.2).

use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VModule(Rc<ModuleData>);

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ModuleData {
    name: String,
    bindings: IndexMap<String, Value>,
}

impl VModule {
    #[must_use]
    pub fn new(name: impl Into<String>, bindings: IndexMap<String, Value>) -> Self {
        Self(Rc::new(ModuleData { name: name.into(), bindings }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.bindings.get(key).cloned()
    }

    #[must_use]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.bindings.keys().map(String::as_str)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
