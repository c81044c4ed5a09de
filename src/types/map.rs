//! `Map` value storage (spec.md §3.1): insertion-ordered string-keyed mapping.
//!
//! Grounded on the teacher's `types::dict::Dict` module (order-preserving dict backed by
//! `indexmap`), adapted to string-only keys per spec.md §3.1 ("mutable mapping from string keys
//! to values, preserving insertion order").

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct VMap(Rc<RefCell<IndexMap<String, Value>>>);

impl VMap {
    #[must_use]
    pub fn new(entries: IndexMap<String, Value>) -> Self {
        Self(Rc::new(RefCell::new(entries)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn set(&self, key: String, value: Value) {
        self.0.borrow_mut().insert(key, value);
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
