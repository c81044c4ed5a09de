//! `List` value storage (spec.md §3.1): mutable ordered sequence.
//!
//! Grounded on the teacher's `types::list::List` (Vec-backed, append/insert/remove/extend/
//! reverse/sort methods), adapted to plain `Rc<RefCell<Vec<Value>>>` sharing.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct VList(Rc<RefCell<Vec<Value>>>);

impl VList {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
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
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        let mut items = self.0.borrow_mut();
        if let Some(slot) = items.get_mut(index) {
            *slot = value;
            true
        } else {
            false
        }
    }

    pub fn delete(&self, index: usize) -> Option<Value> {
        let mut items = self.0.borrow_mut();
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    pub fn append(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    pub fn insert(&self, index: usize, value: Value) {
        let mut items = self.0.borrow_mut();
        let index = index.min(items.len());
        items.insert(index, value);
    }

    pub fn remove_value(&self, value: &Value) -> bool {
        let mut items = self.0.borrow_mut();
        if let Some(pos) = items.iter().position(|v| v.py_eq(value)) {
            items.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn extend(&self, other: impl IntoIterator<Item = Value>) {
        self.0.borrow_mut().extend(other);
    }

    pub fn reverse(&self) {
        self.0.borrow_mut().reverse();
    }

    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        Self::new(self.0.borrow().clone())
    }

    /// Sorts in place using `compare` to order two elements; `compare` returns `true` if `a`
    /// should sort before `b` (spec.md §3.1: "sort (with optional comparator)").
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> bool) {
        let mut items = self.0.borrow_mut();
        items.sort_by(|a, b| if compare(a, b) { std::cmp::Ordering::Less } else { std::cmp::Ordering::Greater });
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn slice(&self, start: usize, stop: usize) -> Vec<Value> {
        let items = self.0.borrow();
        items[start..stop.min(items.len())].to_vec()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
