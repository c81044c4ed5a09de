//! `GetIter`/`ForIter` support (spec.md §4.4): per-type iteration state, carried through the VM
//! as an ordinary `Host` value.
//!
//! Grounded on the teacher's generator-as-iterator convention (iteration state lives behind an
//! opaque handle the bytecode never inspects directly) and on this crate's own `HostHandle`
//! machinery (`types::host`), reused here for a VM-internal purpose rather than a host-exposed
//! one: an iterator never needs to cross the embedding boundary, but the handle shape already
//! does everything an iterator cell needs (type-erased payload, cheap `Rc` clone).

use std::cell::RefCell;

use crate::types::{VBytes, VList, VRangeIter, VString};
use crate::value::Value;

pub(super) enum IterState {
    List { list: VList, index: usize },
    String { string: VString, index: usize },
    Bytes { bytes: VBytes, index: usize },
    Range { iter: VRangeIter },
    /// A `Map` iterates its keys, not its entries (spec.md is silent on map iteration order, but
    /// `map.keys()` is the only ordering every caller can already rely on).
    MapKeys { keys: Vec<String>, index: usize },
}

impl IterState {
    pub fn next(&mut self) -> Option<Value> {
        match self {
            Self::List { list, index } => {
                let value = list.get(*index);
                if value.is_some() {
                    *index += 1;
                }
                value
            }
            Self::String { string, index } => {
                let value = string.char_at(*index).map(|c| Value::String(VString::new(c)));
                if value.is_some() {
                    *index += 1;
                }
                value
            }
            Self::Bytes { bytes, index } => {
                let value = bytes.get(*index).map(Value::Byte);
                if value.is_some() {
                    *index += 1;
                }
                value
            }
            Self::Range { iter } => iter.next().map(Value::Int),
            Self::MapKeys { keys, index } => {
                let value = keys.get(*index).map(|k| Value::String(VString::new(k.clone())));
                if value.is_some() {
                    *index += 1;
                }
                value
            }
        }
    }
}

pub(super) type IterCell = RefCell<IterState>;

pub(super) const ITERATOR_HOST_TYPE_NAME: &str = "__iterator";
