//! Compound runtime value types (spec.md §3.1).
//!
//! Each submodule owns one heap-shaped `Value` variant's storage and the operations the value
//! system (`crate::value`) dispatches into. Mutable containers wrap `Rc<RefCell<..>>`; immutable
//! ones wrap a bare `Rc<..>`. This mirrors the teacher's per-type modules (`types::list`,
//! `types::dict`, `types::bytes`) but drops the teacher's arena/heap-id indirection in favor of
//! ordinary reference counting, since spec.md §1 explicitly makes the host's ownership model
//! (here: Rust's `Rc`) the only memory manager in scope.

pub mod bytes;
pub mod closure;
pub mod host;
pub mod list;
pub mod map;
pub mod module;
pub mod native;
pub mod partial;
pub mod range;
pub mod string;

pub use bytes::VBytes;
pub use closure::{Closure, FunctionDescriptor, Upvalue, UpvalueDescriptor};
pub use host::{HostHandle, HostRegistry, HostType};
pub use list::VList;
pub use map::VMap;
pub use module::VModule;
pub use native::{NativeContext, NativeFn, NativeHost, VNative};
pub use partial::VPartial;
pub use range::{VRange, VRangeIter};
pub use string::VString;

/// Resolves a possibly-negative index against a container of length `len`.
///
/// Returns `None` if the resulting index is still out of bounds after the adjustment.
#[must_use]
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len_i = len as i64;
    let resolved = if index < 0 { index + len_i } else { index };
    if resolved < 0 || resolved >= len_i {
        None
    } else {
        Some(resolved as usize)
    }
}

/// Resolves a slice `(start?, stop?)` pair against a container of length `len`, clamping both
/// ends into range rather than erroring (spec.md §4.1: "omitted endpoints meaning 0 and length").
#[must_use]
pub fn normalize_slice(start: Option<i64>, stop: Option<i64>, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let clamp = |v: i64| -> i64 { v.clamp(0, len_i) };
    let resolve = |v: i64| -> i64 {
        if v < 0 {
            clamp(v + len_i)
        } else {
            clamp(v)
        }
    };
    let start = start.map_or(0, resolve);
    let stop = stop.map_or(len_i, resolve);
    (start as usize, stop.max(start) as usize)
}
