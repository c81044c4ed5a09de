//! Host-handle value storage (spec.md §3.1, §6.2): an opaque value wrapping a host-owned
//! resource (e.g. a file handle, a socket) that scripts can hold and pass around but never
//! construct or inspect directly.
//!
//! Grounded on the teacher's `ResourceTracker`/`PrintWriter` generic host-capability parameters
//! on `VM<'_, T, P>` (host capabilities are passed in as typed Rust values, not dynamic
//! dictionaries), generalized to a type-erased handle since the embedding surface (spec.md §6.2)
//! must accept host types the VM was not compiled knowing about.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Describes a host type registered with a [`HostRegistry`]: enough to format and identify
/// values of that type without the VM depending on the concrete Rust type, plus an optional
/// hook letting the host expose a small set of settable fields (spec.md §117: "`set_attr` ...
/// supported only by structured handles and by a small set of fields on host-bridged values").
/// `None` means values of this host type reject every attribute assignment.
pub struct HostType {
    pub name: &'static str,
    pub describe: Box<dyn Fn(&dyn Any) -> String>,
    pub set_attr: Option<Box<dyn Fn(&dyn Any, &str, Value) -> Result<()>>>,
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType").field("name", &self.name).finish_non_exhaustive()
    }
}

/// The set of host types an embedding session recognizes (spec.md §6.2 "the host registers the
/// handle types it exposes before running a program").
#[derive(Default)]
pub struct HostRegistry {
    types: Vec<Rc<HostType>>,
}

impl HostRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, describe: impl Fn(&dyn Any) -> String + 'static) {
        self.register_with_attrs(name, describe, None);
    }

    /// Like [`Self::register`], additionally letting scripts assign to a fixed set of fields on
    /// this host type via `value.field = ...` (spec.md §117).
    pub fn register_with_attrs(
        &mut self,
        name: &'static str,
        describe: impl Fn(&dyn Any) -> String + 'static,
        set_attr: Option<Box<dyn Fn(&dyn Any, &str, Value) -> Result<()>>>,
    ) {
        self.types.push(Rc::new(HostType { name, describe: Box::new(describe), set_attr }));
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<Rc<HostType>> {
        self.types.iter().find(|t| t.name == name).cloned()
    }
}

/// An opaque handle to a host-owned resource, carried through the VM as an ordinary value.
#[derive(Clone)]
pub struct HostHandle {
    pub host_type: Rc<HostType>,
    payload: Rc<dyn Any>,
}

impl HostHandle {
    #[must_use]
    pub fn new<T: 'static>(host_type: Rc<HostType>, payload: T) -> Self {
        Self { host_type, payload: Rc::new(payload) }
    }

    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    #[must_use]
    pub fn describe(&self) -> String {
        (self.host_type.describe)(self.payload.as_ref())
    }

    /// Assigns `value` to `name` on this handle, per the host type's `set_attr` hook, or rejects
    /// it if the host type registered none (spec.md §117).
    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        match &self.host_type.set_attr {
            Some(setter) => setter(self.payload.as_ref(), name, value),
            None => Err(Error::type_error(format!("{} has no settable attribute {name:?}", self.host_type.name))),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle").field("type", &self.host_type.name).finish_non_exhaustive()
    }
}
