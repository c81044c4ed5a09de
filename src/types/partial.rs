//! `Partial` value storage (spec.md §3.1): a callable with some leading arguments pre-bound.
//!
//! Net new relative to the teacher (Python has no first-class partial-application value; Monty
//! expresses the equivalent via `functools.partial`, an external builtin). Spec.md lists `Partial`
//! as a primitive value, so it is modeled directly rather than as a library function, following
//! the same `Rc`-wrapped-immutable-data shape as the other compound values here.

use std::rc::Rc;

use crate::value::Value;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VPartial(Rc<PartialData>);

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct PartialData {
    callee: Value,
    bound_args: Vec<Value>,
}

impl VPartial {
    #[must_use]
    pub fn new(callee: Value, bound_args: Vec<Value>) -> Self {
        Self(Rc::new(PartialData { callee, bound_args }))
    }

    #[must_use]
    pub fn callee(&self) -> &Value {
        &self.0.callee
    }

    #[must_use]
    pub fn bound_args(&self) -> &[Value] {
        &self.0.bound_args
    }

    /// Builds the full argument list for a call by prepending the bound arguments to the
    /// arguments supplied at the call site (spec.md §3.1: "calling a `Partial` calls the
    /// underlying callable with the bound arguments followed by the call-site arguments").
    #[must_use]
    pub fn full_args(&self, call_site_args: &[Value]) -> Vec<Value> {
        let mut args = self.0.bound_args.clone();
        args.extend_from_slice(call_site_args);
        args
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
