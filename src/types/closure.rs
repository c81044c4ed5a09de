//! `Closure` value storage (spec.md §3.1, §3.3, §4.5): a function paired with captured
//! free variables.
//!
//! Grounded on the teacher's `function::Function` (parameter layout + `free_var_enclosing_slots`
//! + `cell_var_count` capture bookkeeping) and its namespace-slot capture scheme, generalized to
//! the upvalue-cell model spec.md §9 calls for: "Implement upvalues as reference-counted cells
//! shared between the enclosing frame's local slot and the closure's free-variable vector".

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::code::Code;
use crate::intern::StringId;
use crate::value::Value;

/// Tells `MAKE_CLOSURE` where to source a captured variable from (spec.md §4.3/§GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpvalueDescriptor {
    /// `true`: capture from the enclosing frame's local slot `index`.
    /// `false`: capture from the enclosing closure's free-variable slot `index`.
    pub is_local: bool,
    pub index: u16,
}

/// Static description of a function: parameter layout, defaults, and which child `Code` holds
/// its body (spec.md §3.1 "Closure"/§3.2 "Function descriptors").
///
/// Stored in a `Code`'s constant pool; shared (via `Rc`) by every `Closure` created from a given
/// function literal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDescriptor {
    pub name: Option<StringId>,
    pub synthesized_name: bool,
    pub param_names: Vec<StringId>,
    /// Number of leading parameters with no default (must be satisfied by the caller).
    pub num_required: u16,
    /// Number of trailing parameters with defaults; only tail parameters may have defaults
    /// (spec.md §4.4: "only tail parameters may have defaults").
    pub num_defaults: u16,
    /// Constant values for the trailing `num_defaults` parameters, in parameter order. Folded at
    /// compile time in the enclosing scope rather than re-evaluated per call (spec.md §4.4: "compile
    /// at definition time as constants in the outer Code").
    pub defaults: Vec<Value>,
    pub has_rest: bool,
    /// Index into the owning `Code`'s child-code list (spec.md §3.2).
    pub code_index: u16,
    /// Capture plan consumed by `MAKE_CLOSURE` (spec.md §4.5).
    pub upvalues: Vec<UpvalueDescriptor>,
}

impl FunctionDescriptor {
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.param_names.len()
    }

    #[must_use]
    pub fn max_positional(&self) -> usize {
        self.param_count()
    }
}

/// A shared, mutable cell captured by one or more closures.
///
/// Writes through one reference are visible through every other reference to the same cell,
/// which is what lets an enclosing scope's reassignment show up inside a closure created over
/// it (spec.md §8 S6).
pub type Upvalue = Rc<RefCell<Value>>;

/// A function value: a [`FunctionDescriptor`] plus the child `Code` it runs, plus captured
/// upvalues.
#[derive(Debug, Clone)]
pub struct Closure {
    pub descriptor: Rc<FunctionDescriptor>,
    pub code: Rc<Code>,
    pub upvalues: Rc<Vec<Upvalue>>,
}

impl Closure {
    #[must_use]
    pub fn new(descriptor: Rc<FunctionDescriptor>, code: Rc<Code>, upvalues: Vec<Upvalue>) -> Self {
        Self {
            descriptor,
            code,
            upvalues: Rc::new(upvalues),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.descriptor, &other.descriptor) && Rc::ptr_eq(&self.upvalues, &other.upvalues)
    }
}
