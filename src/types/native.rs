//! `NativeFunction` value storage (spec.md §3.1, §6.2): host-provided callables.
//!
//! Grounded on the teacher's `Callable::Builtin` dispatch (builtin functions are values that can
//! be loaded, passed around, and called through the same `CALL` opcode as user functions) and on
//! `run.rs`'s `ResourceTracker`/`PrintWriter` generic-parameter pattern for host-supplied
//! capabilities, generalized into an explicit `NativeContext` so embedders can register functions
//! without the VM depending on any particular host crate.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::value::Value;

/// The VM-side half of a native call: resource accounting and the ability to call back into a
/// script-level value (spec.md §5 "Native calls participate in the same step/stack-depth quota
/// as bytecode execution"; higher-order builtins like `range.map(f)` need to invoke `f`).
///
/// A trait, not a closure, because a native method that both charges steps and invokes a
/// callback needs more than one hook into the same `&mut Vm` at once; a trait object borrows it
/// exactly once for the call's whole duration.
pub trait NativeHost {
    fn charge_steps(&mut self, count: u64) -> Result<()>;
    fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<Value>;
}

/// Capabilities a native function gets access to while it runs: the arguments the VM already
/// popped off the operand stack, and a handle back to the host VM.
pub struct NativeContext<'a> {
    args: &'a [Value],
    host: &'a mut dyn NativeHost,
}

impl<'a> NativeContext<'a> {
    #[must_use]
    pub fn new(args: &'a [Value], host: &'a mut dyn NativeHost) -> Self {
        Self { args, host }
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        self.args
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Charges `count` steps against the calling VM's step quota, returning a cancellation or
    /// quota error if it has been exhausted (spec.md §5).
    pub fn charge_steps(&mut self, count: u64) -> Result<()> {
        self.host.charge_steps(count)
    }

    /// Calls `callee` with `args`, as if the VM itself had executed a `Call` opcode. Used by
    /// higher-order methods such as `range.map`/`filter`/`each` and `list.sort`'s comparator.
    pub fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<Value> {
        self.host.invoke(callee, args)
    }
}

pub type NativeFn = dyn Fn(&mut NativeContext) -> Result<Value>;

/// A host function value, opaque to the compiler and callable through the ordinary `CALL`
/// opcode (spec.md §3.1 "NativeFunction — a host-provided callable exposed as a value").
#[derive(Clone)]
pub struct VNative {
    pub name: Rc<str>,
    pub min_arity: usize,
    pub max_arity: Option<usize>,
    func: Rc<NativeFn>,
}

impl VNative {
    pub fn new(
        name: impl Into<Rc<str>>,
        min_arity: usize,
        max_arity: Option<usize>,
        func: impl Fn(&mut NativeContext) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            min_arity,
            max_arity,
            func: Rc::new(func),
        }
    }

    pub fn call(&self, ctx: &mut NativeContext) -> Result<Value> {
        (self.func)(ctx)
    }

    #[must_use]
    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_arity && self.max_arity.is_none_or(|max| argc <= max)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for VNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VNative").field("name", &self.name).finish_non_exhaustive()
    }
}
