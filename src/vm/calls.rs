//! `Call`/`Return` (spec.md §3.4, §4.4, §5): argument binding, frame push/pop, and the native-
//! function boundary through which quota accounting flows.
//!
//! Grounded on the teacher's call-frame setup (bind positional args into the callee's locals,
//! push a frame, run the callee's own default-argument prologue) and on `NativeContext`'s
//! `charge_steps` hook (spec.md §5: "native calls participate in the same step/stack-depth quota
//! as bytecode execution").

use crate::bytecode::op::Opcode;
use crate::error::{Error, Result};
use crate::types::{Closure, NativeContext, NativeHost, VList, VNative, VPartial};
use crate::value::Value;

use super::frame::Frame;
use super::Vm;

impl NativeHost for Vm {
    fn charge_steps(&mut self, count: u64) -> Result<()> {
        self.steps += count;
        if self.quotas.max_steps.is_some_and(|max| self.steps > max) {
            return Err(Error::runtime("step quota exceeded"));
        }
        Ok(())
    }

    fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<Value> {
        self.call_value(callee, args)
    }
}

impl Vm {
    pub(super) fn op_call(&mut self, argc: u8) -> Result<()> {
        let args = self.frame_mut().pop_n(argc as usize);
        let callee = self.frame_mut().pop();
        self.invoke(callee, args)
    }

    pub(super) fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<()> {
        match callee {
            Value::Closure(closure) => self.invoke_closure(closure, args),
            Value::NativeFunction(native) => {
                let result = self.invoke_native(&native, &args)?;
                self.frame_mut().push(result);
                Ok(())
            }
            Value::Partial(partial) => self.invoke_partial(&partial, args),
            other => Err(Error::type_error(format!("{} is not callable", other.type_name()))),
        }
    }

    fn invoke_partial(&mut self, partial: &VPartial, call_site_args: Vec<Value>) -> Result<()> {
        let full_args = partial.full_args(&call_site_args);
        self.invoke(partial.callee().clone(), full_args)
    }

    fn invoke_native(&mut self, native: &VNative, args: &[Value]) -> Result<Value> {
        if !native.accepts(args.len()) {
            return Err(Error::type_error(format!(
                "{} expects {}..{} arguments, got {}",
                native.name,
                native.min_arity,
                native.max_arity.map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
                args.len()
            )));
        }
        self.observer.on_call(Some(native.name.as_ref()));
        let mut ctx = NativeContext::new(args, self);
        let result = native.call(&mut ctx);
        self.observer.on_return();
        result
    }

    /// Calls a script-level value from inside a native method (e.g. `range.map(f)` or
    /// `list.sort`'s comparator), driving a nested fetch-decode-execute loop when `callee` is a
    /// closure rather than another native function (spec.md §5: "native calls participate in the
    /// same step/stack-depth quota as bytecode execution").
    pub(super) fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value> {
        let depth = self.call_stack.len();
        self.invoke(callee, args)?;
        if self.call_stack.len() == depth {
            return Ok(self.frame_mut().pop());
        }
        self.run_until_depth(depth)
    }

    /// Drives the fetch-decode-execute loop until the frame pushed on top of `depth` returns,
    /// without letting that return value fall through to whatever bytecode frame is sitting at
    /// `depth` (ordinary `Return` handling would push it there, as if a `Call` opcode had made
    /// the call, which isn't the case here).
    fn run_until_depth(&mut self, depth: usize) -> Result<Value> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::runtime("execution cancelled"));
            }
            if let Some(err) = self.check_quotas() {
                if let Err(propagated) = self.raise(err) {
                    return Err(propagated);
                }
                continue;
            }

            let op = self.frame_mut().fetch_op();
            if op == Opcode::Return && self.call_stack.len() == depth + 1 {
                let value = self.frame_mut().pop();
                self.call_stack.pop();
                self.observer.on_return();
                return Ok(value);
            }
            match self.execute(op) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => {
                    self.observer.on_error(&err);
                    if let Err(propagated) = self.raise(err) {
                        return Err(propagated);
                    }
                }
            }
        }
    }

    fn invoke_closure(&mut self, closure: Closure, args: Vec<Value>) -> Result<()> {
        if self.quotas.max_stack_depth.is_some_and(|max| self.call_stack.len() >= max) {
            return Err(Error::runtime("stack overflow: call depth exceeded"));
        }

        let descriptor = &closure.descriptor;
        let required = descriptor.num_required as usize;
        let fixed_count = descriptor.param_count();
        let max_positional = descriptor.max_positional();
        if args.len() < required || (!descriptor.has_rest && args.len() > max_positional) {
            let name = descriptor.name.map(|id| self.interner.get(id).to_string()).unwrap_or_else(|| "<anonymous>".to_string());
            return Err(Error::type_error(format!(
                "{name} expects {required}..{max_positional} arguments, got {}",
                args.len()
            )));
        }

        let args_supplied = u16::try_from(args.len()).unwrap_or(u16::MAX);
        let function_name = descriptor.name;
        let descriptor = closure.descriptor.clone();
        let frame = Frame::new(closure.code, closure.upvalues, args_supplied, function_name);

        for (slot, value) in args.iter().take(fixed_count).enumerate() {
            *frame.locals[slot].borrow_mut() = value.clone();
        }
        for slot in args.len()..fixed_count {
            let default = &descriptor.defaults[slot - required];
            *frame.locals[slot].borrow_mut() = default.clone();
        }
        if descriptor.has_rest {
            let rest = if args.len() > fixed_count { args[fixed_count..].to_vec() } else { Vec::new() };
            *frame.locals[fixed_count].borrow_mut() = Value::List(VList::new(rest));
        }

        self.observer.on_call(function_name.map(|id| self.interner.get(id)));
        self.call_stack.push(frame);
        Ok(())
    }

    pub(super) fn op_return(&mut self) -> Result<Option<Value>> {
        let value = self.frame_mut().pop();
        self.call_stack.pop();
        self.observer.on_return();
        if self.call_stack.is_empty() {
            Ok(Some(value))
        } else {
            self.frame_mut().push(value);
            Ok(None)
        }
    }
}
