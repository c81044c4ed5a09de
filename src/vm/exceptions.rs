//! Structured unwinding (spec.md §4.5, §4.6): searches the call stack's exception tables for a
//! handler, truncates operand stacks, and resumes at the matching `catch`/`finally` target.
//!
//! Grounded on the teacher's exception-unwind loop in `bytecode::vm` (walk frames outward,
//! consult each frame's exception table, truncate the value stack to the recorded depth before
//! jumping into a handler), generalized to `ExceptionEntry`'s independent `catch`/`finally`
//! targets per spec.md §3.2.

use std::rc::Rc;

use crate::error::{Error, Result, StackFrame};
use crate::value::Value;

use super::Vm;

impl Vm {
    /// Finds the innermost handler for `err`, unwinding frames that have none. Returns `Ok(())`
    /// once a handler is set up to run next, or `Err(err)` if no frame on the stack handles it
    /// (the whole program aborts).
    pub(super) fn raise(&mut self, mut err: Error) -> Result<()> {
        if err.stack.is_empty() {
            err.stack = self.build_stack_trace();
        }
        loop {
            let Some(frame) = self.call_stack.last_mut() else {
                return Err(err);
            };
            let offset = frame.ip as u32;
            if let Some(entry) = frame.code.find_exception_handler(offset).copied() {
                frame.truncate_to(entry.stack_depth);
                self.current_exception = Some(err.clone());
                match (entry.catch, entry.finally) {
                    (Some(catch), _) => {
                        frame.push(Value::Error(Rc::new(err)));
                        frame.ip = catch as usize;
                    }
                    (None, Some(finally)) => {
                        frame.ip = finally as usize;
                    }
                    (None, None) => unreachable!("exception entry with neither catch nor finally"),
                }
                return Ok(());
            }
            self.call_stack.pop();
        }
    }

    pub(super) fn build_stack_trace(&self) -> Vec<StackFrame> {
        self.call_stack
            .iter()
            .rev()
            .map(|frame| {
                let name = frame
                    .function_name
                    .map(|id| self.interner.get(id).to_string())
                    .unwrap_or_else(|| "<anonymous>".to_string());
                let location = frame
                    .code
                    .location_for_offset(frame.ip)
                    .map(|entry| crate::error::Location::new(String::new(), entry.range.start_line, entry.range.start_column))
                    .unwrap_or_default();
                StackFrame { function_name: name, location }
            })
            .collect()
    }

    pub(super) fn op_throw(&mut self) -> Result<Option<Value>> {
        let value = self.frame_mut().pop();
        let err = match value {
            Value::Error(e) => (*e).clone(),
            other => Error::runtime(other.to_string()),
        };
        Err(err)
    }

    pub(super) fn op_reraise(&mut self) -> Result<Option<Value>> {
        match self.current_exception.clone() {
            Some(err) => Err(err),
            None => Err(Error::runtime("reraise with no active exception")),
        }
    }

    pub(super) fn op_raise_value_error(&mut self) -> Result<Option<Value>> {
        let value = self.frame_mut().pop();
        let message = match value {
            Value::String(s) => s.as_str().to_string(),
            other => other.to_string(),
        };
        Err(Error::value_error(message))
    }
}
