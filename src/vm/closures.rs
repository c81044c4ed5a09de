//! `MakeClosure` (spec.md §4.3, §4.5): builds a closure's upvalue vector directly from the
//! current frame, per the capture plan its `FunctionDescriptor` recorded at compile time.

use std::rc::Rc;

use crate::error::Result;
use crate::types::{Closure, Upvalue};
use crate::value::Value;

use super::Vm;

impl Vm {
    pub(super) fn op_make_closure(&mut self, const_index: u16) -> Result<()> {
        let frame = self.frame();
        let descriptor = Rc::clone(frame.code.constants().get_function(const_index));
        let child_code = Rc::clone(frame.code.child_code(descriptor.code_index));
        let upvalues: Vec<Upvalue> = descriptor
            .upvalues
            .iter()
            .map(|capture| {
                if capture.is_local {
                    Rc::clone(&frame.locals[capture.index as usize])
                } else {
                    Rc::clone(&frame.upvalues[capture.index as usize])
                }
            })
            .collect();
        let closure = Closure::new(descriptor, child_code, upvalues);
        self.frame_mut().push(Value::Closure(closure));
        Ok(())
    }
}
