//! `LoadAttr`/`StoreAttr` (spec.md §4.1 "Attributes").

use crate::error::Result;
use crate::value::Value;

use super::Vm;

impl Vm {
    pub(super) fn op_load_attr(&mut self, name_index: u16) -> Result<()> {
        let name = self.frame().code.constants().get_value(name_index).clone();
        let Value::String(name) = name else { unreachable!("LoadAttr name constant must be a string") };
        let receiver = self.frame_mut().pop();
        let attr = receiver.get_attr(name.as_str()).unwrap_or(Value::Nil);
        self.frame_mut().push(attr);
        Ok(())
    }

    pub(super) fn op_store_attr(&mut self, name_index: u16) -> Result<()> {
        let name = self.frame().code.constants().get_value(name_index).clone();
        let Value::String(name) = name else { unreachable!("StoreAttr name constant must be a string") };
        let value = self.frame_mut().pop();
        let receiver = self.frame_mut().pop();
        receiver.set_attr(name.as_str(), value)
    }
}
