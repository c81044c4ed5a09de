//! `Add`/`Sub`/`Mul`/`Div`/`FloorDiv`/`Mod`/`Pow`/`Neg`/`Not` (spec.md §3.1).

use crate::error::Result;
use crate::value::Value;

use super::Vm;

impl Vm {
    pub(super) fn op_binary(&mut self, op: impl FnOnce(&Value, &Value) -> Result<Value>) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        let result = op(&a, &b)?;
        self.frame_mut().push(result);
        Ok(())
    }

    pub(super) fn op_neg(&mut self) -> Result<()> {
        let a = self.frame_mut().pop();
        let result = a.neg()?;
        self.frame_mut().push(result);
        Ok(())
    }

    pub(super) fn op_not(&mut self) -> Result<()> {
        let a = self.frame_mut().pop();
        self.frame_mut().push(Value::Bool(!a.truthy()));
        Ok(())
    }
}
