//! `Eq`/`Ne`/`Lt`/`Le`/`Gt`/`Ge` (spec.md §3.1 "Equality"/"Ordering").

use crate::error::Result;
use crate::value::Value;

use super::Vm;

impl Vm {
    pub(super) fn op_eq(&mut self) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        self.frame_mut().push(Value::Bool(a.py_eq(&b)));
        Ok(())
    }

    pub(super) fn op_ne(&mut self) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        self.frame_mut().push(Value::Bool(!a.py_eq(&b)));
        Ok(())
    }

    pub(super) fn op_lt(&mut self) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        let ord = a.py_cmp(&b)?;
        self.frame_mut().push(Value::Bool(ord.is_lt()));
        Ok(())
    }

    pub(super) fn op_le(&mut self) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        let ord = a.py_cmp(&b)?;
        self.frame_mut().push(Value::Bool(ord.is_le()));
        Ok(())
    }

    pub(super) fn op_gt(&mut self) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        let ord = a.py_cmp(&b)?;
        self.frame_mut().push(Value::Bool(ord.is_gt()));
        Ok(())
    }

    pub(super) fn op_ge(&mut self) -> Result<()> {
        let b = self.frame_mut().pop();
        let a = self.frame_mut().pop();
        let ord = a.py_cmp(&b)?;
        self.frame_mut().push(Value::Bool(ord.is_ge()));
        Ok(())
    }
}
