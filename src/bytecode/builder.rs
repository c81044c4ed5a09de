//! Incrementally emits bytecode during compilation (spec.md §4.2, §4.4).
//!
//! Grounded on the teacher's `bytecode::builder::CodeBuilder`: same emit-then-patch jump model,
//! same location-table recording discipline, same local-name bookkeeping for `NameError`
//! messages. Narrowed to the opcode set in [`super::op::Opcode`] and extended with a child-code
//! list, since spec.md's constant pool can hold function descriptors that point at nested `Code`.

use std::rc::Rc;

use super::code::{Code, CodeRange, Constant, ExceptionEntry, LocationEntry};
use super::op::Opcode;
use crate::intern::StringId;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    constants: Vec<Constant>,
    location_table: Vec<LocationEntry>,
    exception_table: Vec<ExceptionEntry>,
    current_location: Option<CodeRange>,
    current_focus: Option<CodeRange>,
    current_stack_depth: u16,
    max_stack_depth: u16,
    local_names: Vec<Option<StringId>>,
    child_code: Vec<Rc<Code>>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source location attributed to the next emitted instruction.
    pub fn set_location(&mut self, range: CodeRange, focus: Option<CodeRange>) {
        self.current_location = Some(range);
        self.current_focus = focus;
    }

    pub fn emit(&mut self, op: Opcode) {
        self.record_location();
        self.bytecode.push(op as u8);
    }

    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.record_location();
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.record_location();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emits a forward jump, returning a label to [`Self::patch_jump`] once the target is known.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.record_location();
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        label
    }

    /// Patches a forward jump to land at the current bytecode position.
    ///
    /// # Panics
    /// Panics if the resulting offset exceeds `i16` range; the function is too large to encode.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.bytecode.len();
        let raw_offset = target as i64 - label.0 as i64 - 3;
        let offset =
            i16::try_from(raw_offset).expect("jump offset exceeds i16 range (-32768..32767); function too large");
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0 + 1] = bytes[0];
        self.bytecode[label.0 + 2] = bytes[1];
    }

    /// Patches an already-emitted jump (typically a `continue`, compiled eagerly as a forward
    /// placeholder) to land at an arbitrary, possibly-earlier `target` offset.
    ///
    /// # Panics
    /// Panics if the resulting offset exceeds `i16` range; the function is too large to encode.
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        let raw_offset = target as i64 - label.0 as i64 - 3;
        let offset =
            i16::try_from(raw_offset).expect("jump offset exceeds i16 range (-32768..32767); function too large");
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0 + 1] = bytes[0];
        self.bytecode[label.0 + 2] = bytes[1];
    }

    /// Emits a backward jump to an already-known target (e.g. a loop header).
    ///
    /// # Panics
    /// Panics if the resulting offset exceeds `i16` range; the function is too large to encode.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        self.record_location();
        let current = self.bytecode.len();
        let raw_offset = target as i64 - (current as i64 + 3);
        let offset =
            i16::try_from(raw_offset).expect("jump offset exceeds i16 range (-32768..32767); function too large");
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    pub fn register_local_name(&mut self, slot: u16, name: StringId) {
        let slot_idx = slot as usize;
        if slot_idx >= self.local_names.len() {
            self.local_names.resize(slot_idx + 1, None);
        }
        if self.local_names[slot_idx].is_none() {
            self.local_names[slot_idx] = Some(name);
        }
    }

    /// # Panics
    /// Panics if the local-slot count exceeds `u8::MAX`; spec.md §3.3 caps a frame at 256 locals.
    pub fn emit_load_local(&mut self, slot: u16) {
        self.emit_u8(Opcode::LoadLocal, u8::try_from(slot).expect("too many locals in one frame (max 256)"));
    }

    /// # Panics
    /// Panics if the local-slot count exceeds `u8::MAX`; spec.md §3.3 caps a frame at 256 locals.
    pub fn emit_store_local(&mut self, slot: u16) {
        self.emit_u8(Opcode::StoreLocal, u8::try_from(slot).expect("too many locals in one frame (max 256)"));
    }

    /// Adds a plain value to the constant pool, returning its index.
    ///
    /// # Panics
    /// Panics if the pool exceeds 65535 entries.
    #[must_use]
    pub fn add_const(&mut self, value: Value) -> u16 {
        self.push_constant(Constant::Value(value))
    }

    /// Adds a nested function descriptor to the constant pool, returning its index.
    ///
    /// # Panics
    /// Panics if the pool exceeds 65535 entries.
    #[must_use]
    pub fn add_function_const(&mut self, descriptor: Rc<crate::types::FunctionDescriptor>) -> u16 {
        self.push_constant(Constant::Function(descriptor))
    }

    fn push_constant(&mut self, constant: Constant) -> u16 {
        let idx = self.constants.len();
        u16::try_from(idx).expect("constant pool exceeds u16 range (65535); too many constants");
        self.constants.push(constant);
        idx as u16
    }

    /// Registers a nested function's compiled body, returning the index `code_index` that its
    /// `FunctionDescriptor` should use (spec.md §3.2).
    ///
    /// # Panics
    /// Panics if the child-code list exceeds 65535 entries.
    #[must_use]
    pub fn add_child_code(&mut self, code: Code) -> u16 {
        let idx = self.child_code.len();
        u16::try_from(idx).expect("too many nested functions in one scope (max 65536)");
        self.child_code.push(Rc::new(code));
        idx as u16
    }

    pub fn add_exception_entry(&mut self, entry: ExceptionEntry) {
        self.exception_table.push(entry);
    }

    /// Adjusts the tracked operand-stack depth by `delta`, updating the high-water mark used as
    /// `Code::stack_size` (spec.md §3.2 "hint for pre-allocating the operand stack").
    pub fn adjust_stack(&mut self, delta: i32) {
        let depth = i32::from(self.current_stack_depth) + delta;
        self.current_stack_depth = u16::try_from(depth.max(0)).unwrap_or(u16::MAX);
        self.max_stack_depth = self.max_stack_depth.max(self.current_stack_depth);
    }

    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        self.current_stack_depth
    }

    #[must_use]
    pub fn build(self, num_locals: u16) -> Code {
        let local_names: Vec<StringId> = self.local_names.into_iter().map(Option::unwrap_or_default).collect();
        Code::new(
            self.bytecode,
            super::code::ConstPool::from_vec(self.constants),
            self.location_table,
            self.exception_table,
            num_locals,
            self.max_stack_depth,
            local_names,
            self.child_code,
        )
    }

    fn record_location(&mut self) {
        if let Some(range) = self.current_location {
            self.location_table.push(LocationEntry::new(self.bytecode.len() as u32, range, self.current_focus));
        }
    }
}

/// A forward jump awaiting [`CodeBuilder::patch_jump`].
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNil);
        builder.emit(Opcode::Pop);

        let code = builder.build(0);
        assert_eq!(code.bytecode(), &[Opcode::LoadNil as u8, Opcode::Pop as u8]);
    }

    #[test]
    fn emit_u8_operand() {
        let mut builder = CodeBuilder::new();
        builder.emit_u8(Opcode::LoadLocal, 42);

        let code = builder.build(0);
        assert_eq!(code.bytecode(), &[Opcode::LoadLocal as u8, 42]);
    }

    #[test]
    fn emit_u16_operand() {
        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::LoadConst, 0x1234);

        let code = builder.build(0);
        assert_eq!(code.bytecode(), &[Opcode::LoadConst as u8, 0x34, 0x12]);
    }

    #[test]
    fn forward_jump() {
        let mut builder = CodeBuilder::new();
        let jump = builder.emit_jump(Opcode::Jump);
        builder.emit(Opcode::LoadNil);
        builder.emit(Opcode::Pop);
        builder.patch_jump(jump);
        builder.emit(Opcode::Return);

        let code = builder.build(0);
        assert_eq!(
            code.bytecode(),
            &[Opcode::Jump as u8, 2, 0, Opcode::LoadNil as u8, Opcode::Pop as u8, Opcode::Return as u8]
        );
    }

    #[test]
    fn backward_jump() {
        let mut builder = CodeBuilder::new();
        let loop_start = builder.current_offset();
        builder.emit(Opcode::LoadNil);
        builder.emit(Opcode::Pop);
        builder.emit_jump_to(Opcode::Jump, loop_start);

        let code = builder.build(0);
        let expected_offset = (-5i16).to_le_bytes();
        assert_eq!(
            code.bytecode(),
            &[Opcode::LoadNil as u8, Opcode::Pop as u8, Opcode::Jump as u8, expected_offset[0], expected_offset[1]]
        );
    }

    #[test]
    fn add_const_returns_sequential_indices() {
        let mut builder = CodeBuilder::new();
        let idx1 = builder.add_const(Value::Int(42));
        let idx2 = builder.add_const(Value::Nil);

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);

        let code = builder.build(0);
        assert_eq!(code.constants().len(), 2);
    }
}
