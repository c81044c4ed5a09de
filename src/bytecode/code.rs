//! The compiled-code object (spec.md §3.2): bytecode, constant pool, location table, and
//! exception table for one function or top-level chunk.
//!
//! Grounded on the teacher's `bytecode::code::Code` (bytecode + `ConstPool` + `location_table` +
//! `exception_table` + `local_names`), generalized in two ways spec.md §3.2 calls for: (1) the
//! constant pool can hold `FunctionDescriptor`s that reference a *child* `Code` by index, so
//! nested functions are reachable without a separate global function table; (2) each exception
//! entry carries an optional `catch` target and an optional `finally` target, rather than the
//! teacher's single handler offset, since spec.md requires `try`/`catch`/`finally` to compose
//! independently.

use std::rc::Rc;

use crate::intern::StringId;
use crate::types::FunctionDescriptor;
use crate::value::Value;

/// A source location span within a single file (spec.md §4.6 "focus span for carets").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl CodeRange {
    #[must_use]
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self { start_line, start_column, end_line, end_column }
    }
}

/// One entry of a `Code`'s constant pool (spec.md §3.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    Value(Value),
    Function(Rc<FunctionDescriptor>),
}

/// Constant pool for a code object; `LoadConst`/`MakeClosure` operands index into it.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConstPool {
    values: Vec<Constant>,
}

impl ConstPool {
    #[must_use]
    pub fn from_vec(values: Vec<Constant>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// # Panics
    /// Panics on an out-of-bounds index; the compiler is the only producer of these indices and
    /// never emits an invalid one.
    #[must_use]
    pub fn get(&self, index: u16) -> &Constant {
        &self.values[index as usize]
    }

    #[must_use]
    pub fn get_value(&self, index: u16) -> &Value {
        match self.get(index) {
            Constant::Value(v) => v,
            Constant::Function(_) => panic!("constant {index} is a function descriptor, not a value"),
        }
    }

    #[must_use]
    pub fn get_function(&self, index: u16) -> &Rc<FunctionDescriptor> {
        match self.get(index) {
            Constant::Function(f) => f,
            Constant::Value(_) => panic!("constant {index} is a value, not a function descriptor"),
        }
    }
}

/// Maps a bytecode offset to the source range that produced it, for tracebacks and the friendly
/// error renderer (spec.md §4.6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LocationEntry {
    pub bytecode_offset: u32,
    pub range: CodeRange,
    /// A sub-span to focus the caret on (e.g. just the operator in `a + b`), when narrower than
    /// `range` is useful.
    pub focus: Option<CodeRange>,
}

impl LocationEntry {
    #[must_use]
    pub fn new(bytecode_offset: u32, range: CodeRange, focus: Option<CodeRange>) -> Self {
        Self { bytecode_offset, range, focus }
    }
}

/// A protected bytecode range with its `catch` and/or `finally` targets (spec.md §4.6).
///
/// At least one of `catch` and `finally` is set; a `try` with neither would have been optimized
/// away by the compiler.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub catch: Option<u32>,
    pub finally: Option<u32>,
    /// Operand-stack depth to unwind to before entering the handler.
    pub stack_depth: u16,
    /// Local slot the caught error is bound to, when `catch` declares a variable.
    pub catch_var: Option<u16>,
}

impl ExceptionEntry {
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// Compiled bytecode for one function or top-level chunk (spec.md §3.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Code {
    bytecode: Vec<u8>,
    constants: ConstPool,
    location_table: Vec<LocationEntry>,
    exception_table: Vec<ExceptionEntry>,
    num_locals: u16,
    stack_size: u16,
    local_names: Vec<StringId>,
    /// Nested function bodies, pre-order flattened and acyclic (spec.md §3.2): a
    /// `FunctionDescriptor`'s `code_index` indexes into this list.
    child_code: Vec<Rc<Code>>,
}

impl Code {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bytecode: Vec<u8>,
        constants: ConstPool,
        location_table: Vec<LocationEntry>,
        exception_table: Vec<ExceptionEntry>,
        num_locals: u16,
        stack_size: u16,
        local_names: Vec<StringId>,
        child_code: Vec<Rc<Code>>,
    ) -> Self {
        Self {
            bytecode,
            constants,
            location_table,
            exception_table,
            num_locals,
            stack_size,
            local_names,
            child_code,
        }
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn constants(&self) -> &ConstPool {
        &self.constants
    }

    #[must_use]
    pub fn num_locals(&self) -> u16 {
        self.num_locals
    }

    #[must_use]
    pub fn stack_size(&self) -> u16 {
        self.stack_size
    }

    #[must_use]
    pub fn local_name(&self, slot: u16) -> Option<StringId> {
        self.local_names.get(slot as usize).copied()
    }

    #[must_use]
    pub fn local_names(&self) -> &[StringId] {
        &self.local_names
    }

    #[must_use]
    pub fn location_table(&self) -> &[LocationEntry] {
        &self.location_table
    }

    #[must_use]
    pub fn exception_table(&self) -> &[ExceptionEntry] {
        &self.exception_table
    }

    #[must_use]
    pub fn num_children(&self) -> usize {
        self.child_code.len()
    }

    #[must_use]
    pub fn child_code(&self, index: u16) -> &Rc<Code> {
        &self.child_code[index as usize]
    }

    /// Finds the most recent location entry at or before `offset` (spec.md §4.6).
    #[must_use]
    pub fn location_for_offset(&self, offset: usize) -> Option<&LocationEntry> {
        let offset_u32 = u32::try_from(offset).expect("bytecode offset exceeds u32");
        self.location_table.iter().rev().find(|entry| entry.bytecode_offset <= offset_u32)
    }

    /// Finds the innermost exception-table entry covering `offset` (spec.md §4.6: entries are
    /// ordered innermost-first by construction, so the first match wins).
    #[must_use]
    pub fn find_exception_handler(&self, offset: u32) -> Option<&ExceptionEntry> {
        self.exception_table.iter().find(|entry| entry.contains(offset))
    }
}
