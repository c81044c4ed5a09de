//! The frozen opcode set (spec.md §4.2, §9 "concrete opcode table").
//!
//! Grounded on the teacher's variable-width instruction encoding (1-byte opcode, 0-3 operand
//! bytes) from `bytecode::builder::CodeBuilder`, generalized from Python bytecode's operation set
//! to spec.md's value/control-flow model. Each opcode documents its operand layout and stack
//! effect; `bytecode::builder` and `vm::dispatch` are the only other places this list should be
//! read from.

/// A single bytecode operation.
///
/// The discriminant is the wire encoding (`as u8`) used by [`crate::bytecode::serialize`] and by
/// `vm::dispatch`'s opcode fetch; never reorder existing variants, only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum Opcode {
    /// No operands. Pushes `Nil`.
    LoadNil,
    /// No operands. Pushes `true`.
    LoadTrue,
    /// No operands. Pushes `false`.
    LoadFalse,
    /// `u16` constant-pool index. Pushes `constants[index]`.
    LoadConst,
    /// `u8` local slot. Pushes `locals[slot]`.
    LoadLocal,
    /// `u8` local slot. Pops and stores into `locals[slot]`.
    StoreLocal,
    /// `u16` global-table index. Pushes `globals[index]`.
    LoadGlobal,
    /// `u16` global-table index. Pops and stores into `globals[index]`.
    StoreGlobal,
    /// `u8` upvalue slot. Pushes the current closure's captured upvalue.
    LoadUpvalue,
    /// `u8` upvalue slot. Pops and stores into the current closure's captured upvalue.
    StoreUpvalue,
    /// No operands. Pops two values, pushes `a + b`.
    Add,
    /// No operands. Pops two values, pushes `a - b`.
    Sub,
    /// No operands. Pops two values, pushes `a * b`.
    Mul,
    /// No operands. Pops two values, pushes `a / b`.
    Div,
    /// No operands. Pops two values, pushes `a // b`.
    FloorDiv,
    /// No operands. Pops two values, pushes `a % b`.
    Mod,
    /// No operands. Pops two values, pushes `a ** b`.
    Pow,
    /// No operands. Pops one value, pushes `-a`.
    Neg,
    /// No operands. Pops one value, pushes `!a` (logical not, operates on truthiness).
    Not,
    /// No operands. Pops two values, pushes `a == b`.
    Eq,
    /// No operands. Pops two values, pushes `a != b`.
    Ne,
    /// No operands. Pops two values, pushes `a < b`.
    Lt,
    /// No operands. Pops two values, pushes `a <= b`.
    Le,
    /// No operands. Pops two values, pushes `a > b`.
    Gt,
    /// No operands. Pops two values, pushes `a >= b`.
    Ge,
    /// No operands. Pops one value and discards it.
    Pop,
    /// No operands. Duplicates the top of the operand stack.
    Dup,
    /// No operands. Duplicates the top two operand-stack values as a pair, preserving order
    /// (`..., a, b` becomes `..., a, b, a, b`). Used to evaluate a compound subscript assignment's
    /// container and index once while still reading and writing through them.
    Dup2,
    /// No operands. Swaps the top two operand-stack values.
    Swap,
    /// `u16` name constant-pool index (a `Constant::Value(Value::String(..))`). Pops the
    /// receiver, pushes its bound method/field or `Nil` if absent (spec.md §4.1 "get_attr").
    LoadAttr,
    /// `u16` name constant-pool index. Pops value then receiver; sets the named field.
    StoreAttr,
    /// No operands. Pops index then container; deletes `container[index]`.
    DelItem,
    /// `i16` relative offset (from the instruction after the operand). Unconditional jump.
    Jump,
    /// `i16` relative offset. Pops a value; jumps if it is falsy.
    JumpIfFalse,
    /// `i16` relative offset. Pops a value; jumps if it is truthy.
    JumpIfTrue,
    /// `u16` constant-pool index of a `FunctionDescriptor`. No operand-stack inputs: the upvalue
    /// cells are resolved directly from the current frame's locals/upvalues per the descriptor's
    /// `upvalues` list, so a captured local and the closure that captured it keep sharing the same
    /// cell. Pushes the resulting `Closure`.
    MakeClosure,
    /// `u8` argument count. Pops the callee and that many arguments (callee pushed first), pushes
    /// a new call frame.
    Call,
    /// No operands. Pops the return value, pops the current frame, pushes the return value onto
    /// the caller's stack.
    Return,
    /// `u16` count. Pops that many values and collects them into a `List`, preserving order.
    BuildList,
    /// `u16` count. Pops `2 * count` values (alternating value, key from the top) and collects
    /// them into a `Map`.
    BuildMap,
    /// No operands. Pops index then container, pushes `container[index]`.
    GetItem,
    /// No operands. Pops value, then index, then container; writes `container[index] = value`.
    SetItem,
    /// No operands. Pops stop, start, then container; pushes `container[start:stop]`.
    GetSlice,
    /// No operands. Pops an iterable value, pushes an opaque iterator `Host` handle for it.
    GetIter,
    /// `i16` relative offset. Pops the iterator, pushes `(iterator, next_value)` or, if
    /// exhausted, pushes nothing and jumps to the offset.
    ForIter,
    /// `u16` table index into the owning `Code`'s exception table. Marks entry into a protected
    /// region; purely a marker consulted by `find_exception_handler`, has no stack effect.
    SetupTry,
    /// No operands. Marks the end of a protected region; has no stack effect.
    PopTry,
    /// No operands. Pops a value and raises it as an error (spec.md §4.6 "throw").
    Throw,
    /// No operands. Re-raises the error currently being handled (bare `throw` inside `catch`).
    Reraise,
    /// No operands. Builds an `Error` value from the top of stack (a `String` message) and
    /// raises it.
    RaiseValueError,
    /// No operands. Used at the end of a `finally` block to resume whatever unwinding was in
    /// progress before the `finally` ran.
    EndFinally,
    /// No operands. Pushes the number of positional arguments the current call actually supplied,
    /// as an `Int`. Used by a function's compiled prologue to decide whether a trailing optional
    /// parameter needs its default expression evaluated.
    LoadArgCount,
    /// `u16` count. Pops that many values and joins their display forms into one `String`
    /// (spec.md §4.1 template strings render every interpolated value through `Display`).
    BuildTemplate,
    /// No operands. A placeholder instruction with no effect.
    Nop,
}

impl Opcode {
    /// Number of operand bytes this opcode consumes, for disassembly and the interpreter's
    /// instruction-pointer advance.
    #[must_use]
    pub const fn operand_len(self) -> usize {
        match self {
            Self::LoadNil
            | Self::LoadTrue
            | Self::LoadFalse
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::FloorDiv
            | Self::Mod
            | Self::Pow
            | Self::Neg
            | Self::Not
            | Self::Eq
            | Self::Ne
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::Pop
            | Self::Dup
            | Self::Dup2
            | Self::Swap
            | Self::DelItem
            | Self::Return
            | Self::GetItem
            | Self::SetItem
            | Self::GetSlice
            | Self::GetIter
            | Self::PopTry
            | Self::Throw
            | Self::Reraise
            | Self::RaiseValueError
            | Self::EndFinally
            | Self::LoadArgCount
            | Self::Nop => 0,
            Self::LoadLocal | Self::StoreLocal | Self::LoadUpvalue | Self::StoreUpvalue | Self::Call => 1,
            Self::LoadConst
            | Self::LoadGlobal
            | Self::StoreGlobal
            | Self::Jump
            | Self::JumpIfFalse
            | Self::JumpIfTrue
            | Self::MakeClosure
            | Self::BuildList
            | Self::BuildMap
            | Self::ForIter
            | Self::SetupTry
            | Self::LoadAttr
            | Self::StoreAttr
            | Self::BuildTemplate => 2,
        }
    }
}
