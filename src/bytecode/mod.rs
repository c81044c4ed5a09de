//! Bytecode intermediate representation (spec.md §3.2, §4.2): the compiled form the compiler
//! produces and the VM executes.

pub mod builder;
pub mod code;
pub mod compiler;
pub mod disasm;
pub mod op;
pub mod serialize;

pub use code::Code;
pub use op::Opcode;
