//! A human-readable bytecode listing, for debugging compiled `Code` (spec.md §4.2).
//!
//! Grounded on the disassembler convention in this pack's hlbc reference (offset-prefixed,
//! one-mnemonic-per-line listings with operands resolved against the surrounding constant pool),
//! adapted to this crate's variable-width opcode encoding.

use std::fmt::Write as _;

use super::code::{Code, Constant};
use super::op::Opcode;

/// Renders `code`'s bytecode as one line per instruction: offset, mnemonic, operand, and (for
/// `LoadConst`/`MakeClosure`) the constant it names. Nested function bodies are listed afterward,
/// recursively, each under a `-- function <index> --` header.
#[must_use]
pub fn disassemble(code: &Code) -> String {
    let mut out = String::new();
    disassemble_into(code, &mut out);
    out
}

fn disassemble_into(code: &Code, out: &mut String) {
    let bytecode = code.bytecode();
    let mut offset = 0usize;
    while offset < bytecode.len() {
        let start = offset;
        let op = Opcode::from_repr(bytecode[offset]).unwrap_or_else(|| panic!("invalid opcode byte {}", bytecode[offset]));
        offset += 1;
        let operand_len = op.operand_len();
        let operand_text = match operand_len {
            0 => String::new(),
            1 => format!(" {}", bytecode[offset]),
            2 => {
                let value = u16::from_le_bytes([bytecode[offset], bytecode[offset + 1]]);
                format_u16_operand(code, op, value)
            }
            other => unreachable!("opcode operand width {other} is not 0, 1, or 2 bytes"),
        };
        offset += operand_len;
        writeln!(out, "{start:6} {op}{operand_text}").expect("writing to a String never fails");
    }

    for index in 0..code.num_children() {
        let index = u16::try_from(index).expect("a code object has far fewer than 65536 children");
        writeln!(out, "-- function {index} --").expect("writing to a String never fails");
        disassemble_into(code.child_code(index), out);
    }
}

fn format_u16_operand(code: &Code, op: Opcode, value: u16) -> String {
    match op {
        Opcode::LoadConst => match code.constants().get(value) {
            Constant::Value(v) => format!(" {value} ; {v}"),
            Constant::Function(_) => format!(" {value} ; <function descriptor>"),
        },
        Opcode::MakeClosure => format!(" {value} ; function descriptor"),
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue | Opcode::ForIter => {
            let signed = value as i16;
            format!(" {signed:+}")
        }
        _ => format!(" {value}"),
    }
}
