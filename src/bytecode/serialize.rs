//! External bytecode format (spec.md §6.4): a self-contained, versioned encoding of a compiled
//! `Code` tree that round-trips through `marshal`/`unmarshal` byte-for-byte equivalent, including
//! nested function bodies, location table focus spans, and exception handlers.
//!
//! Grounded on the teacher's `bytecode::serialize` module (a flat instruction list plus a
//! constant pool, written with `postcard`), generalized from one chunk to a *tree* of chunks:
//! `Code::child_code` nests arbitrarily, so this module pre-order-flattens the tree into a single
//! `Vec<CodeNode>` where each node records only `num_children`, not explicit child indices — a
//! `FunctionDescriptor::code_index` is already a local index into its own parent's child list, so
//! flattening the outer tree never needs to renumber anything nested inside it.

use crate::intern::{Interner, StringId};

use super::code::{Code, ConstPool, Constant, ExceptionEntry, LocationEntry};

const FORMAT_VERSION: u32 = 1;

/// One flattened `Code` node, in pre-order: a node appears before all of its descendants, and
/// `num_children` tells a reader how many of the nodes immediately following (themselves
/// recursively flattened) belong to it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CodeNode {
    bytecode: Vec<u8>,
    constants: Vec<Constant>,
    location_table: Vec<LocationEntry>,
    exception_table: Vec<ExceptionEntry>,
    num_locals: u16,
    stack_size: u16,
    local_names: Vec<StringId>,
    num_children: u32,
}

/// The external bytecode format's top-level container (spec.md §6.4): a version tag, the
/// flattened code tree, and the string table its `StringId`s index into, so the encoding is
/// self-contained independent of any particular `Interner` instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CodeFile {
    version: u32,
    strings: Vec<String>,
    nodes: Vec<CodeNode>,
}

fn flatten_into(code: &Code, nodes: &mut Vec<CodeNode>) {
    let num_children = u32::try_from(code.num_children()).expect("fewer than 4 billion nested functions");
    nodes.push(CodeNode {
        bytecode: code.bytecode().to_vec(),
        constants: (0..code.constants().len())
            .map(|i| code.constants().get(u16::try_from(i).expect("fewer than 65536 constants")).clone())
            .collect(),
        location_table: code.location_table().to_vec(),
        exception_table: code.exception_table().to_vec(),
        num_locals: code.num_locals(),
        stack_size: code.stack_size(),
        local_names: code.local_names().to_vec(),
        num_children,
    });
    for index in 0..code.num_children() {
        let index = u16::try_from(index).expect("fewer than 65536 children");
        flatten_into(code.child_code(index), nodes);
    }
}

/// Reconstructs one `Code` (and, recursively, all of its descendants) from `nodes`, consuming
/// from the front in pre-order. Mirrors [`flatten_into`]'s traversal exactly.
fn unflatten(nodes: &mut std::collections::VecDeque<CodeNode>) -> Code {
    let node = nodes.pop_front().expect("unmarshal: truncated code tree");
    let children = (0..node.num_children).map(|_| std::rc::Rc::new(unflatten(nodes))).collect();
    Code::new(
        node.bytecode,
        ConstPool::from_vec(node.constants),
        node.location_table,
        node.exception_table,
        node.num_locals,
        node.stack_size,
        node.local_names,
        children,
    )
}

fn to_code_file(code: &Code, interner: &Interner) -> CodeFile {
    let mut nodes = Vec::new();
    flatten_into(code, &mut nodes);
    CodeFile { version: FORMAT_VERSION, strings: interner.strings().to_vec(), nodes }
}

fn from_code_file(file: CodeFile) -> crate::error::Result<(Code, Interner)> {
    if file.version != FORMAT_VERSION {
        return Err(crate::error::Error::runtime(format!(
            "unsupported bytecode format version {} (expected {FORMAT_VERSION})",
            file.version
        )));
    }
    let mut nodes: std::collections::VecDeque<CodeNode> = file.nodes.into();
    let code = unflatten(&mut nodes);
    if !nodes.is_empty() {
        return Err(crate::error::Error::runtime("corrupt bytecode: trailing unconsumed nodes"));
    }
    Ok((code, Interner::from_strings(file.strings)))
}

/// Encodes `code` and its interner into the compact binary external format (spec.md §6.4).
///
/// # Panics
/// Panics if `code` contains a constant that cannot be represented externally (spec.md §6.3: a
/// bound closure, native function, module, partial, error, or host value never appears in a
/// compiled constant pool in practice, so this only fires on a malformed `Code` built by hand).
#[must_use]
pub fn marshal(code: &Code, interner: &Interner) -> Vec<u8> {
    let file = to_code_file(code, interner);
    postcard::to_allocvec(&file).expect("a CodeFile always serializes to postcard")
}

/// Decodes bytes produced by [`marshal`] back into a `Code` tree and its interner.
pub fn unmarshal(bytes: &[u8]) -> crate::error::Result<(Code, Interner)> {
    let file: CodeFile = postcard::from_bytes(bytes)
        .map_err(|e| crate::error::Error::runtime(format!("corrupt bytecode: {e}")))?;
    from_code_file(file)
}

/// Encodes `code` as indented JSON, for test fixtures and debugging (spec.md §6.4 notes
/// `serde_json` as the human-readable counterpart to the binary `postcard` form).
#[must_use]
pub fn marshal_json(code: &Code, interner: &Interner) -> String {
    let file = to_code_file(code, interner);
    serde_json::to_string_pretty(&file).expect("a CodeFile always serializes to json")
}

/// Decodes a JSON encoding produced by [`marshal_json`].
pub fn unmarshal_json(text: &str) -> crate::error::Result<(Code, Interner)> {
    let file: CodeFile = serde_json::from_str(text).map_err(|e| crate::error::Error::runtime(format!("corrupt bytecode: {e}")))?;
    from_code_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::CodeBuilder;
    use crate::bytecode::op::Opcode;
    use crate::value::Value;

    fn sample() -> (Code, Interner) {
        let mut interner = Interner::new();
        interner.intern("x");
        let mut builder = CodeBuilder::new();
        let index = builder.add_const(Value::Int(42));
        builder.emit_u16(Opcode::LoadConst, index);
        builder.emit(Opcode::Return);
        (builder.build(1), interner)
    }

    #[test]
    fn postcard_round_trip_preserves_bytecode_and_strings() {
        let (code, interner) = sample();
        let bytes = marshal(&code, &interner);
        let (decoded, decoded_interner) = unmarshal(&bytes).expect("valid bytecode");
        assert_eq!(decoded.bytecode(), code.bytecode());
        assert_eq!(decoded_interner.strings(), interner.strings());
    }

    #[test]
    fn json_round_trip_preserves_bytecode() {
        let (code, interner) = sample();
        let text = marshal_json(&code, &interner);
        let (decoded, _) = unmarshal_json(&text).expect("valid json");
        assert_eq!(decoded.bytecode(), code.bytecode());
    }

    #[test]
    fn unmarshal_rejects_unknown_version() {
        let (code, interner) = sample();
        let mut file = to_code_file(&code, &interner);
        file.version = 99;
        let bytes = postcard::to_allocvec(&file).expect("serializes");
        assert!(unmarshal(&bytes).is_err());
    }
}
