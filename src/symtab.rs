//! The symbol table (spec.md §3.3, §4.3): scope tracking, binding resolution, and upvalue
//! capture analysis.
//!
//! Grounded on the teacher's scope/namespace split — `namespace.rs`'s slot-based local
//! addressing and the compiler's `cell_var_count`/`free_var_enclosing_slots` upvalue
//! bookkeeping in `function.rs` — generalized from the teacher's three binding kinds
//! (local/cell/free) to spec.md §3.3's five (`global`, `local`, `free`, `constant`, `builtin`),
//! since the source language hoists top-level `let`/`const` the way the teacher's Python dialect
//! does not.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::types::UpvalueDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// A name declared in `embed::Options.env` or hoisted by a top-level `let`/function
    /// declaration; addressed through the globals array.
    Global,
    /// A name local to the current function's frame.
    Local,
    /// A name captured from an enclosing function's frame, addressed through the current
    /// closure's upvalue vector.
    Free,
    /// A top-level `const` binding; like `Global`, but assignment to it is a compile error.
    Constant,
    /// A name not declared anywhere in the program, resolved against the host-declared name
    /// table (spec.md §6.2 "env") purely by being present there.
    Builtin,
}

#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub kind: BindingKind,
    pub slot: u16,
    pub mutable: bool,
}

struct BlockScope {
    locals: IndexMap<String, (u16, bool)>,
}

struct FunctionScope {
    blocks: Vec<BlockScope>,
    next_slot: u16,
    upvalues: Vec<UpvalueDescriptor>,
    upvalue_names: IndexMap<String, u16>,
}

impl FunctionScope {
    fn new() -> Self {
        Self { blocks: vec![BlockScope { locals: IndexMap::new() }], next_slot: 0, upvalues: Vec::new(), upvalue_names: IndexMap::new() }
    }

    fn declare(&mut self, name: &str, mutable: bool) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.blocks.last_mut().expect("function scope always has a block").locals.insert(name.to_string(), (slot, mutable));
        slot
    }

    fn resolve_local(&self, name: &str) -> Option<(u16, bool)> {
        self.blocks.iter().rev().find_map(|block| block.locals.get(name).copied())
    }

    /// Adds (or reuses) an upvalue capturing `descriptor`, returning its slot in this function's
    /// upvalue vector.
    fn add_upvalue(&mut self, name: &str, descriptor: UpvalueDescriptor) -> u16 {
        if let Some(&slot) = self.upvalue_names.get(name) {
            return slot;
        }
        let slot = u16::try_from(self.upvalues.len()).expect("too many captured variables in one function");
        self.upvalues.push(descriptor);
        self.upvalue_names.insert(name.to_string(), slot);
        slot
    }
}

/// Bookkeeping handed back when a function scope closes, used to size the frame and populate its
/// `FunctionDescriptor` (spec.md §3.2/§3.3).
pub struct ClosedFunctionScope {
    pub num_locals: u16,
    pub upvalues: Vec<UpvalueDescriptor>,
}

struct GlobalSlot {
    slot: u16,
    mutable: bool,
    is_builtin: bool,
}

/// All globals — host-declared builtins and script-level `let`/`const`/function declarations —
/// share one slot space, since `LoadGlobal`/`StoreGlobal` address a single array (spec.md §4.2).
/// Builtins are seeded first, at construction, so the host can populate `globals[0..builtin_count]`
/// before the VM ever runs a frame.
pub struct SymbolTable {
    functions: Vec<FunctionScope>,
    globals: IndexMap<String, GlobalSlot>,
}

impl SymbolTable {
    #[must_use]
    pub fn new(builtin_names: &[String]) -> Self {
        let globals = builtin_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), GlobalSlot { slot: i as u16, mutable: false, is_builtin: true }))
            .collect();
        Self { functions: vec![FunctionScope::new()], globals }
    }

    /// Reserves a global slot for a name ahead of its first use (spec.md §4.3 "hoisted"). Returns
    /// the existing slot if the name was already declared (re-declaration at global scope is
    /// allowed only for hoisted function forward-declarations, which call this with the same
    /// name twice).
    pub fn declare_global(&mut self, name: &str, mutable: bool) -> Result<u16> {
        if let Some(slot) = self.globals.get(name) {
            return Ok(slot.slot);
        }
        let slot = u16::try_from(self.globals.len()).map_err(|_| Error::compile_error("too many global bindings"))?;
        self.globals.insert(name.to_string(), GlobalSlot { slot, mutable, is_builtin: false });
        Ok(slot)
    }

    #[must_use]
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Global names ordered by slot, for the embedding API's `global_names()`/`get(name)`
    /// (spec.md §6.2).
    #[must_use]
    pub fn global_names(&self) -> Vec<String> {
        let mut named: Vec<(u16, &str)> = self.globals.iter().map(|(name, slot)| (slot.slot, name.as_str())).collect();
        named.sort_by_key(|(slot, _)| *slot);
        named.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    /// The number of local slots used by the outermost (never explicitly entered) function scope
    /// that backs the compiled program's own chunk.
    #[must_use]
    pub fn root_num_locals(&self) -> u16 {
        self.functions[0].next_slot
    }

    pub fn enter_function(&mut self) {
        self.functions.push(FunctionScope::new());
    }

    /// Closes the innermost function scope.
    ///
    /// # Panics
    /// Panics if called with no open function scope (every `enter_function` must be paired).
    pub fn exit_function(&mut self) -> ClosedFunctionScope {
        let scope = self.functions.pop().expect("exit_function without matching enter_function");
        ClosedFunctionScope { num_locals: scope.next_slot, upvalues: scope.upvalues }
    }

    pub fn enter_block(&mut self) {
        self.current_function().blocks.push(BlockScope { locals: IndexMap::new() });
    }

    /// # Panics
    /// Panics if called with no open block in the current function scope.
    pub fn exit_block(&mut self) {
        self.current_function().blocks.pop().expect("exit_block without matching enter_block");
    }

    fn current_function(&mut self) -> &mut FunctionScope {
        self.functions.last_mut().expect("symbol table always has at least one function scope")
    }

    /// Declares a new local binding in the innermost block of the current function, returning
    /// its slot.
    pub fn declare_local(&mut self, name: &str, mutable: bool) -> u16 {
        self.current_function().declare(name, mutable)
    }

    /// Resolves `name` to a binding, walking outward through enclosing blocks, then enclosing
    /// functions (recording upvalue captures along the way), then the global table, then the
    /// host-declared builtin table (spec.md §4.3).
    pub fn resolve(&mut self, name: &str) -> Result<Binding> {
        let depth = self.functions.len();
        if let Some((slot, mutable)) = self.functions[depth - 1].resolve_local(name) {
            return Ok(Binding { kind: BindingKind::Local, slot, mutable });
        }

        if let Some(slot) = self.resolve_as_upvalue(depth - 1, name) {
            return Ok(Binding { kind: BindingKind::Free, slot, mutable: true });
        }

        if let Some(g) = self.globals.get(name) {
            let kind = match (g.is_builtin, g.mutable) {
                (true, _) => BindingKind::Builtin,
                (false, true) => BindingKind::Global,
                (false, false) => BindingKind::Constant,
            };
            return Ok(Binding { kind, slot: g.slot, mutable: g.mutable });
        }

        Err(Error::undefined_variable(name))
    }

    /// Walks outward from `start` looking for `name` in an enclosing function's locals or
    /// upvalues, threading an `UpvalueDescriptor` through every intervening function scope
    /// (spec.md §4.3: "record the outer binding as an upvalue of every intervening function").
    fn resolve_as_upvalue(&mut self, start: usize, name: &str) -> Option<u16> {
        if start == 0 {
            return None;
        }
        let outer = start - 1;
        let found_local = self.functions[outer].resolve_local(name);
        let source = if let Some((slot, _)) = found_local {
            UpvalueDescriptor { is_local: true, index: slot }
        } else {
            let outer_slot = self.resolve_as_upvalue(outer, name)?;
            UpvalueDescriptor { is_local: false, index: outer_slot }
        };
        Some(self.functions[start].add_upvalue(name, source))
    }

    /// Validates that assignment to `name` is legal, per spec.md §4.3
    /// `CompileError("cannot assign to constant X")`.
    pub fn check_assignable(&mut self, name: &str) -> Result<Binding> {
        let binding = self.resolve(name)?;
        if !binding.mutable {
            return Err(Error::compile_error(format!("cannot assign to constant {name}")));
        }
        Ok(binding)
    }
}
