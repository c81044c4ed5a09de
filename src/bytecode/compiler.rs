//! Compiles a statically typed [`crate::ast`] tree into bytecode (spec.md §4.4).
//!
//! Grounded on the teacher's `Compiler<'a>` (two-pass-per-scope emission driven by a
//! `CodeBuilder`, loop-jump bookkeeping, finally-target tracking for early returns), generalized
//! from the teacher's Python-statement set to this module's expression-oriented `if`, C-style
//! `for`, `for`-`in`, `switch`, and structured `try`/`catch`/`finally`.
//!
//! Binary operators follow one stack convention throughout this module: for `a OP b`, the
//! compiler emits code for `a`, then for `b`, then the opcode — the opcode pops the right operand
//! first, then the left, and computes `left OP right`. Every helper below (comparisons, slice
//! bounds) relies on this ordering.

use std::mem;
use std::rc::Rc;

use super::builder::{CodeBuilder, JumpLabel};
use super::code::{Code, ExceptionEntry};
use super::op::Opcode;
use crate::ast::{
    AssignTarget, BinOp, Block, Expr, ListElement, MapEntry, Param, Pattern, PrefixOp, Program, Stmt, SwitchCase,
    TemplatePart,
};
use crate::error::{Error, Result};
use crate::intern::Interner;
use crate::symtab::{Binding, BindingKind, SymbolTable};
use crate::types::{FunctionDescriptor, VList, VMap, VString};
use crate::value::Value;

/// Host-supplied configuration for a compilation (spec.md §6.2 "env"): the names that resolve as
/// builtins rather than `NameError`, in the order they occupy the shared globals array.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub builtins: Vec<String>,
}

/// A fully compiled program: its root chunk, the string table bytecode names were interned
/// against, and the size the host must allocate for the globals array before running it.
#[derive(Debug)]
pub struct CompiledProgram {
    pub code: Rc<Code>,
    pub interner: Interner,
    pub global_count: usize,
    /// Global names in slot order (builtins first), for `embed::Session::get`/`call`
    /// (spec.md §6.2).
    pub global_names: Vec<String>,
}

#[must_use]
fn bin_opcode(op: BinOp) -> Option<Opcode> {
    Some(match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::FloorDiv => Opcode::FloorDiv,
        BinOp::Mod => Opcode::Mod,
        BinOp::Pow => Opcode::Pow,
        BinOp::Eq => Opcode::Eq,
        BinOp::Ne => Opcode::Ne,
        BinOp::Lt => Opcode::Lt,
        BinOp::Le => Opcode::Le,
        BinOp::Gt => Opcode::Gt,
        BinOp::Ge => Opcode::Ge,
        BinOp::And | BinOp::Or => return None,
    })
}

struct LoopCtx {
    break_jumps: Vec<JumpLabel>,
    continue_jumps: Vec<JumpLabel>,
    /// `finally_stack` length at loop entry; `break`/`continue` only inline finally blocks pushed
    /// after this point (spec.md §4.6: a loop does not own the finally blocks outside it).
    finally_barrier: usize,
}

struct Compiler<'a> {
    options: &'a CompileOptions,
    interner: Interner,
    symtab: SymbolTable,
    builder: CodeBuilder,
    loop_stack: Vec<LoopCtx>,
    /// Finally blocks statically enclosing the code currently being emitted, innermost last.
    /// `return`/`break`/`continue` inline these (in reverse order) before the jump that would
    /// otherwise skip over them (spec.md §4.6 "finally always runs").
    finally_stack: Vec<Block>,
}

pub fn compile(program: &Program, options: &CompileOptions) -> Result<CompiledProgram> {
    let mut compiler = Compiler {
        options,
        interner: Interner::new(),
        symtab: SymbolTable::new(&options.builtins),
        builder: CodeBuilder::new(),
        loop_stack: Vec::new(),
        finally_stack: Vec::new(),
    };

    compiler.hoist_scope(&program.body, true)?;
    for stmt in &program.body {
        compiler.compile_stmt(stmt, true)?;
    }
    compiler.builder.emit(Opcode::LoadNil);
    compiler.builder.emit(Opcode::Return);

    let _ = compiler.options;
    let num_locals = compiler.symtab.root_num_locals();
    let global_count = compiler.symtab.global_count();
    let global_names = compiler.symtab.global_names();
    let code = compiler.builder.build(num_locals);
    Ok(CompiledProgram { code: Rc::new(code), interner: compiler.interner, global_count, global_names })
}

impl Compiler<'_> {
    fn push(&mut self) {
        self.builder.adjust_stack(1);
    }

    fn pop(&mut self) {
        self.builder.adjust_stack(-1);
    }

    fn popn(&mut self, n: i32) {
        self.builder.adjust_stack(-n);
    }

    /// Forward-declares every named function in `stmts` so mutually recursive functions within
    /// one scope resolve regardless of declaration order (spec.md §4.3). Two function literals
    /// declared under the same name in the same scope are a `CompileError` (spec.md §4.3
    /// "function X redefined"), not a silent shadow or slot collapse.
    fn hoist_scope(&mut self, stmts: &[Stmt], is_global: bool) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for stmt in stmts {
            if let Stmt::FunctionDecl { name, .. } = stmt {
                if !seen.insert(name.as_str()) {
                    return Err(Error::compile_error(format!("function {name} redefined")));
                }
                if is_global {
                    self.symtab.declare_global(name, false)?;
                } else {
                    self.symtab.declare_local(name, false);
                }
            }
        }
        Ok(())
    }

    /// Runs the finally blocks pushed after index `barrier`, innermost first, inline at the
    /// current position (spec.md §4.6).
    fn run_finally_blocks_since(&mut self, barrier: usize) -> Result<()> {
        for i in (barrier..self.finally_stack.len()).rev() {
            let block = self.finally_stack[i].clone();
            self.compile_block(&block, false)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt, is_global: bool) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.builder.emit(Opcode::Pop);
                self.pop();
            }
            Stmt::VarDecl { pattern, mutable, init, .. } => {
                self.compile_expr(init)?;
                self.compile_pattern(pattern, *mutable, is_global)?;
            }
            Stmt::Assign { target, compound, value, .. } => self.compile_assign(target, *compound, value)?,
            Stmt::For { init, cond, post, body, .. } => self.compile_for(init, cond, post, body)?,
            Stmt::ForIn { pattern, iterable, body, .. } => self.compile_for_in(pattern, iterable, body)?,
            Stmt::Switch { scrutinee, cases, default, .. } => self.compile_switch(scrutinee, cases, default)?,
            Stmt::Break(_) => {
                let barrier = self.loop_stack.last().ok_or_else(|| Error::compile_error("break outside loop"))?.finally_barrier;
                self.run_finally_blocks_since(barrier)?;
                let label = self.builder.emit_jump(Opcode::Jump);
                self.loop_stack.last_mut().expect("checked above").break_jumps.push(label);
            }
            Stmt::Continue(_) => {
                let barrier = self.loop_stack.last().ok_or_else(|| Error::compile_error("continue outside loop"))?.finally_barrier;
                self.run_finally_blocks_since(barrier)?;
                let label = self.builder.emit_jump(Opcode::Jump);
                self.loop_stack.last_mut().expect("checked above").continue_jumps.push(label);
            }
            Stmt::Return(expr, _) => {
                match expr {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        self.builder.emit(Opcode::LoadNil);
                        self.push();
                    }
                }
                let tmp = self.symtab.declare_local("<return>", true);
                self.builder.emit_store_local(tmp);
                self.pop();
                self.run_finally_blocks_since(0)?;
                self.builder.emit_load_local(tmp);
                self.push();
                self.builder.emit(Opcode::Return);
                self.pop();
            }
            Stmt::Throw(e, _) => {
                self.compile_expr(e)?;
                self.builder.emit(Opcode::Throw);
                self.pop();
            }
            Stmt::TryCatchFinally { try_block, catch, finally, .. } => {
                self.compile_try(try_block, catch.as_ref(), finally.as_ref())?;
            }
            Stmt::FunctionDecl { name, params, rest, body, .. } => {
                let const_idx = self.compile_function_literal(params, rest, body, Some(name), false)?;
                self.builder.emit_u16(Opcode::MakeClosure, const_idx);
                self.push();
                let binding = self.symtab.resolve(name)?;
                self.store_binding(&binding);
                self.pop();
            }
            Stmt::Bad(_) => return Err(Error::compile_error("malformed statement")),
        }
        Ok(())
    }

    fn store_binding(&mut self, binding: &Binding) {
        match binding.kind {
            BindingKind::Local => self.builder.emit_store_local(binding.slot),
            BindingKind::Free => {
                self.builder.emit_u8(Opcode::StoreUpvalue, u8::try_from(binding.slot).expect("too many upvalues"));
            }
            BindingKind::Global | BindingKind::Constant | BindingKind::Builtin => {
                self.builder.emit_u16(Opcode::StoreGlobal, binding.slot);
            }
        }
    }

    fn load_binding(&mut self, binding: &Binding) {
        match binding.kind {
            BindingKind::Local => self.builder.emit_load_local(binding.slot),
            BindingKind::Free => {
                self.builder.emit_u8(Opcode::LoadUpvalue, u8::try_from(binding.slot).expect("too many upvalues"));
            }
            BindingKind::Global | BindingKind::Constant | BindingKind::Builtin => {
                self.builder.emit_u16(Opcode::LoadGlobal, binding.slot);
            }
        }
        self.push();
    }

    fn compile_pattern(&mut self, pattern: &Pattern, mutable: bool, is_global: bool) -> Result<()> {
        match pattern {
            Pattern::Identifier(name) => {
                if is_global {
                    let slot = self.symtab.declare_global(name, mutable)?;
                    self.builder.emit_u16(Opcode::StoreGlobal, slot);
                } else {
                    let slot = self.symtab.declare_local(name, mutable);
                    let sid = self.interner.intern(name);
                    self.builder.register_local_name(slot, sid);
                    self.builder.emit_store_local(slot);
                }
                self.pop();
            }
            Pattern::List(items) => {
                let tmp = self.symtab.declare_local("<destructure>", true);
                self.builder.emit_store_local(tmp);
                self.pop();
                for (i, item) in items.iter().enumerate() {
                    self.builder.emit_load_local(tmp);
                    self.push();
                    let idx = self.builder.add_const(Value::Int(i as i64));
                    self.builder.emit_u16(Opcode::LoadConst, idx);
                    self.push();
                    self.builder.emit(Opcode::GetItem);
                    self.pop();
                    self.compile_pattern(item, mutable, is_global)?;
                }
            }
            Pattern::Map(entries) => {
                let tmp = self.symtab.declare_local("<destructure>", true);
                self.builder.emit_store_local(tmp);
                self.pop();
                for (key, item) in entries {
                    self.builder.emit_load_local(tmp);
                    self.push();
                    let key_idx = self.builder.add_const(Value::String(VString::new(key.clone())));
                    self.builder.emit_u16(Opcode::LoadConst, key_idx);
                    self.push();
                    self.builder.emit(Opcode::GetItem);
                    self.pop();
                    self.compile_pattern(item, mutable, is_global)?;
                }
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, target: &AssignTarget, compound: Option<BinOp>, value: &Expr) -> Result<()> {
        match target {
            AssignTarget::Identifier(name, _) => {
                let binding = self.symtab.check_assignable(name)?;
                if let Some(op) = compound {
                    self.load_binding(&binding);
                    self.compile_expr(value)?;
                    self.emit_binary(op)?;
                } else {
                    self.compile_expr(value)?;
                }
                self.store_binding(&binding);
                self.pop();
            }
            AssignTarget::Subscript { object, index, .. } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                if let Some(op) = compound {
                    self.builder.emit(Opcode::Dup2);
                    self.push();
                    self.push();
                    self.builder.emit(Opcode::GetItem);
                    self.pop();
                    self.compile_expr(value)?;
                    self.emit_binary(op)?;
                } else {
                    self.compile_expr(value)?;
                }
                self.builder.emit(Opcode::SetItem);
                self.popn(3);
            }
            AssignTarget::Attribute { object, name, .. } => {
                self.compile_expr(object)?;
                let name_idx = self.builder.add_const(Value::String(VString::new(name.clone())));
                if let Some(op) = compound {
                    self.builder.emit(Opcode::Dup);
                    self.push();
                    self.builder.emit_u16(Opcode::LoadAttr, name_idx);
                    self.compile_expr(value)?;
                    self.emit_binary(op)?;
                } else {
                    self.compile_expr(value)?;
                }
                self.builder.emit_u16(Opcode::StoreAttr, name_idx);
                self.popn(2);
            }
        }
        Ok(())
    }

    fn emit_binary(&mut self, op: BinOp) -> Result<()> {
        let opcode = bin_opcode(op)
            .ok_or_else(|| Error::compile_error("logical operators cannot be used as compound-assignment operators"))?;
        self.builder.emit(opcode);
        self.pop();
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Nil(_) => {
                self.builder.emit(Opcode::LoadNil);
                self.push();
            }
            Expr::Bool(b, _) => {
                self.builder.emit(if *b { Opcode::LoadTrue } else { Opcode::LoadFalse });
                self.push();
            }
            Expr::Int(n, _) => {
                let idx = self.builder.add_const(Value::Int(*n));
                self.builder.emit_u16(Opcode::LoadConst, idx);
                self.push();
            }
            Expr::Float(n, _) => {
                let idx = self.builder.add_const(Value::Float(*n));
                self.builder.emit_u16(Opcode::LoadConst, idx);
                self.push();
            }
            Expr::Str(s, _) => {
                let idx = self.builder.add_const(Value::String(VString::new(s.clone())));
                self.builder.emit_u16(Opcode::LoadConst, idx);
                self.push();
            }
            Expr::Identifier(name, _) => {
                let binding = self.symtab.resolve(name)?;
                self.load_binding(&binding);
            }
            Expr::Binary { op: BinOp::And, left, right, .. } => self.compile_short_circuit(left, right, true)?,
            Expr::Binary { op: BinOp::Or, left, right, .. } => self.compile_short_circuit(left, right, false)?,
            Expr::Binary { op, left, right, .. } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit_binary(*op)?;
            }
            Expr::Prefix { op, expr, .. } => {
                self.compile_expr(expr)?;
                self.builder.emit(match op {
                    PrefixOp::Neg => Opcode::Neg,
                    PrefixOp::Not => Opcode::Not,
                });
            }
            Expr::ListLit { elements, .. } => self.compile_list_lit(elements)?,
            Expr::MapLit { entries, .. } => self.compile_map_lit(entries)?,
            Expr::Subscript { object, index, .. } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.builder.emit(Opcode::GetItem);
                self.pop();
            }
            Expr::Slice { object, start, stop, .. } => {
                self.compile_expr(object)?;
                match start {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        self.builder.emit(Opcode::LoadNil);
                        self.push();
                    }
                }
                match stop {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        self.builder.emit(Opcode::LoadNil);
                        self.push();
                    }
                }
                self.builder.emit(Opcode::GetSlice);
                self.popn(2);
            }
            Expr::Call { callee, args, .. } => {
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let argc = u8::try_from(args.len())
                    .map_err(|_| Error::compile_error("too many arguments in one call (max 255)"))?;
                self.builder.emit_u8(Opcode::Call, argc);
                self.popn(args.len() as i32);
            }
            Expr::Attribute { object, name, .. } => {
                self.compile_expr(object)?;
                let idx = self.builder.add_const(Value::String(VString::new(name.clone())));
                self.builder.emit_u16(Opcode::LoadAttr, idx);
            }
            Expr::If { cond, then_branch, else_branch, .. } => {
                self.compile_expr(cond)?;
                let else_label = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.pop();
                self.compile_block(then_branch, true)?;
                let end_label = self.builder.emit_jump(Opcode::Jump);
                self.builder.patch_jump(else_label);
                match else_branch {
                    Some(block) => {
                        self.pop();
                        self.compile_block(block, true)?;
                    }
                    None => self.builder.emit(Opcode::LoadNil),
                }
                self.builder.patch_jump(end_label);
            }
            Expr::Function { params, rest, body, .. } => {
                let const_idx = self.compile_function_literal(params, rest, body, None, true)?;
                self.builder.emit_u16(Opcode::MakeClosure, const_idx);
                self.push();
            }
            Expr::Template { parts, .. } => self.compile_template(parts)?,
            Expr::Block(block) => self.compile_block(block, true)?,
            Expr::Bad(_) => return Err(Error::compile_error("malformed expression")),
        }
        Ok(())
    }

    fn compile_short_circuit(&mut self, left: &Expr, right: &Expr, is_and: bool) -> Result<()> {
        self.compile_expr(left)?;
        self.builder.emit(Opcode::Dup);
        self.push();
        let short_circuit = self.builder.emit_jump(if is_and { Opcode::JumpIfFalse } else { Opcode::JumpIfTrue });
        self.pop();
        self.builder.emit(Opcode::Pop);
        self.pop();
        self.compile_expr(right)?;
        self.builder.patch_jump(short_circuit);
        Ok(())
    }

    fn compile_template(&mut self, parts: &[TemplatePart]) -> Result<()> {
        for part in parts {
            match part {
                TemplatePart::Literal(s) => {
                    let idx = self.builder.add_const(Value::String(VString::new(s.clone())));
                    self.builder.emit_u16(Opcode::LoadConst, idx);
                    self.push();
                }
                TemplatePart::Expr(e) => self.compile_expr(e)?,
            }
        }
        let count = u16::try_from(parts.len()).map_err(|_| Error::compile_error("template has too many parts"))?;
        self.builder.emit_u16(Opcode::BuildTemplate, count);
        self.popn(parts.len() as i32);
        self.push();
        Ok(())
    }

    /// Appends `value_slot`'s value onto the list local `list_slot` via the bound `list.append`
    /// method, for literals built one element at a time (spec.md §4.1 "Attributes").
    fn emit_list_append(&mut self, list_slot: u16, value_slot: u16) {
        self.builder.emit_load_local(list_slot);
        self.push();
        let name_idx = self.builder.add_const(Value::String(VString::new("append".to_string())));
        self.builder.emit_u16(Opcode::LoadAttr, name_idx);
        self.builder.emit_load_local(value_slot);
        self.push();
        self.builder.emit_u8(Opcode::Call, 1);
        self.pop();
        self.builder.emit(Opcode::Pop);
        self.pop();
    }

    fn compile_list_lit(&mut self, elements: &[ListElement]) -> Result<()> {
        if elements.iter().all(|e| matches!(e, ListElement::Item(_))) {
            for el in elements {
                let ListElement::Item(e) = el else { unreachable!() };
                self.compile_expr(e)?;
            }
            let count = u16::try_from(elements.len())
                .map_err(|_| Error::compile_error("list literal has too many elements"))?;
            self.builder.emit_u16(Opcode::BuildList, count);
            self.popn(elements.len() as i32);
            self.push();
            return Ok(());
        }

        self.builder.emit_u16(Opcode::BuildList, 0);
        self.push();
        let list_slot = self.symtab.declare_local("<list>", true);
        self.builder.emit_store_local(list_slot);
        self.pop();

        for el in elements {
            match el {
                ListElement::Item(e) => {
                    self.compile_expr(e)?;
                    let value_slot = self.symtab.declare_local("<item>", true);
                    self.builder.emit_store_local(value_slot);
                    self.pop();
                    self.emit_list_append(list_slot, value_slot);
                }
                ListElement::Spread(e) => {
                    self.compile_expr(e)?;
                    self.builder.emit(Opcode::GetIter);
                    let iter_slot = self.symtab.declare_local("<iter>", true);
                    self.builder.emit_store_local(iter_slot);
                    self.pop();
                    let value_slot = self.symtab.declare_local("<item>", true);
                    self.compile_iterate(iter_slot, value_slot, |this| {
                        this.emit_list_append(list_slot, value_slot);
                        Ok(())
                    })?;
                }
            }
        }

        self.builder.emit_load_local(list_slot);
        self.push();
        Ok(())
    }

    /// Compiles a `while (iterator has a next value) { body }` loop reading through `iter_slot`,
    /// storing each yielded value into `value_slot` before running `body`. Shared by list/map
    /// spread desugaring and `for`-`in` (spec.md §4.4).
    fn compile_iterate(
        &mut self,
        iter_slot: u16,
        value_slot: u16,
        mut body: impl FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let loop_start = self.builder.current_offset();
        self.builder.emit_load_local(iter_slot);
        self.push();
        let exit_label = self.builder.emit_jump(Opcode::ForIter);
        self.pop();
        // success path: stack is now [iterator, value]
        self.push();
        self.builder.emit_store_local(value_slot);
        self.pop();
        self.builder.emit_store_local(iter_slot);
        self.pop();
        body(self)?;
        self.builder.emit_jump_to(Opcode::Jump, loop_start);
        self.builder.patch_jump(exit_label);
        Ok(())
    }

    fn compile_map_lit(&mut self, entries: &[MapEntry]) -> Result<()> {
        if entries.iter().all(|e| matches!(e, MapEntry::Pair { .. })) {
            for entry in entries {
                let MapEntry::Pair { key, value } = entry else { unreachable!() };
                self.compile_expr(value)?;
                self.compile_expr(key)?;
            }
            let count =
                u16::try_from(entries.len()).map_err(|_| Error::compile_error("map literal has too many entries"))?;
            self.builder.emit_u16(Opcode::BuildMap, count);
            self.popn(2 * entries.len() as i32);
            self.push();
            return Ok(());
        }

        self.builder.emit_u16(Opcode::BuildMap, 0);
        self.push();
        let map_slot = self.symtab.declare_local("<map>", true);
        self.builder.emit_store_local(map_slot);
        self.pop();

        for entry in entries {
            match entry {
                MapEntry::Pair { key, value } => {
                    self.builder.emit_load_local(map_slot);
                    self.push();
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                    self.builder.emit(Opcode::SetItem);
                    self.popn(3);
                }
                MapEntry::Spread(e) => {
                    self.compile_expr(e)?;
                    let source_slot = self.symtab.declare_local("<source>", true);
                    self.builder.emit_store_local(source_slot);
                    self.pop();
                    self.builder.emit_load_local(source_slot);
                    self.push();
                    self.builder.emit(Opcode::GetIter);
                    let iter_slot = self.symtab.declare_local("<iter>", true);
                    self.builder.emit_store_local(iter_slot);
                    self.pop();
                    let key_slot = self.symtab.declare_local("<key>", true);
                    self.compile_iterate(iter_slot, key_slot, |this| {
                        this.builder.emit_load_local(map_slot);
                        this.push();
                        this.builder.emit_load_local(key_slot);
                        this.push();
                        this.builder.emit_load_local(source_slot);
                        this.push();
                        this.builder.emit_load_local(key_slot);
                        this.push();
                        this.builder.emit(Opcode::GetItem);
                        this.pop();
                        this.builder.emit(Opcode::SetItem);
                        this.popn(3);
                        Ok(())
                    })?;
                }
            }
        }

        self.builder.emit_load_local(map_slot);
        self.push();
        Ok(())
    }

    fn compile_block(&mut self, block: &Block, want_value: bool) -> Result<()> {
        self.symtab.enter_block();
        for stmt in &block.stmts {
            self.compile_stmt(stmt, false)?;
        }
        match (&block.tail, want_value) {
            (Some(tail), true) => self.compile_expr(tail)?,
            (Some(tail), false) => {
                self.compile_expr(tail)?;
                self.builder.emit(Opcode::Pop);
                self.pop();
            }
            (None, true) => {
                self.builder.emit(Opcode::LoadNil);
                self.push();
            }
            (None, false) => {}
        }
        self.symtab.exit_block();
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: &Option<Box<Stmt>>,
        cond: &Option<Expr>,
        post: &Option<Box<Stmt>>,
        body: &Block,
    ) -> Result<()> {
        self.symtab.enter_block();
        if let Some(init) = init {
            self.compile_stmt(init, false)?;
        }
        let loop_start = self.builder.current_offset();
        let exit_label = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                let label = self.builder.emit_jump(Opcode::JumpIfFalse);
                self.pop();
                Some(label)
            }
            None => None,
        };

        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            finally_barrier: self.finally_stack.len(),
        });
        self.compile_block(body, false)?;
        let ctx = self.loop_stack.pop().expect("pushed above");

        let continue_target = self.builder.current_offset();
        for label in ctx.continue_jumps {
            self.builder.patch_jump_to(label, continue_target);
        }
        if let Some(post) = post {
            self.compile_stmt(post, false)?;
        }
        self.builder.emit_jump_to(Opcode::Jump, loop_start);

        if let Some(label) = exit_label {
            self.builder.patch_jump(label);
        }
        for label in ctx.break_jumps {
            self.builder.patch_jump(label);
        }
        self.symtab.exit_block();
        Ok(())
    }

    fn compile_for_in(&mut self, pattern: &Pattern, iterable: &Expr, body: &Block) -> Result<()> {
        self.symtab.enter_block();
        self.compile_expr(iterable)?;
        self.builder.emit(Opcode::GetIter);
        let iter_slot = self.symtab.declare_local("<iter>", true);
        self.builder.emit_store_local(iter_slot);
        self.pop();
        let value_slot = self.symtab.declare_local("<iter_value>", true);

        let loop_start = self.builder.current_offset();
        self.builder.emit_load_local(iter_slot);
        self.push();
        let exit_label = self.builder.emit_jump(Opcode::ForIter);
        self.pop();
        self.push();
        self.builder.emit_store_local(value_slot);
        self.pop();
        self.builder.emit_store_local(iter_slot);
        self.pop();

        self.symtab.enter_block();
        self.builder.emit_load_local(value_slot);
        self.push();
        self.compile_pattern(pattern, true, false)?;

        self.loop_stack.push(LoopCtx {
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            finally_barrier: self.finally_stack.len(),
        });
        self.compile_block(body, false)?;
        let ctx = self.loop_stack.pop().expect("pushed above");
        self.symtab.exit_block();

        for label in ctx.continue_jumps {
            self.builder.patch_jump_to(label, loop_start);
        }
        self.builder.emit_jump_to(Opcode::Jump, loop_start);
        self.builder.patch_jump(exit_label);
        for label in ctx.break_jumps {
            self.builder.patch_jump(label);
        }
        self.symtab.exit_block();
        Ok(())
    }

    /// `break` inside a `switch` case targets the nearest enclosing loop, not the switch, since
    /// switch cases already fall through to the end without it.
    fn compile_switch(&mut self, scrutinee: &Expr, cases: &[SwitchCase], default: &Option<Block>) -> Result<()> {
        self.symtab.enter_block();
        self.compile_expr(scrutinee)?;
        let scrutinee_slot = self.symtab.declare_local("<switch>", true);
        self.builder.emit_store_local(scrutinee_slot);
        self.pop();

        let mut end_jumps = Vec::new();
        let mut next_case_label: Option<JumpLabel> = None;
        for case in cases {
            if let Some(label) = next_case_label.take() {
                self.builder.patch_jump(label);
            }
            self.builder.emit_load_local(scrutinee_slot);
            self.push();
            self.compile_expr(&case.value)?;
            self.builder.emit(Opcode::Eq);
            self.pop();
            next_case_label = Some(self.builder.emit_jump(Opcode::JumpIfFalse));
            self.pop();
            self.compile_block(&case.body, false)?;
            end_jumps.push(self.builder.emit_jump(Opcode::Jump));
        }
        if let Some(label) = next_case_label {
            self.builder.patch_jump(label);
        }
        if let Some(default) = default {
            self.compile_block(default, false)?;
        }
        for label in end_jumps {
            self.builder.patch_jump(label);
        }
        self.symtab.exit_block();
        Ok(())
    }

    fn compile_try(
        &mut self,
        try_block: &Block,
        catch: Option<&(Option<String>, Block)>,
        finally: Option<&Block>,
    ) -> Result<()> {
        let stack_depth = self.builder.stack_depth();

        if let Some(finally_block) = finally {
            self.finally_stack.push(finally_block.clone());
        }
        let try_start = self.builder.current_offset();
        self.compile_block(try_block, false)?;
        let try_end = self.builder.current_offset();
        if finally.is_some() {
            self.finally_stack.pop();
        }

        match (catch, finally) {
            (None, None) => {}
            (Some((catch_var, catch_body)), None) => {
                let end_jump = self.builder.emit_jump(Opcode::Jump);
                let catch_start = self.builder.current_offset();
                let catch_var_slot = self.compile_catch_prologue(catch_var.as_deref());
                self.compile_block(catch_body, false)?;
                self.symtab.exit_block();
                self.builder.patch_jump(end_jump);
                self.builder.add_exception_entry(ExceptionEntry {
                    start: try_start as u32,
                    end: try_end as u32,
                    catch: Some(catch_start as u32),
                    finally: None,
                    stack_depth,
                    catch_var: catch_var_slot,
                });
            }
            (None, Some(finally_block)) => {
                self.compile_block(finally_block, false)?;
                let end_jump = self.builder.emit_jump(Opcode::Jump);
                let handler_start = self.builder.current_offset();
                self.compile_block(finally_block, false)?;
                self.builder.emit(Opcode::Reraise);
                self.builder.patch_jump(end_jump);
                self.builder.add_exception_entry(ExceptionEntry {
                    start: try_start as u32,
                    end: try_end as u32,
                    catch: None,
                    finally: Some(handler_start as u32),
                    stack_depth,
                    catch_var: None,
                });
            }
            (Some((catch_var, catch_body)), Some(finally_block)) => {
                self.compile_block(finally_block, false)?;
                let end_jump = self.builder.emit_jump(Opcode::Jump);
                let catch_start = self.builder.current_offset();
                self.finally_stack.push(finally_block.clone());
                let catch_var_slot = self.compile_catch_prologue(catch_var.as_deref());
                self.compile_block(catch_body, false)?;
                self.finally_stack.pop();
                self.compile_block(finally_block, false)?;
                self.symtab.exit_block();
                self.builder.patch_jump(end_jump);
                self.builder.add_exception_entry(ExceptionEntry {
                    start: try_start as u32,
                    end: try_end as u32,
                    catch: Some(catch_start as u32),
                    finally: None,
                    stack_depth,
                    catch_var: catch_var_slot,
                });
            }
        }
        Ok(())
    }

    /// Enters the catch block's lexical scope and binds the caught error (the VM pushes it onto
    /// the operand stack before jumping to the handler) to the declared name, if any.
    fn compile_catch_prologue(&mut self, catch_var: Option<&str>) -> Option<u16> {
        self.symtab.enter_block();
        self.push();
        match catch_var {
            Some(name) => {
                let slot = self.symtab.declare_local(name, true);
                let sid = self.interner.intern(name);
                self.builder.register_local_name(slot, sid);
                self.builder.emit_store_local(slot);
                self.pop();
                Some(slot)
            }
            None => {
                self.builder.emit(Opcode::Pop);
                self.pop();
                None
            }
        }
    }

    fn compile_function_literal(
        &mut self,
        params: &[Param],
        rest: &Option<String>,
        body: &Block,
        name: Option<&str>,
        synthesized: bool,
    ) -> Result<u16> {
        let mut seen_default = false;
        for param in params {
            if param.default.is_some() {
                seen_default = true;
            } else if seen_default {
                return Err(Error::compile_error("invalid argument defaults"));
            }
        }

        // Defaults are folded to constants here, in the enclosing scope's builder, before the
        // function's own scope is entered (spec.md §4.4).
        let defaults =
            params.iter().filter_map(|p| p.default.as_ref()).map(|expr| self.fold_const(expr)).collect::<Result<Vec<_>>>()?;

        let outer_builder = mem::replace(&mut self.builder, CodeBuilder::new());
        let outer_loops = mem::take(&mut self.loop_stack);
        let outer_finally = mem::take(&mut self.finally_stack);
        self.symtab.enter_function();

        let mut param_names = Vec::new();
        let mut num_required: u16 = 0;
        let mut num_defaults: u16 = 0;
        for param in params {
            let slot = self.symtab.declare_local(&param.name, true);
            let sid = self.interner.intern(&param.name);
            self.builder.register_local_name(slot, sid);
            param_names.push(sid);
            if param.default.is_some() {
                num_defaults += 1;
            } else {
                num_required += 1;
            }
        }
        let has_rest = if let Some(rest_name) = rest {
            let slot = self.symtab.declare_local(rest_name, true);
            let sid = self.interner.intern(rest_name);
            self.builder.register_local_name(slot, sid);
            true
        } else {
            false
        };

        let result = self.compile_function_body(body);

        let closed = self.symtab.exit_function();
        let inner_builder = mem::replace(&mut self.builder, outer_builder);
        self.loop_stack = outer_loops;
        self.finally_stack = outer_finally;
        result?;

        let code = inner_builder.build(closed.num_locals);
        let code_index = self.builder.add_child_code(code);
        let name_id = name.map(|n| self.interner.intern(n));
        let descriptor = Rc::new(FunctionDescriptor {
            name: name_id,
            synthesized_name: synthesized,
            param_names,
            num_required,
            num_defaults,
            defaults,
            has_rest,
            code_index,
            upvalues: closed.upvalues,
        });
        Ok(self.builder.add_function_const(descriptor))
    }

    /// Evaluates a default-parameter expression to a constant `Value` at compile time (spec.md
    /// §4.4: "Parameter defaults compile at definition time as constants in the outer Code").
    /// Anything that isn't foldable to a literal shape is a compile error rather than bytecode
    /// emitted into the callee body.
    fn fold_const(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Nil(_) => Ok(Value::Nil),
            Expr::Bool(b, _) => Ok(Value::Bool(*b)),
            Expr::Int(n, _) => Ok(Value::int(*n)),
            Expr::Float(f, _) => Ok(Value::Float(*f)),
            Expr::Str(s, _) => Ok(Value::String(VString::new(s.clone()))),
            Expr::Prefix { op: PrefixOp::Neg, expr, .. } => match self.fold_const(expr)? {
                Value::Int(n) => Ok(Value::int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(Error::compile_error(format!("cannot negate a default value of type {}", other.type_name()))),
            },
            Expr::Prefix { op: PrefixOp::Not, expr, .. } => Ok(Value::Bool(!self.fold_const(expr)?.truthy())),
            Expr::ListLit { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        ListElement::Item(item) => items.push(self.fold_const(item)?),
                        ListElement::Spread(_) => {
                            return Err(Error::compile_error("default parameter value must be a constant expression"))
                        }
                    }
                }
                Ok(Value::List(VList::new(items)))
            }
            Expr::MapLit { entries, .. } => {
                let mut map = indexmap::IndexMap::new();
                for entry in entries {
                    match entry {
                        MapEntry::Pair { key, value } => {
                            let Value::String(key) = self.fold_const(key)? else {
                                return Err(Error::compile_error("default parameter map keys must be strings"));
                            };
                            map.insert(key.as_str().to_string(), self.fold_const(value)?);
                        }
                        MapEntry::Spread(_) => {
                            return Err(Error::compile_error("default parameter value must be a constant expression"))
                        }
                    }
                }
                Ok(Value::Map(VMap::new(map)))
            }
            _ => Err(Error::compile_error("default parameter value must be a constant expression")),
        }
    }

    fn compile_function_body(&mut self, body: &Block) -> Result<()> {
        self.hoist_scope(&body.stmts, false)?;
        for stmt in &body.stmts {
            self.compile_stmt(stmt, false)?;
        }
        match &body.tail {
            Some(tail) => self.compile_expr(tail)?,
            None => {
                self.builder.emit(Opcode::LoadNil);
                self.push();
            }
        }
        self.builder.emit(Opcode::Return);
        self.pop();
        Ok(())
    }
}
