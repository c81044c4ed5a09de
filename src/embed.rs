//! Host embedding surface (spec.md §6.2): `compile`/`run`/`eval` free functions plus a stateful
//! [`Session`] that keeps a globals array alive across calls.
//!
//! Grounded on the teacher's three-tier public API (`Executor::run_no_limits`/
//! `run_with_limits`/`run_with_tracker`) and its resumable `RunSnapshot`, generalized into one
//! [`Options`] builder — playing the role of the teacher's `ResourceLimits::new().max_allocations(..)`
//! chain — plus a `Session` that keeps a program's globals alive between `eval` calls the way the
//! teacher's snapshot keeps a paused VM alive between `run` calls.

use std::rc::Rc;
use std::time::Duration;

use crate::ast::{Expr, Positioned, Program, Stmt};
use crate::bytecode::builder::CodeBuilder;
use crate::bytecode::compiler::{self as program_compiler, CompileOptions, CompiledProgram};
use crate::bytecode::op::Opcode;
use crate::error::{Error, Result};
use crate::intern::Interner;
use crate::value::Value;
use crate::vm::{Quotas, Vm};

/// Runs a predicate over a program's AST before compilation (spec.md §6.2 "validators").
/// Violations are collected and reported as a single composite error.
pub trait Validator {
    fn validate(&self, program: &Program) -> Result<()>;
}

/// Rewrites a program's AST after validation, before compilation (spec.md §6.2 "transformers").
pub trait Transformer {
    fn transform(&self, program: Program) -> Program;
}

/// Host-supplied configuration for a `compile`/`run`/`eval` call (spec.md §6.2).
///
/// `observer`/cancellation hooks are not modeled here: both traits in [`crate::vm`] are neither
/// `Clone` nor safely shareable across the repeated `run`s a `Session` performs, so a host that
/// needs tracing or cooperative cancellation builds a [`Vm`] directly via
/// [`Vm::with_policy`](crate::vm::Vm::with_policy) instead of going through this module.
pub struct Options {
    pub env: Vec<(String, Value)>,
    pub filename: String,
    pub max_steps: Option<u64>,
    pub max_stack_depth: Option<usize>,
    pub timeout: Option<Duration>,
    pub validators: Vec<Box<dyn Validator>>,
    pub transformers: Vec<Box<dyn Transformer>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            filename: String::new(),
            max_steps: None,
            max_stack_depth: None,
            timeout: None,
            validators: Vec::new(),
            transformers: Vec::new(),
        }
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a named global. Repeated declarations of the same name merge with last-wins
    /// (spec.md §6.2).
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        self.env.retain(|(existing, _)| *existing != name);
        self.env.push((name, value));
        self
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    #[must_use]
    pub fn max_steps(mut self, max: u64) -> Self {
        self.max_steps = Some(max);
        self
    }

    #[must_use]
    pub fn max_stack_depth(mut self, max: usize) -> Self {
        self.max_stack_depth = Some(max);
        self
    }

    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    #[must_use]
    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    fn quotas(&self) -> Quotas {
        Quotas { max_steps: self.max_steps, max_stack_depth: self.max_stack_depth, timeout: self.timeout }
    }

    fn builtin_names(&self) -> Vec<String> {
        self.env.iter().map(|(name, _)| name.clone()).collect()
    }

    fn builtin_values(&self) -> Vec<Value> {
        self.env.iter().map(|(_, value)| value.clone()).collect()
    }
}

/// Runs `validators` then `transformers`, in that fixed order (spec.md §6.2).
fn prepare(mut program: Program, options: &Options) -> Result<Program> {
    for validator in &options.validators {
        validator.validate(&program)?;
    }
    for transformer in &options.transformers {
        program = transformer.transform(program);
    }
    Ok(program)
}

/// `compile(source, options) -> Code | Error` (spec.md §6.2). `source` is already a parsed AST;
/// lexing and parsing are out of this crate's scope (spec.md §1).
pub fn compile(program: &Program, options: &Options) -> Result<CompiledProgram> {
    let program = prepare(program.clone(), options)?;
    let compile_options = CompileOptions { builtins: options.builtin_names() };
    program_compiler::compile(&program, &compile_options)
}

/// `run(ctx, code, options) -> Value | Error` (spec.md §6.2).
pub fn run(compiled: &CompiledProgram, options: &Options) -> Result<Value> {
    let globals = seed_globals(compiled.global_count, options);
    let mut vm = Vm::new(Rc::clone(&compiled.code), globals, compiled.interner.clone(), options.quotas());
    vm.run()
}

/// `eval(ctx, source, options) -> Value | Error` — compiles a single expression as a one-
/// statement program whose value is that expression's, and runs it (spec.md §6.2).
pub fn eval(expr: &Expr, options: &Options) -> Result<Value> {
    let span = expr.span();
    let program = Program { body: vec![Stmt::Return(Some(expr.clone()), span)], span };
    let compiled = compile(&program, options)?;
    run(&compiled, options)
}

fn seed_globals(global_count: usize, options: &Options) -> Vec<Value> {
    let mut globals = vec![Value::Nil; global_count];
    for (slot, value) in options.builtin_values().into_iter().enumerate() {
        globals[slot] = value;
    }
    globals
}

/// A VM's globals kept alive across multiple `eval`/`call` rounds (spec.md §6.2 "session-like
/// handle carrying a VM across calls").
///
/// Each `eval` recompiles its program fresh against the session's accumulated builtin+declared
/// names, since this crate's `Vm` has no mechanism to append bytecode to an already-running
/// chunk; only the globals array — where top-level `let`/`const`/function declarations live —
/// survives from one call to the next, which is exactly the state a session needs to keep.
pub struct Session {
    globals: Vec<Value>,
    global_names: Vec<String>,
    options: Options,
}

impl Session {
    #[must_use]
    pub fn new(options: Options) -> Self {
        let global_names = options.builtin_names();
        let globals = options.builtin_values();
        Self { globals, global_names, options }
    }

    /// Compiles `program` against this session's known names and runs it, growing the globals
    /// array if new top-level bindings were declared.
    pub fn eval(&mut self, program: &Program) -> Result<Value> {
        let compile_options = CompileOptions { builtins: self.global_names.clone() };
        let program = prepare(program.clone(), &self.options)?;
        let compiled = program_compiler::compile(&program, &compile_options)?;

        if compiled.global_count > self.globals.len() {
            self.globals.resize(compiled.global_count, Value::Nil);
        }
        self.global_names = compiled.global_names;

        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::new(compiled.code, globals, compiled.interner, self.options.quotas());
        let result = vm.run();
        self.globals = vm.into_globals();
        result
    }

    /// Calls a previously defined top-level function by name with already-evaluated arguments
    /// (spec.md §6.2 "call(name, args)"). Builds a throwaway one-call chunk rather than
    /// round-tripping through the AST, since the arguments are runtime `Value`s, not source.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let slot = self.slot_of(name)?;
        let argc = u8::try_from(args.len()).map_err(|_| Error::runtime("too many arguments in one call"))?;

        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::LoadGlobal, slot);
        for arg in args {
            let index = builder.add_const(arg);
            builder.emit_u16(Opcode::LoadConst, index);
        }
        builder.emit_u8(Opcode::Call, argc);
        builder.emit(Opcode::Return);
        let code = Rc::new(builder.build(0));

        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::new(code, globals, Interner::new(), self.options.quotas());
        let result = vm.run();
        self.globals = vm.into_globals();
        result
    }

    /// Reads a top-level binding's current value (spec.md §6.2 "get(name)").
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let slot = self.global_names.iter().position(|n| n == name)?;
        self.globals.get(slot).cloned()
    }

    /// All names currently bound at top level, builtins first (spec.md §6.2 "global_names()").
    #[must_use]
    pub fn global_names(&self) -> &[String] {
        &self.global_names
    }

    fn slot_of(&self, name: &str) -> Result<u16> {
        let slot = self.global_names.iter().position(|n| n == name).ok_or_else(|| Error::undefined_variable(name))?;
        u16::try_from(slot).map_err(|_| Error::runtime("too many globals"))
    }
}
