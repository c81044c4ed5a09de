//! End-to-end tests driving the embedding surface (`vale_core::embed`) with hand-built ASTs,
//! since this crate takes an already-parsed tree as input rather than source text.
//!
//! Grounded on the teacher's `tests/bytecode_limits.rs` style: one assertion helper per expected
//! outcome, tests grouped by the behavior under test.

use std::time::Duration;

use vale_core::ast::{AssignTarget, BinOp, Block, Expr, Param, Pattern, Pos, Program, Span, Stmt};
use vale_core::error::ErrorKind;
use vale_core::value::Value;
use vale_core::{self as vale, Options};

fn sp() -> Span {
    Span::new(Pos::new(0, 0), Pos::new(0, 0))
}

fn int(n: i64) -> Expr {
    Expr::Int(n, sp())
}

fn ident(name: &str) -> Expr {
    Expr::Identifier(name.to_string(), sp())
}

fn bin(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right), span: sp() }
}

fn let_stmt(name: &str, mutable: bool, init: Expr) -> Stmt {
    Stmt::VarDecl { pattern: Pattern::Identifier(name.to_string()), mutable, init, span: sp() }
}

fn assign(name: &str, value: Expr) -> Stmt {
    Stmt::Assign { target: AssignTarget::Identifier(name.to_string(), sp()), compound: None, value, span: sp() }
}

fn ret(expr: Expr) -> Stmt {
    Stmt::Return(Some(expr), sp())
}

fn block(stmts: Vec<Stmt>, tail: Option<Expr>) -> Block {
    Block { stmts, tail: tail.map(Box::new), span: sp() }
}

fn program(body: Vec<Stmt>) -> Program {
    Program { body, span: sp() }
}

fn int_value(result: vale::Result<Value>) -> i64 {
    match result {
        Ok(Value::Int(n)) => n,
        other => panic!("expected an int value, got {other:?}"),
    }
}

#[test]
fn eval_arithmetic_follows_precedence() {
    // 1 + 2 * 3 == 7
    let expr = bin(BinOp::Add, int(1), bin(BinOp::Mul, int(2), int(3)));
    let result = vale::eval(&expr, &Options::new());
    assert_eq!(int_value(result), 7);
}

#[test]
fn run_resolves_top_level_let_bindings() {
    let prog = program(vec![let_stmt("x", false, int(10)), ret(bin(BinOp::Add, ident("x"), int(5)))]);
    let compiled = vale::compile(&prog, &Options::new()).expect("compiles");
    let result = vale::run(&compiled, &Options::new());
    assert_eq!(int_value(result), 15);
}

#[test]
fn mutable_outer_binding_is_visible_after_reassignment() {
    // let mut x = 1; x = 41; return x + 1;
    let prog = program(vec![
        let_stmt("x", true, int(1)),
        assign("x", int(41)),
        ret(bin(BinOp::Add, ident("x"), int(1))),
    ]);
    let compiled = vale::compile(&prog, &Options::new()).expect("compiles");
    let result = vale::run(&compiled, &Options::new());
    assert_eq!(int_value(result), 42);
}

#[test]
fn function_declaration_is_callable_through_a_session() {
    // function double(n) { return n * 2 } ; double declared at top level, then called via
    // Session::call with an already-evaluated argument.
    let decl = Stmt::FunctionDecl {
        name: "double".to_string(),
        params: vec![Param { name: "n".to_string(), default: None }],
        rest: None,
        body: block(vec![ret(bin(BinOp::Mul, ident("n"), int(2)))], None),
        span: sp(),
    };
    let mut session = vale::Session::new(Options::new());
    session.eval(&program(vec![decl])).expect("declaring the function succeeds");

    let result = session.call("double", vec![Value::Int(21)]);
    assert_eq!(int_value(result), 42);
}

#[test]
fn session_persists_globals_across_eval_calls() {
    let mut session = vale::Session::new(Options::new());
    session.eval(&program(vec![let_stmt("total", true, int(1))])).expect("first eval succeeds");
    session.eval(&program(vec![assign("total", bin(BinOp::Add, ident("total"), int(41)))])).expect("second eval succeeds");

    match session.get("total") {
        Some(Value::Int(n)) => assert_eq!(n, 42),
        other => panic!("expected total to be bound to 42, got {other:?}"),
    }
}

#[test]
fn undefined_identifier_is_a_name_error() {
    let expr = ident("nope");
    let err = vale::eval(&expr, &Options::new()).expect_err("undefined name should not compile");
    assert_eq!(err.kind, ErrorKind::NameError);
}

#[test]
fn division_by_zero_is_a_catchable_runtime_error() {
    let expr = bin(BinOp::Div, int(1), int(0));
    let err = vale::eval(&expr, &Options::new()).expect_err("division by zero should fail at runtime");
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

#[test]
fn step_quota_raises_a_runtime_error_rather_than_hanging() {
    // A tight, unconditional loop with no break: `for (;;) {}` encoded as a For with no
    // condition and an empty body. Without a step cap this would run forever.
    let for_stmt = Stmt::For { init: None, cond: None, post: None, body: block(vec![], None), span: sp() };
    let prog = program(vec![for_stmt, ret(int(0))]);
    let options = Options::new().max_steps(1_000);
    let compiled = vale::compile(&prog, &options).expect("compiles");
    let err = vale::run(&compiled, &options).expect_err("step quota should trip");
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

#[test]
fn timeout_quota_raises_a_runtime_error() {
    let for_stmt = Stmt::For { init: None, cond: None, post: None, body: block(vec![], None), span: sp() };
    let prog = program(vec![for_stmt, ret(int(0))]);
    let options = Options::new().timeout(Duration::from_millis(20));
    let compiled = vale::compile(&prog, &options).expect("compiles");
    let err = vale::run(&compiled, &options).expect_err("timeout should trip");
    assert_eq!(err.kind, ErrorKind::RuntimeError);
}

#[test]
fn env_bindings_are_visible_as_globals() {
    let options = Options::new().env("answer", Value::Int(42));
    let result = vale::eval(&ident("answer"), &options);
    assert_eq!(int_value(result), 42);
}
