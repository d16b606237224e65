//! 評価器（evaluator）
//!
//! 目的:
//! - セッション環境を所有し、AST を直接たどって評価する木構造インタプリタ。
//! - 環境の観測・変更はこの型の API（`evaluate` / `lookup` / `snapshot` / `clear` / `unset`）に限る。
//!
//! 仕様要点:
//! - トップレベルの文ごとにセッション環境のチェックポイントを取り、失敗した文の変更だけを巻き戻す。
//! - ループの各周回と関数呼び出しの直前で中断フラグ・締め切り・呼び出し深さを検査する。
//! - `print` の出力は内部バッファに溜め、`take_output` で取り出す。

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::ast::{BinOp, DeclKind, Expr, Program, Span, Stmt, UnaryOp};
use crate::errors::{EvalError, EvalErrorKind, ReplError};
use crate::parser::parse_program;
use crate::primitives::{self, PrimContext};
use crate::stack::ensure_sufficient_stack;
use crate::runtime::{
    arith_op, comparison_op, index_value, to_bool, AssignFailure, Binding, Closure, Env, Value,
};

/// 呼び出し深さの既定上限。
pub const DEFAULT_MAX_DEPTH: usize = 200;

/// 評価の実行時制限。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvalOptions {
    pub max_depth: usize,
    pub timeout: Option<Duration>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: None,
        }
    }
}

pub struct Evaluator {
    env: Env,
    output: Vec<String>,
    interrupt: Arc<AtomicBool>,
    options: EvalOptions,
    deadline: Option<Instant>,
    depth: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_options(EvalOptions::default())
    }

    pub fn with_options(options: EvalOptions) -> Self {
        Self {
            env: Env::new(),
            output: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            options,
            deadline: None,
            depth: 0,
        }
    }

    /// 外部（シグナルハンドラ等）から評価を中断させるためのフラグ。
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// 既存の中断フラグを共有させる。
    pub fn set_interrupt_handle(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = flag;
    }

    pub fn options(&self) -> EvalOptions {
        self.options
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.options.timeout = timeout;
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.options.max_depth = max_depth;
    }

    /// プログラムを評価し、最後の文の値を返す。
    pub fn evaluate(&mut self, program: &Program) -> Result<Value, EvalError> {
        self.interrupt.store(false, Ordering::SeqCst);
        self.deadline = self.options.timeout.map(|t| Instant::now() + t);
        self.depth = 0;
        debug!(stmts = program.stmts.len(), "evaluate unit");
        let env = self.env.clone();
        let mut last = Value::Null;
        for stmt in &program.stmts {
            let checkpoint = env.checkpoint();
            match self.exec_stmt(stmt, &env) {
                Ok(v) => last = v,
                Err(e) => {
                    env.restore(checkpoint);
                    debug!(code = e.info.code, "statement failed; session frame restored");
                    return Err(e);
                }
            }
        }
        Ok(last)
    }

    /// ソーステキストを解析して評価する。
    pub fn eval_source(&mut self, src: &str) -> Result<Value, ReplError> {
        let program = parse_program(src)?;
        self.evaluate(&program)
            .map_err(|e| ReplError::Eval(e.with_source(src)))
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.env.lookup(name)
    }

    pub fn is_final(&self, name: &str) -> bool {
        self.env.lookup_binding(name).is_some_and(|b| !b.mutable)
    }

    /// セッションに名前を直接束縛する（既存の束縛は上書き）。
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.env.bind(name, value);
    }

    pub fn snapshot(&self) -> std::collections::BTreeMap<String, Value> {
        self.env.snapshot()
    }

    pub fn clear(&mut self) {
        self.env.teardown();
    }

    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.env.remove(name)
    }

    pub fn binding_count(&self) -> usize {
        self.env.len()
    }

    /// 溜まった `print` 出力を取り出す。
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn poll(&self, span: Span) -> Result<(), EvalError> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(EvalError::at(
                EvalErrorKind::UserAbort,
                "評価が中断されました",
                span.line,
                span.col,
            ));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                let ms = self.options.timeout.map(|t| t.as_millis()).unwrap_or(0);
                return Err(EvalError::at(
                    EvalErrorKind::Timeout,
                    format!("評価が制限時間 {ms}ms を超えました"),
                    span.line,
                    span.col,
                ));
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> Result<Value, EvalError> {
        let mut last = Value::Null;
        for stmt in stmts {
            last = self.exec_stmt(stmt, env)?;
        }
        Ok(last)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> Result<Value, EvalError> {
        match stmt {
            Stmt::Decl {
                kind,
                is_final,
                bindings,
                span,
            } => {
                let mut last = Value::Null;
                for (name, init) in bindings {
                    let value = self.eval_expr(init, env)?;
                    let value = check_decl_type(*kind, name, value, *span)?;
                    let binding = if *is_final {
                        Binding::constant(value.clone())
                    } else {
                        Binding::mutable(value.clone())
                    };
                    trace!(name = name.as_str(), "declare");
                    env.define(name.clone(), binding);
                    last = value;
                }
                Ok(last)
            }
            Stmt::FunDecl {
                name, params, body, ..
            } => {
                let closure = Value::Function(Rc::new(Closure {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: Rc::clone(body),
                    env: env.clone(),
                }));
                env.bind(name.clone(), closure.clone());
                Ok(closure)
            }
            Stmt::Assign {
                name,
                op,
                value,
                span,
            } => {
                let current = env.lookup_binding(name).ok_or_else(|| {
                    EvalError::at(
                        EvalErrorKind::UndefinedReference,
                        format!("未束縛変数への代入: {name}"),
                        span.line,
                        span.col,
                    )
                })?;
                if !current.mutable {
                    return Err(EvalError::at(
                        EvalErrorKind::InvalidAssignment,
                        format!("final 変数には再代入できません: {name}"),
                        span.line,
                        span.col,
                    ));
                }
                let rhs = self.eval_expr(value, env)?;
                let new_value = match op.binary() {
                    Some(bin) => arith_op(bin, current.value, rhs)
                        .map_err(|e| e.or_at(span.line, span.col))?,
                    None => rhs,
                };
                env.assign(name, new_value.clone())
                    .map_err(|failure| assign_error(failure, name, *span))?;
                Ok(new_value)
            }
            Stmt::While { cond, body, span } => {
                loop {
                    self.poll(*span)?;
                    let c = self.eval_expr(cond, env)?;
                    let c = to_bool(&c, "while").map_err(|e| e.or_at(span.line, span.col))?;
                    if !c {
                        break;
                    }
                    self.exec_block(body, &env.child())?;
                }
                Ok(Value::Null)
            }
            Stmt::Expr(e) => self.eval_expr(e, env),
        }
    }

    pub(crate) fn eval_expr(&mut self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        ensure_sufficient_stack(|| self.eval_expr_inner(expr, env))
    }

    fn eval_expr_inner(&mut self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::Int(*value)),
            Expr::Float { value, .. } => Ok(Value::Float(*value)),
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            Expr::Null { .. } => Ok(Value::Null),
            Expr::Var { name, span } => env
                .lookup(name)
                .or_else(|| primitives::lookup(name).map(Value::Builtin))
                .ok_or_else(|| {
                    EvalError::at(
                        EvalErrorKind::UndefinedReference,
                        format!("未束縛変数: {name}"),
                        span.line,
                        span.col,
                    )
                }),
            Expr::List { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::List(values))
            }
            Expr::Unary { op, operand, span } => {
                let v = self.eval_expr(operand, env)?;
                eval_unary(*op, v).map_err(|e| e.or_at(span.line, span.col))
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => self.eval_binary(*op, left, right, *span, env),
            Expr::Call { callee, args, span } => {
                let f = self.eval_expr(callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, env)?);
                }
                self.call_value(f, values, *span)
            }
            Expr::Index {
                target,
                index,
                span,
            } => {
                let t = self.eval_expr(target, env)?;
                let i = self.eval_expr(index, env)?;
                index_value(&t, &i).map_err(|e| e.or_at(span.line, span.col))
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
                span,
            } => {
                let c = self.eval_expr(cond, env)?;
                if to_bool(&c, "if").map_err(|e| e.or_at(span.line, span.col))? {
                    self.exec_block(then_branch, &env.child())
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch, &env.child())
                } else {
                    Ok(Value::Null)
                }
            }
            Expr::Lambda { params, body, .. } => Ok(Value::Function(Rc::new(Closure {
                name: None,
                params: params.clone(),
                body: Rc::clone(body),
                env: env.clone(),
            }))),
            Expr::Block { stmts, .. } => self.exec_block(stmts, &env.child()),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        span: Span,
        env: &Env,
    ) -> Result<Value, EvalError> {
        let at = |e: EvalError| e.or_at(span.line, span.col);
        match op {
            BinOp::And | BinOp::Or => {
                let l = self.eval_expr(left, env)?;
                let l = to_bool(&l, op.symbol()).map_err(at)?;
                // 短絡評価
                if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
                    return Ok(Value::Bool(l));
                }
                let r = self.eval_expr(right, env)?;
                Ok(Value::Bool(to_bool(&r, op.symbol()).map_err(at)?))
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let l = self.eval_expr(left, env)?;
                let r = self.eval_expr(right, env)?;
                comparison_op(op, &l, &r).map_err(at)
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem | BinOp::Pow => {
                let l = self.eval_expr(left, env)?;
                let r = self.eval_expr(right, env)?;
                arith_op(op, l, r).map_err(at)
            }
        }
    }

    fn call_value(&mut self, f: Value, args: Vec<Value>, span: Span) -> Result<Value, EvalError> {
        match f {
            Value::Function(closure) => {
                if closure.params.len() != args.len() {
                    return Err(EvalError::at(
                        EvalErrorKind::ArityMismatch,
                        format!(
                            "{}: 引数の個数が一致しません（期待 {}, 実際 {}）",
                            closure.name.as_deref().unwrap_or("<anonymous>"),
                            closure.params.len(),
                            args.len()
                        ),
                        span.line,
                        span.col,
                    ));
                }
                if self.depth >= self.options.max_depth {
                    return Err(EvalError::at(
                        EvalErrorKind::RecursionLimit,
                        format!(
                            "呼び出しの深さが上限 {} を超えました",
                            self.options.max_depth
                        ),
                        span.line,
                        span.col,
                    ));
                }
                self.poll(span)?;
                let frame = closure.env.child();
                for (param, arg) in closure.params.iter().zip(args) {
                    frame.bind(param.clone(), arg);
                }
                self.depth += 1;
                let result = self.eval_expr(&closure.body, &frame);
                self.depth -= 1;
                result
            }
            Value::Builtin(def) => {
                if !def.arity.accepts(args.len()) {
                    return Err(EvalError::at(
                        EvalErrorKind::ArityMismatch,
                        format!(
                            "{}: 引数の個数が一致しません（期待 {}, 実際 {}）",
                            def.name,
                            def.arity,
                            args.len()
                        ),
                        span.line,
                        span.col,
                    ));
                }
                let mut ctx = PrimContext {
                    output: &mut self.output,
                };
                (def.func)(&mut ctx, args).map_err(|e| e.or_at(span.line, span.col))
            }
            other => Err(EvalError::at(
                EvalErrorKind::TypeMismatch,
                format!("関数ではありません: {}", other.type_name()),
                span.line,
                span.col,
            )),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        // クロージャ経由の循環参照を解放する
        self.env.teardown();
    }
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    match (op, v) {
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(|| {
            EvalError::new(EvalErrorKind::TypeMismatch, "(-) の結果が int の範囲を超えました")
        }),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => Err(EvalError::new(
            EvalErrorKind::TypeMismatch,
            format!("(-) は {} に適用できません", other.type_name()),
        )),
        (UnaryOp::Not, other) => Err(EvalError::new(
            EvalErrorKind::TypeMismatch,
            format!("(!) は {} に適用できません", other.type_name()),
        )),
    }
}

/// 型付き宣言（`int x = ...` など）の値を検査し、必要なら float へ拡幅する。
fn check_decl_type(kind: DeclKind, name: &str, value: Value, span: Span) -> Result<Value, EvalError> {
    let ok = match (kind, &value) {
        (DeclKind::Let | DeclKind::Var, _) | (_, Value::Null) => true,
        (DeclKind::Int | DeclKind::Long, Value::Int(_)) => true,
        (DeclKind::Float | DeclKind::Double, Value::Int(i)) => {
            return Ok(Value::Float(*i as f64));
        }
        (DeclKind::Float | DeclKind::Double, Value::Float(_)) => true,
        (DeclKind::Boolean, Value::Bool(_)) => true,
        (DeclKind::Str, Value::Str(_)) => true,
        _ => false,
    };
    if ok {
        Ok(value)
    } else {
        Err(EvalError::at(
            EvalErrorKind::TypeMismatch,
            format!(
                "{} 型の変数 {} に {} は束縛できません",
                kind.keyword(),
                name,
                value.type_name()
            ),
            span.line,
            span.col,
        ))
    }
}

fn assign_error(failure: AssignFailure, name: &str, span: Span) -> EvalError {
    match failure {
        AssignFailure::Undefined => EvalError::at(
            EvalErrorKind::UndefinedReference,
            format!("未束縛変数への代入: {name}"),
            span.line,
            span.col,
        ),
        AssignFailure::Immutable => EvalError::at(
            EvalErrorKind::InvalidAssignment,
            format!("final 変数には再代入できません: {name}"),
            span.line,
            span.col,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalOptions, Evaluator};
    use crate::errors::{EvalErrorKind, ReplError};
    use crate::runtime::Value;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn eval(ev: &mut Evaluator, src: &str) -> Value {
        ev.eval_source(src).unwrap()
    }

    fn eval_kind(ev: &mut Evaluator, src: &str) -> EvalErrorKind {
        match ev.eval_source(src) {
            Err(ReplError::Eval(e)) => e.kind,
            other => panic!("expected eval error for {src:?}, got {other:?}"),
        }
    }

    #[test]
    /// 宣言した値が後続の入力から参照できる。
    fn declarations_persist_across_units() {
        let mut ev = Evaluator::new();
        assert_eq!(eval(&mut ev, "let x = 2 + 3"), Value::Int(5));
        assert_eq!(eval(&mut ev, "x * 2"), Value::Int(10));
    }

    #[test]
    /// 失敗した文だけが巻き戻され、それ以前の文の効果は残る。
    fn statement_atomicity() {
        let mut ev = Evaluator::new();
        let kind = eval_kind(&mut ev, "let a = 1; let b = a / 0; let c = 3");
        assert_eq!(kind, EvalErrorKind::DivisionByZero);
        assert_eq!(ev.lookup("a"), Some(Value::Int(1)));
        assert_eq!(ev.lookup("b"), None);
        assert_eq!(ev.lookup("c"), None);
    }

    #[test]
    /// 関数内部から外側の変数を書き換えた後で失敗しても、その文の変更は取り消される。
    fn failed_statement_rolls_back_nested_assignment() {
        let mut ev = Evaluator::new();
        eval(&mut ev, "var n = 0");
        eval(&mut ev, "fun bump() { n += 1; 1 / 0 }");
        assert_eq!(eval_kind(&mut ev, "bump()"), EvalErrorKind::DivisionByZero);
        assert_eq!(ev.lookup("n"), Some(Value::Int(0)));
    }

    #[test]
    /// 再帰関数とクロージャの捕捉。
    fn recursion_and_closures() {
        let mut ev = Evaluator::new();
        eval(
            &mut ev,
            "fun fact(n) -> if n <= 1 { 1 } else { n * fact(n - 1) }",
        );
        assert_eq!(eval(&mut ev, "fact(10)"), Value::Int(3628800));
        eval(&mut ev, "fun adder(k) -> fun (x) -> x + k");
        assert_eq!(eval(&mut ev, "adder(3)(4)"), Value::Int(7));
    }

    #[test]
    fn while_loop_with_compound_assignment() {
        let mut ev = Evaluator::new();
        eval(&mut ev, "var i = 0; var total = 0");
        let v = eval(&mut ev, "while i < 5 { total += i; i += 1 }\ntotal");
        assert_eq!(v, Value::Int(10));
    }

    #[test]
    fn error_kinds() {
        let mut ev = Evaluator::new();
        assert_eq!(eval_kind(&mut ev, "nope"), EvalErrorKind::UndefinedReference);
        assert_eq!(eval_kind(&mut ev, "nope = 1"), EvalErrorKind::UndefinedReference);
        assert_eq!(eval_kind(&mut ev, "1 + true"), EvalErrorKind::TypeMismatch);
        assert_eq!(eval_kind(&mut ev, "3(1)"), EvalErrorKind::TypeMismatch);
        eval(&mut ev, "fun id(x) -> x");
        assert_eq!(eval_kind(&mut ev, "id(1, 2)"), EvalErrorKind::ArityMismatch);
        eval(&mut ev, "final k = 1");
        assert_eq!(eval_kind(&mut ev, "k = 2"), EvalErrorKind::InvalidAssignment);
        assert_eq!(eval_kind(&mut ev, "int z = 1.5"), EvalErrorKind::TypeMismatch);
    }

    #[test]
    fn typed_float_declaration_widens_int() {
        let mut ev = Evaluator::new();
        assert_eq!(eval(&mut ev, "double d = 2"), Value::Float(2.0));
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let mut ev = Evaluator::with_options(EvalOptions {
            max_depth: 32,
            timeout: None,
        });
        eval(&mut ev, "fun loop(n) -> loop(n + 1)");
        assert_eq!(eval_kind(&mut ev, "loop(0)"), EvalErrorKind::RecursionLimit);
    }

    #[test]
    /// 無限ループは締め切りで打ち切られ、セッションは継続できる。
    fn timeout_stops_infinite_loop() {
        let mut ev = Evaluator::with_options(EvalOptions {
            max_depth: 32,
            timeout: Some(Duration::from_millis(20)),
        });
        eval(&mut ev, "var spins = 0");
        assert_eq!(
            eval_kind(&mut ev, "while true { spins += 1 }"),
            EvalErrorKind::Timeout
        );
        assert_eq!(ev.lookup("spins"), Some(Value::Int(0)));
        assert_eq!(eval(&mut ev, "1 + 1"), Value::Int(2));
    }

    #[test]
    /// 中断フラグが立っていればループは UserAbort で終わる。
    fn interrupt_flag_aborts_loop() {
        let mut ev = Evaluator::new();
        let flag = ev.interrupt_handle();
        eval(&mut ev, "var i = 0");
        // evaluate 開始時にフラグは下ろされるので、評価中に別スレッドから立てる
        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::SeqCst);
        });
        let kind = eval_kind(&mut ev, "while true { i += 1 }");
        setter.join().unwrap();
        assert_eq!(kind, EvalErrorKind::UserAbort);
        assert_eq!(ev.lookup("i"), Some(Value::Int(0)));
    }

    #[test]
    fn print_output_is_buffered() {
        let mut ev = Evaluator::new();
        assert_eq!(eval(&mut ev, "print(\"hi\", 1 + 1)"), Value::Null);
        assert_eq!(ev.take_output(), vec!["hi 2"]);
        assert!(ev.take_output().is_empty());
    }

    #[test]
    /// 利用者の束縛は同名の組み込みより優先される。
    fn user_bindings_shadow_builtins() {
        let mut ev = Evaluator::new();
        eval(&mut ev, "let len = 3");
        assert_eq!(eval(&mut ev, "len"), Value::Int(3));
        ev.unset("len");
        assert_eq!(eval(&mut ev, "len([1, 2])"), Value::Int(2));
    }

    #[test]
    fn clear_removes_all_bindings() {
        let mut ev = Evaluator::new();
        eval(&mut ev, "let a = 1, b = 2");
        assert_eq!(ev.snapshot().len(), 2);
        ev.clear();
        assert!(ev.snapshot().is_empty());
    }

    #[test]
    /// 同じ値での再束縛は冪等。
    fn rebinding_is_idempotent() {
        let mut ev = Evaluator::new();
        eval(&mut ev, "let x = 7");
        let before = ev.snapshot();
        eval(&mut ev, "let x = 7");
        assert_eq!(ev.snapshot(), before);
    }

    #[test]
    fn error_positions_point_at_operator() {
        let mut ev = Evaluator::new();
        match ev.eval_source("let y = 1\ny / 0") {
            Err(ReplError::Eval(e)) => {
                assert_eq!(e.info.line, Some(2));
                assert_eq!(e.info.col, Some(3));
                assert!(e.to_string().contains("y / 0"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
