// パス: src/runtime.rs
// 役割: 評価時に用いる値表現・スコープ連鎖・演算ヘルパーを提供する
// 意図: 評価器・プリミティブ定義から共有される基盤ロジックを分離する
// 関連ファイル: src/evaluator.rs, src/primitives.rs
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::ast::{format_float, quote_string, BinOp, Expr};
use crate::errors::{EvalError, EvalErrorKind};
use crate::primitives::PrimitiveDef;

/// 名前に結び付いた値と、再代入の可否。
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

impl Binding {
    pub fn mutable(value: Value) -> Self {
        Self {
            value,
            mutable: true,
        }
    }
    pub fn constant(value: Value) -> Self {
        Self {
            value,
            mutable: false,
        }
    }
}

/// スコープ連鎖の 1 フレームへのハンドル。複製しても同じフレームを指す。
#[derive(Clone)]
pub struct Env {
    inner: Rc<EnvFrame>,
}

struct EnvFrame {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<EnvFrame>>,
}

impl EnvFrame {
    fn child(parent: Rc<EnvFrame>) -> Self {
        Self {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
        }
    }
}

/// 代入の失敗理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignFailure {
    Undefined,
    Immutable,
}

/// 1 フレーム分の束縛の写し。`Env::restore` で巻き戻しに使う。
#[derive(Clone, Debug)]
pub struct Checkpoint(HashMap<String, Binding>);

fn find_frame(frame: &Rc<EnvFrame>, key: &str) -> Option<Rc<EnvFrame>> {
    if frame.bindings.borrow().contains_key(key) {
        return Some(Rc::clone(frame));
    }
    frame.parent.as_ref().and_then(|p| find_frame(p, key))
}

fn collect_snapshot(frame: &Rc<EnvFrame>, acc: &mut BTreeMap<String, Value>) {
    if let Some(parent) = &frame.parent {
        collect_snapshot(parent, acc);
    }
    for (key, binding) in frame.bindings.borrow().iter() {
        acc.insert(key.clone(), binding.value.clone());
    }
}

impl Env {
    /// 親を持たない空の環境（セッション環境）を生成する。
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EnvFrame {
                bindings: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// このフレームを親とする子環境を返す。
    pub fn child(&self) -> Self {
        Self {
            inner: Rc::new(EnvFrame::child(Rc::clone(&self.inner))),
        }
    }

    /// 内側から外側へ名前を解決する。
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.lookup_binding(key).map(|b| b.value)
    }

    pub fn lookup_binding(&self, key: &str) -> Option<Binding> {
        let frame = find_frame(&self.inner, key)?;
        let bindings = frame.bindings.borrow();
        bindings.get(key).cloned()
    }

    /// 現在のフレームに再代入可能な束縛を作る（既存の束縛は黙って上書き）。
    pub fn bind(&self, key: impl Into<String>, value: Value) {
        self.define(key, Binding::mutable(value));
    }

    pub fn define(&self, key: impl Into<String>, binding: Binding) {
        self.inner.bindings.borrow_mut().insert(key.into(), binding);
    }

    /// 名前を保持する最も近いフレームの値を書き換える。
    pub fn assign(&self, key: &str, value: Value) -> Result<(), AssignFailure> {
        let frame = find_frame(&self.inner, key).ok_or(AssignFailure::Undefined)?;
        let mut bindings = frame.bindings.borrow_mut();
        match bindings.get_mut(key) {
            Some(binding) if binding.mutable => {
                binding.value = value;
                Ok(())
            }
            Some(_) => Err(AssignFailure::Immutable),
            None => Err(AssignFailure::Undefined),
        }
    }

    /// 現在のフレームから束縛を除去する。
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner
            .bindings
            .borrow_mut()
            .remove(key)
            .map(|b| b.value)
    }

    /// 現在のフレームの束縛をすべて除去する。
    pub fn clear(&self) {
        self.inner.bindings.borrow_mut().clear();
    }

    /// 可視な束縛を名前順の不変コピーとして返す（内側が外側を隠す）。
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut acc = BTreeMap::new();
        collect_snapshot(&self.inner, &mut acc);
        acc
    }

    pub fn len(&self) -> usize {
        self.inner.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.inner.bindings.borrow().clone())
    }

    pub fn restore(&self, checkpoint: Checkpoint) {
        *self.inner.bindings.borrow_mut() = checkpoint.0;
    }

    /// クロージャが自分のフレームを指す循環参照を断ち切るため、全束縛を解放する。
    pub fn teardown(&self) {
        let drained: Vec<Binding> = self
            .inner
            .bindings
            .borrow_mut()
            .drain()
            .map(|(_, b)| b)
            .collect();
        drop(drained);
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.inner.bindings.borrow().keys().cloned().collect();
        f.debug_struct("Env")
            .field("names", &names)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

/// ユーザー定義関数。定義時の環境を捕捉する。
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub env: Env,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<fun {}/{}>",
            self.name.as_deref().unwrap_or("anonymous"),
            self.params.len()
        )
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    Null,
    Function(Rc<Closure>),
    Builtin(&'static PrimitiveDef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl Value {
    /// `type()` や診断メッセージで使う型名。
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Null => "null",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    /// `print` や文字列連結で使う表記（文字列はクォートしない）。
    pub fn display_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// リテラルとして読み戻せる表記。
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{}", quote_string(s)),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Null => write!(f, "null"),
            Value::Function(c) => write!(f, "{c:?}"),
            Value::Builtin(def) => write!(f, "<builtin {}>", def.name),
        }
    }
}

fn mismatch(msg: impl Into<String>) -> EvalError {
    EvalError::new(EvalErrorKind::TypeMismatch, msg)
}

pub(crate) fn to_int(v: &Value) -> Result<i64, EvalError> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(mismatch(format!("int を期待しましたが {} です", other.type_name()))),
    }
}

pub(crate) fn to_float(v: &Value) -> Result<f64, EvalError> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(d) => Ok(*d),
        other => Err(mismatch(format!(
            "数値を期待しましたが {} です",
            other.type_name()
        ))),
    }
}

pub(crate) fn to_bool(v: &Value, context: &str) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(mismatch(format!(
            "{context}: boolean を期待しましたが {} です",
            other.type_name()
        ))),
    }
}

fn overflow(op: BinOp) -> EvalError {
    mismatch(format!("({}) の結果が int の範囲を超えました", op.symbol()))
}

fn ensure_nonzero(divisor: &Value, op: BinOp) -> Result<(), EvalError> {
    let zero = match divisor {
        Value::Int(0) => true,
        Value::Float(x) => *x == 0.0,
        _ => false,
    };
    if zero {
        Err(EvalError::new(
            EvalErrorKind::DivisionByZero,
            format!("({}): 0 で割ることはできません", op.symbol()),
        ))
    } else {
        Ok(())
    }
}

fn checked_int(op: BinOp, x: i64, y: i64) -> Option<i64> {
    match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => x.checked_div(y),
        BinOp::Rem => x.checked_rem(y),
        _ => None,
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Rem => x % y,
        _ => x.powf(y),
    }
}

/// 算術演算子（`+ - * / % ^`）を適用する。
pub(crate) fn arith_op(op: BinOp, a: Value, b: Value) -> Result<Value, EvalError> {
    if op == BinOp::Add {
        match (&a, &b) {
            (Value::Str(x), _) => return Ok(Value::Str(format!("{}{}", x, b.display_text()))),
            (_, Value::Str(y)) => return Ok(Value::Str(format!("{}{}", a.display_text(), y))),
            (Value::List(xs), Value::List(ys)) => {
                let mut joined = xs.clone();
                joined.extend(ys.iter().cloned());
                return Ok(Value::List(joined));
            }
            _ => {}
        }
    }
    if matches!(op, BinOp::Div | BinOp::Rem) {
        ensure_nonzero(&b, op)?;
    }
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) if op == BinOp::Pow => pow_int(*x, *y),
        (Value::Int(x), Value::Int(y)) => {
            checked_int(op, *x, *y).map(Value::Int).ok_or_else(|| overflow(op))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Ok(Value::Float(float_op(op, to_float(&a)?, to_float(&b)?)))
        }
        _ => Err(mismatch(format!(
            "({}) は {} と {} に適用できません",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn pow_int(x: i64, y: i64) -> Result<Value, EvalError> {
    if y < 0 {
        return Ok(Value::Float((x as f64).powf(y as f64)));
    }
    let exp = u32::try_from(y).map_err(|_| mismatch("(^) の指数が大きすぎます"))?;
    x.checked_pow(exp)
        .map(Value::Int)
        .ok_or_else(|| overflow(BinOp::Pow))
}

/// 構造的な等値判定。種類の異なる値は等しくない（int と float は数値として比較）。
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

/// 順序比較。数値同士・文字列同士のみ許す。
pub(crate) fn compare_values(op: BinOp, a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    let ord = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            to_float(a)?.partial_cmp(&to_float(b)?)
        }
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            return Err(mismatch(format!(
                "({}) は {} と {} を比較できません",
                op.symbol(),
                a.type_name(),
                b.type_name()
            )))
        }
    };
    ord.ok_or_else(|| mismatch(format!("({}) は NaN を比較できません", op.symbol())))
}

/// 比較演算子（`== != < <= > >=`）を適用する。
pub(crate) fn comparison_op(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let result = match op {
        BinOp::Eq => values_equal(a, b),
        BinOp::Ne => !values_equal(a, b),
        BinOp::Lt => compare_values(op, a, b)? == Ordering::Less,
        BinOp::Le => compare_values(op, a, b)? != Ordering::Greater,
        BinOp::Gt => compare_values(op, a, b)? == Ordering::Greater,
        BinOp::Ge => compare_values(op, a, b)? != Ordering::Less,
        _ => return Err(mismatch(format!("({}) は比較演算子ではありません", op.symbol()))),
    };
    Ok(Value::Bool(result))
}

/// `xs[i]` / `s[i]` の添字アクセス。
pub(crate) fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    let i = to_int(index)?;
    let out_of_range = || mismatch(format!("添字が範囲外です: {i}"));
    let idx = usize::try_from(i).map_err(|_| out_of_range())?;
    match target {
        Value::List(items) => items.get(idx).cloned().ok_or_else(out_of_range),
        Value::Str(s) => s
            .chars()
            .nth(idx)
            .map(|c| Value::Str(c.to_string()))
            .ok_or_else(out_of_range),
        other => Err(mismatch(format!(
            "{} には添字アクセスできません",
            other.type_name()
        ))),
    }
}
