// パス: src/primitives.rs
// 役割: 組み込み関数の定義メタデータと実装を集約する
// 意図: 名前解決・表示・呼び出しで同じ一覧を共有する
// 関連ファイル: src/evaluator.rs, src/runtime.rs
//! 組み込み関数モジュール
//!
//! - 名前・引数個数・実装関数を `PrimitiveDef` として一元管理する。
//! - 評価器は利用者の束縛で見つからなかった名前をここから引く（利用者が同名で上書き可能）。
//! - `print` の出力は呼び出し側のバッファへ積み、REPL が入力単位ごとに取り出す。

use std::fmt;

use crate::errors::{EvalError, EvalErrorKind};
use crate::runtime::{to_float, to_int, Value};

/// 受け付ける引数の個数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::Range(lo, hi) => (lo..=hi).contains(&n),
            Arity::AtLeast(lo) => n >= lo,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "{k}"),
            Arity::Range(lo, hi) => write!(f, "{lo}..{hi}"),
            Arity::AtLeast(lo) => write!(f, "{lo}+"),
        }
    }
}

/// 組み込み関数が副作用を書き出す先。
pub struct PrimContext<'a> {
    pub output: &'a mut Vec<String>,
}

pub type PrimFn = fn(&mut PrimContext<'_>, Vec<Value>) -> Result<Value, EvalError>;

/// 組み込み関数定義。
pub struct PrimitiveDef {
    pub name: &'static str,
    pub arity: Arity,
    pub func: PrimFn,
}

impl fmt::Debug for PrimitiveDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}/{}>", self.name, self.arity)
    }
}

/// 言語が標準で提供する組み込み関数の一覧。
pub static PRIMITIVES: &[PrimitiveDef] = &[
    PrimitiveDef {
        name: "print",
        arity: Arity::AtLeast(0),
        func: prim_print,
    },
    PrimitiveDef {
        name: "str",
        arity: Arity::Exact(1),
        func: prim_str,
    },
    PrimitiveDef {
        name: "len",
        arity: Arity::Exact(1),
        func: prim_len,
    },
    PrimitiveDef {
        name: "type",
        arity: Arity::Exact(1),
        func: prim_type,
    },
    PrimitiveDef {
        name: "int",
        arity: Arity::Exact(1),
        func: prim_int,
    },
    PrimitiveDef {
        name: "float",
        arity: Arity::Exact(1),
        func: prim_float,
    },
    PrimitiveDef {
        name: "abs",
        arity: Arity::Exact(1),
        func: prim_abs,
    },
    PrimitiveDef {
        name: "sqrt",
        arity: Arity::Exact(1),
        func: prim_sqrt,
    },
    PrimitiveDef {
        name: "push",
        arity: Arity::Exact(2),
        func: prim_push,
    },
    PrimitiveDef {
        name: "range",
        arity: Arity::Range(1, 2),
        func: prim_range,
    },
];

/// 名前から組み込み関数を引く。
pub fn lookup(name: &str) -> Option<&'static PrimitiveDef> {
    PRIMITIVES.iter().find(|def| def.name == name)
}

/// `range` が一度に作るリストの長さの上限。
const MAX_RANGE_LEN: i64 = 1_000_000;

fn mismatch(msg: impl Into<String>) -> EvalError {
    EvalError::new(EvalErrorKind::TypeMismatch, msg)
}

// 引数個数は呼び出し側で検査済み
fn first(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::Null)
}

fn prim_print(ctx: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    let parts: Vec<String> = args.iter().map(Value::display_text).collect();
    ctx.output.push(parts.join(" "));
    Ok(Value::Null)
}

fn prim_str(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(first(args).display_text()))
}

fn prim_len(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    let n = match first(args) {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        other => return Err(mismatch(format!("len: {} には長さがありません", other.type_name()))),
    };
    i64::try_from(n)
        .map(Value::Int)
        .map_err(|_| mismatch("len: 長さが int の範囲を超えました"))
}

fn prim_type(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(first(args).type_name().to_string()))
}

fn prim_int(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    match first(args) {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Float(x) if x.is_finite() && x.abs() < 9.2e18 => Ok(Value::Int(x.trunc() as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| mismatch(format!("int: 整数として解釈できません: {:?}", s))),
        other => Err(mismatch(format!("int: {} は変換できません", other.type_name()))),
    }
}

fn prim_float(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    match first(args) {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| mismatch(format!("float: 数値として解釈できません: {:?}", s))),
        other => to_float(&other).map(Value::Float),
    }
}

fn prim_abs(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    match first(args) {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| mismatch("abs: int の範囲を超えました")),
        other => to_float(&other).map(|x| Value::Float(x.abs())),
    }
}

fn prim_sqrt(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    let x = to_float(&first(args))?;
    Ok(Value::Float(x.sqrt()))
}

fn prim_push(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    let mut it = args.into_iter();
    match (it.next(), it.next()) {
        (Some(Value::List(mut items)), Some(v)) => {
            items.push(v);
            Ok(Value::List(items))
        }
        (Some(other), _) => Err(mismatch(format!(
            "push: list を期待しましたが {} です",
            other.type_name()
        ))),
        _ => Err(mismatch("push: 引数が不足しています")),
    }
}

fn prim_range(_: &mut PrimContext<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    let bounds: Vec<i64> = args.iter().map(to_int).collect::<Result<_, _>>()?;
    let (lo, hi) = match bounds.as_slice() {
        [hi] => (0, *hi),
        [lo, hi] => (*lo, *hi),
        _ => return Err(mismatch("range: 引数は 1 つか 2 つです")),
    };
    let count = hi.saturating_sub(lo);
    if count > MAX_RANGE_LEN {
        return Err(mismatch(format!(
            "range: 要素数が多すぎます（{count} > {MAX_RANGE_LEN}）"
        )));
    }
    Ok(Value::List((lo..hi).map(Value::Int).collect()))
}

#[cfg(test)]
mod tests {
    use super::{lookup, Arity, PrimContext};
    use crate::errors::EvalErrorKind;
    use crate::runtime::Value;

    fn call(name: &str, args: Vec<Value>) -> (Value, Vec<String>) {
        let def = lookup(name).expect("builtin exists");
        assert!(def.arity.accepts(args.len()), "arity for {name}");
        let mut output = Vec::new();
        let mut ctx = PrimContext {
            output: &mut output,
        };
        let v = (def.func)(&mut ctx, args).expect("builtin succeeds");
        (v, output)
    }

    #[test]
    /// print は表示テキストを空白区切りで 1 行出力し null を返す。
    fn print_collects_output() {
        let (v, out) = call("print", vec![Value::Str("x =".into()), Value::Int(3)]);
        assert_eq!(v, Value::Null);
        assert_eq!(out, vec!["x = 3"]);
    }

    #[test]
    fn conversions() {
        assert_eq!(call("int", vec![Value::Float(3.9)]).0, Value::Int(3));
        assert_eq!(call("float", vec![Value::Int(2)]).0, Value::Float(2.0));
        assert_eq!(call("str", vec![Value::Float(2.0)]).0, Value::Str("2.0".into()));
        assert_eq!(call("type", vec![Value::Null]).0, Value::Str("null".into()));
    }

    #[test]
    fn list_helpers() {
        assert_eq!(
            call("range", vec![Value::Int(1), Value::Int(4)]).0,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            call("push", vec![Value::List(vec![]), Value::Int(1)]).0,
            Value::List(vec![Value::Int(1)])
        );
        assert_eq!(call("len", vec![Value::Str("héllo".into())]).0, Value::Int(5));
    }

    #[test]
    /// 巨大な範囲は確保を試みずに型エラーで断る。
    fn oversized_range_is_rejected() {
        let def = lookup("range").expect("builtin exists");
        let mut output = Vec::new();
        let mut ctx = PrimContext {
            output: &mut output,
        };
        let err = (def.func)(&mut ctx, vec![Value::Int(0), Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
        let err = (def.func)(&mut ctx, vec![Value::Int(i64::MIN), Value::Int(i64::MAX)]).unwrap_err();
        assert!(err.info.msg.contains("要素数が多すぎます"));
        assert_eq!(call("range", vec![Value::Int(5), Value::Int(1)]).0, Value::List(vec![]));
    }

    #[test]
    fn arity_rules() {
        assert!(Arity::Range(1, 2).accepts(2));
        assert!(!Arity::Exact(1).accepts(0));
        assert!(Arity::AtLeast(0).accepts(3));
    }
}
