//! 抽象構文木（AST）
//!
//! 目的:
//! - 構文解析結果を評価器と REPL の `:ast` 表示で共用できる表現に落とし込む。
//!
//! 設計ノート:
//! - 文（`Stmt`）と式（`Expr`）はどちらも閉じた列挙で、評価器は網羅的に照合する。
//! - すべてのノードは `Span` を持ち、実行時エラーの位置表示に使う。
//! - 関数本体は `Rc` で共有し、クロージャ生成時に木を複製しない。
//! - `Display` は完全に括弧付けしたソース風の表記を出力する。

use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub pos: usize,
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(pos: usize, line: usize, col: usize) -> Self {
        Self { pos, line, col }
    }
    pub fn dummy() -> Self {
        Self {
            pos: 0,
            line: 1,
            col: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

/// 宣言に使われたキーワード。型付きのものは束縛時に値を検査する。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Var,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Str,
}

impl DeclKind {
    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Let => "let",
            DeclKind::Var => "var",
            DeclKind::Int => "int",
            DeclKind::Long => "long",
            DeclKind::Float => "float",
            DeclKind::Double => "double",
            DeclKind::Boolean => "boolean",
            DeclKind::Str => "string",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
        }
    }

    /// 複合代入が内部で適用する二項演算子。
    pub fn binary(self) -> Option<BinOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
            AssignOp::Rem => Some(BinOp::Rem),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

// 文ノード
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Decl {
        kind: DeclKind,
        is_final: bool,
        bindings: Vec<(String, Expr)>,
        span: Span,
    },
    FunDecl {
        name: String,
        params: Vec<String>,
        body: Rc<Expr>,
        span: Span,
    },
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
        span: Span,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Expr(Expr),
}

// 式ノード
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int {
        value: i64,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    Var {
        name: String,
        span: Span,
    },
    List {
        items: Vec<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    If {
        cond: Box<Expr>,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        span: Span,
    },
    Lambda {
        params: Vec<String>,
        body: Rc<Expr>,
        span: Span,
    },
    Block {
        stmts: Vec<Stmt>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Null { span }
            | Expr::Var { span, .. }
            | Expr::List { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::If { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Block { span, .. } => *span,
        }
    }
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Decl { span, .. }
            | Stmt::FunDecl { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::While { span, .. } => *span,
            Stmt::Expr(e) => e.span(),
        }
    }
}

/// 浮動小数を「読み戻すと同じ値になる」表記へ整形する（常に小数点か指数を含む）。
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    let s = format!("{:?}", value);
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

/// 文字列をダブルクォート付きのリテラル表記へ変換する。
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn write_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt]) -> fmt::Result {
    if stmts.is_empty() {
        return write!(f, "{{ }}");
    }
    let parts: Vec<String> = stmts.iter().map(|s| s.to_string()).collect();
    write!(f, "{{ {} }}", parts.join("; "))
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Decl {
                kind,
                is_final,
                bindings,
                ..
            } => {
                if *is_final {
                    write!(f, "final ")?;
                }
                let parts: Vec<String> = bindings
                    .iter()
                    .map(|(n, e)| format!("{n} = {e}"))
                    .collect();
                write!(f, "{} {}", kind.keyword(), parts.join(", "))
            }
            Stmt::FunDecl {
                name, params, body, ..
            } => match body.as_ref() {
                Expr::Block { stmts, .. } => {
                    write!(f, "fun {}({}) ", name, params.join(", "))?;
                    write_block(f, stmts)
                }
                other => write!(f, "fun {}({}) -> {}", name, params.join(", "), other),
            },
            Stmt::Assign { name, op, value, .. } => {
                write!(f, "{} {} {}", name, op.symbol(), value)
            }
            Stmt::While { cond, body, .. } => {
                write!(f, "while {} ", cond)?;
                write_block(f, body)
            }
            Stmt::Expr(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int { value, .. } => write!(f, "{value}"),
            Expr::Float { value, .. } => write!(f, "{}", format_float(*value)),
            Expr::Str { value, .. } => write!(f, "{}", quote_string(value)),
            Expr::Bool { value, .. } => write!(f, "{value}"),
            Expr::Null { .. } => write!(f, "null"),
            Expr::Var { name, .. } => write!(f, "{name}"),
            Expr::List { items, .. } => {
                let parts: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Expr::Unary { op, operand, .. } => match op {
                UnaryOp::Neg => write!(f, "(-{operand})"),
                UnaryOp::Not => write!(f, "(!{operand})"),
            },
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Call { callee, args, .. } => {
                let parts: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", callee, parts.join(", "))
            }
            Expr::Index { target, index, .. } => write!(f, "{target}[{index}]"),
            Expr::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                write!(f, "if {cond} ")?;
                write_block(f, then_branch)?;
                if let Some(else_branch) = else_branch {
                    write!(f, " else ")?;
                    write_block(f, else_branch)?;
                }
                Ok(())
            }
            Expr::Lambda { params, body, .. } => match body.as_ref() {
                Expr::Block { stmts, .. } => {
                    write!(f, "fun ({}) ", params.join(", "))?;
                    write_block(f, stmts)
                }
                other => write!(f, "fun ({}) -> {}", params.join(", "), other),
            },
            Expr::Block { stmts, .. } => write_block(f, stmts),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.stmts.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::{format_float, quote_string};

    #[test]
    /// 整数値の浮動小数にも小数点が付く。
    fn format_float_always_has_fraction() {
        assert_eq!(format_float(5.0), "5.0");
        assert_eq!(format_float(-0.5), "-0.5");
        assert_eq!(format_float(1e300), "1e300");
    }

    #[test]
    fn quote_string_escapes_specials() {
        assert_eq!(quote_string("a\"b\n"), "\"a\\\"b\\n\"");
    }
}
