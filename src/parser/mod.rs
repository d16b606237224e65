// パス: src/parser/mod.rs
// 役割: トークン列から AST を生成する再帰下降パーサのエントリポイント
// 意図: 字句解析結果を評価器と REPL に渡すためのモジュール構成を整理する
// 関連ファイル: src/parser/program.rs, src/parser/expr.rs, src/lexer.rs
//! 構文解析モジュール
//!
//! - 文の並びと式を再帰下降で解析する。二項演算子は優先順位表による登り法で処理する。
//! - 優先順位は低い順に `|| < && < 比較 < 加減 < 乗除剰余 < 単項 < ^ < 呼び出し/添字`。
//! - 最初の構文エラーで入力全体の解析を打ち切り、部分的な AST は返さない。

use std::rc::Rc;

use crate::ast::{AssignOp, BinOp, DeclKind, Expr, Program, Span, Stmt, UnaryOp};
use crate::errors::{ParseError, ReplError};
use crate::lexer::{lex, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;

mod expr;
mod program;

/// 括弧・ブロック・単項演算などの入れ子の上限。
pub const MAX_NESTING: usize = 256;

pub struct Parser {
    ts: Vec<Token>,
    i: usize,
    depth: usize,
}

#[derive(Clone, Copy)]
pub(super) enum Assoc {
    Left,
    Non,
}

pub(super) struct InfixSpec {
    pub tokens: &'static [(TokenKind, BinOp)],
    pub assoc: Assoc,
}

impl InfixSpec {
    pub(super) fn lookup(&self, kind: TokenKind) -> Option<BinOp> {
        self.tokens
            .iter()
            .find(|(tk, _)| *tk == kind)
            .map(|(_, op)| *op)
    }
}

pub(super) const INFIX_LEVELS: &[InfixSpec] = &[
    InfixSpec {
        tokens: &[(TokenKind::OR, BinOp::Or)],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[(TokenKind::AND, BinOp::And)],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[
            (TokenKind::EQ, BinOp::Eq),
            (TokenKind::NE, BinOp::Ne),
            (TokenKind::LT, BinOp::Lt),
            (TokenKind::LE, BinOp::Le),
            (TokenKind::GT, BinOp::Gt),
            (TokenKind::GE, BinOp::Ge),
        ],
        assoc: Assoc::Non,
    },
    InfixSpec {
        tokens: &[(TokenKind::PLUS, BinOp::Add), (TokenKind::MINUS, BinOp::Sub)],
        assoc: Assoc::Left,
    },
    InfixSpec {
        tokens: &[
            (TokenKind::STAR, BinOp::Mul),
            (TokenKind::SLASH, BinOp::Div),
            (TokenKind::PERCENT, BinOp::Rem),
        ],
        assoc: Assoc::Left,
    },
];

/// 式の先頭になりうるトークン（エラー時の期待一覧）。
pub(super) const EXPR_START: &[TokenKind] = &[
    TokenKind::INT,
    TokenKind::FLOAT,
    TokenKind::STRING,
    TokenKind::IDENT,
    TokenKind::TRUE,
    TokenKind::FALSE,
    TokenKind::NULL,
    TokenKind::LPAREN,
    TokenKind::LBRACK,
    TokenKind::LBRACE,
    TokenKind::IF,
    TokenKind::FUN,
    TokenKind::MINUS,
    TokenKind::NOT,
];

impl Parser {
    /// トークン列から新しいパーサインスタンスを構築する。
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            ts: tokens,
            i: 0,
            depth: 0,
        }
    }

    /// 入れ子 1 段分の解析を `f` に任せる。上限を超える入れ子は `PAR030`。
    pub(super) fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            let t = self.peek();
            return Err(ParseError::at(
                "PAR030",
                format!("入れ子が深すぎます（上限 {MAX_NESTING} 段）"),
                Some(t.pos),
                Some(t.line),
                Some(t.col),
            ));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| f(self));
        self.depth -= 1;
        result
    }

    pub(super) fn peek(&self) -> &Token {
        // 末尾は必ず EOF トークン
        &self.ts[self.i.min(self.ts.len() - 1)]
    }

    pub(super) fn pop_any(&mut self) -> Token {
        let t = self.peek().clone();
        if self.i < self.ts.len() - 1 {
            self.i += 1;
        }
        t
    }

    pub(super) fn peek_kind(&self, offset: usize) -> Option<TokenKind> {
        self.ts.get(self.i + offset).map(|t| t.kind)
    }

    pub(super) fn pop(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.peek().kind != kind {
            return Err(self.unexpected(&[kind]));
        }
        Ok(self.pop_any())
    }

    pub(super) fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().kind == kind {
            Some(self.pop_any())
        } else {
            None
        }
    }

    /// 現在のトークンが期待に合わないことを示すエラーを組み立てる。
    pub(super) fn unexpected(&self, expected: &[TokenKind]) -> ParseError {
        let t = self.peek();
        let names: Vec<&'static str> = expected.iter().map(|k| k.describe()).collect();
        let found = if t.kind == TokenKind::EOF || t.kind == TokenKind::NEWLINE {
            t.kind.describe().to_string()
        } else {
            format!("{} ({})", t.kind.describe(), t.value)
        };
        let msg = if names.len() == 1 {
            format!("{} を期待しましたが {} が見つかりました", names[0], found)
        } else {
            format!("予期しないトークン: {}", found)
        };
        ParseError::at("PAR001", msg, Some(t.pos), Some(t.line), Some(t.col)).expecting(&names)
    }

    /// `NEWLINE` と `;` を読み飛ばす。
    pub(super) fn skip_separators(&mut self) {
        while matches!(self.peek().kind, TokenKind::NEWLINE | TokenKind::SEMI) {
            self.pop_any();
        }
    }

    /// 改行をまたいだ次の有意トークン種別を覗く。
    pub(super) fn peek_past_newlines(&self) -> TokenKind {
        let mut offset = 0;
        while let Some(kind) = self.peek_kind(offset) {
            if kind != TokenKind::NEWLINE {
                return kind;
            }
            offset += 1;
        }
        TokenKind::EOF
    }
}

pub(super) fn span_from_token(token: &Token) -> Span {
    Span::new(token.pos, token.line, token.col)
}

/// クォートを外し、エスケープを解決した文字列を返す。`"` と `'` の両方を受け付ける。
pub(super) fn decode_string(quoted: &str) -> Result<String, ParseError> {
    let (Some(open), Some(close)) = (quoted.chars().next(), quoted.chars().last()) else {
        return Err(ParseError::new("PAR201", "文字列リテラルが不正", None));
    };
    if quoted.len() < 2 || !matches!(open, '"' | '\'') || open != close {
        return Err(ParseError::new("PAR201", "文字列リテラルが不正", None));
    }
    let s = &quoted[1..quoted.len() - 1];
    let mut out = String::new();
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let Some(e) = chars.next() else {
                return Err(ParseError::new("PAR202", "末尾のバックスラッシュ", None));
            };
            match e {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                '0' => out.push('\0'),
                other => out.push(other),
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

/// 入力単位全体をプログラムとして解析する。字句エラーはそのまま `ReplError::Lex` になる。
pub fn parse_program(src: &str) -> Result<Program, ReplError> {
    let ts = lex(src)?;
    Parser::new(ts)
        .parse_program()
        .map_err(|e| ReplError::Syntax(e.with_source(src)))
}

/// 単一の式を解析する。余分なトークンが残ればエラー。
pub fn parse_expr(src: &str) -> Result<Expr, ReplError> {
    let ts = lex(src)?;
    let mut p = Parser::new(ts);
    let parsed = p.parse_expr().and_then(|e| {
        p.skip_separators();
        if p.peek().kind != TokenKind::EOF {
            let t = p.peek();
            return Err(ParseError::at(
                "PAR090",
                "余分なトークンが残っています",
                Some(t.pos),
                Some(t.line),
                Some(t.col),
            )
            .expecting(&[TokenKind::EOF.describe()]));
        }
        Ok(e)
    });
    parsed.map_err(|e| ReplError::Syntax(e.with_source(src)))
}
