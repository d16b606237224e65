// パス: src/parser/program.rs
// 役割: 文の並び・宣言・代入・while の構文解析ルーチンを実装する
// 意図: 文レベルの解析ロジックを式解析から分離し可読性を高める
// 関連ファイル: src/parser/expr.rs, src/parser/mod.rs

use super::*;

const DECL_KEYWORDS: &[TokenKind] = &[
    TokenKind::LET,
    TokenKind::VAR,
    TokenKind::INTTYPE,
    TokenKind::LONGTYPE,
    TokenKind::FLOATTYPE,
    TokenKind::DOUBLETYPE,
    TokenKind::BOOLTYPE,
    TokenKind::STRTYPE,
];

fn decl_kind(kind: TokenKind) -> Option<DeclKind> {
    let k = match kind {
        TokenKind::LET => DeclKind::Let,
        TokenKind::VAR => DeclKind::Var,
        TokenKind::INTTYPE => DeclKind::Int,
        TokenKind::LONGTYPE => DeclKind::Long,
        TokenKind::FLOATTYPE => DeclKind::Float,
        TokenKind::DOUBLETYPE => DeclKind::Double,
        TokenKind::BOOLTYPE => DeclKind::Boolean,
        TokenKind::STRTYPE => DeclKind::Str,
        _ => return None,
    };
    Some(k)
}

fn assign_op(kind: TokenKind) -> Option<AssignOp> {
    let op = match kind {
        TokenKind::EQUAL => AssignOp::Set,
        TokenKind::PLUSEQ => AssignOp::Add,
        TokenKind::MINUSEQ => AssignOp::Sub,
        TokenKind::STAREQ => AssignOp::Mul,
        TokenKind::SLASHEQ => AssignOp::Div,
        TokenKind::PERCENTEQ => AssignOp::Rem,
        _ => return None,
    };
    Some(op)
}

impl Parser {
    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let stmts = self.parse_stmt_list(TokenKind::EOF)?;
        Ok(Program { stmts })
    }

    /// `terminator` が現れるまで区切り付きの文を読む（終端トークン自体は消費しない）。
    pub(super) fn parse_stmt_list(&mut self, terminator: TokenKind) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while self.peek().kind != terminator {
            if self.peek().kind == TokenKind::EOF {
                return Err(self.unexpected(&[terminator]));
            }
            stmts.push(self.parse_stmt()?);
            match self.peek().kind {
                TokenKind::NEWLINE | TokenKind::SEMI => self.skip_separators(),
                k if k == terminator => {}
                _ => {
                    return Err(self.unexpected(&[
                        TokenKind::NEWLINE,
                        TokenKind::SEMI,
                        terminator,
                    ]))
                }
            }
        }
        Ok(stmts)
    }

    pub(super) fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let kind = self.peek().kind;
        if kind == TokenKind::FINAL || decl_kind(kind).is_some() {
            return self.parse_decl();
        }
        match kind {
            TokenKind::FUN if self.peek_kind(1) == Some(TokenKind::IDENT) => self.parse_fun_decl(),
            TokenKind::WHILE => self.parse_while(),
            TokenKind::IDENT if self.peek_kind(1).and_then(assign_op).is_some() => {
                self.parse_assign()
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_decl(&mut self) -> Result<Stmt, ParseError> {
        let first = self.peek().clone();
        let is_final = self.accept(TokenKind::FINAL).is_some();
        let Some(kind) = decl_kind(self.peek().kind) else {
            return Err(self.unexpected(DECL_KEYWORDS));
        };
        self.pop_any();
        let mut bindings = Vec::new();
        loop {
            let name_tok = self.pop(TokenKind::IDENT)?;
            let value = if self.accept(TokenKind::EQUAL).is_some() {
                self.parse_expr()?
            } else {
                Expr::Null {
                    span: span_from_token(&name_tok),
                }
            };
            bindings.push((name_tok.value, value));
            if self.accept(TokenKind::COMMA).is_none() {
                break;
            }
        }
        Ok(Stmt::Decl {
            kind,
            is_final,
            bindings,
            span: span_from_token(&first),
        })
    }

    fn parse_fun_decl(&mut self) -> Result<Stmt, ParseError> {
        let fun_tok = self.pop(TokenKind::FUN)?;
        let name = self.pop(TokenKind::IDENT)?.value;
        let params = self.parse_params()?;
        let body = self.parse_fun_body()?;
        Ok(Stmt::FunDecl {
            name,
            params,
            body: Rc::new(body),
            span: span_from_token(&fun_tok),
        })
    }

    fn parse_assign(&mut self) -> Result<Stmt, ParseError> {
        let name_tok = self.pop(TokenKind::IDENT)?;
        let op_tok = self.pop_any();
        let op = assign_op(op_tok.kind).unwrap_or(AssignOp::Set);
        let value = self.parse_expr()?;
        Ok(Stmt::Assign {
            name: name_tok.value,
            op,
            value,
            span: span_from_token(&op_tok),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let while_tok = self.pop(TokenKind::WHILE)?;
        let cond = self.parse_expr()?;
        let body = self.parse_block_stmts()?;
        Ok(Stmt::While {
            cond,
            body,
            span: span_from_token(&while_tok),
        })
    }

    /// `{ stmts }` を読み、中身の文列を返す。
    pub(super) fn parse_block_stmts(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.pop(TokenKind::LBRACE)?;
        let stmts = self.nested(|p| p.parse_stmt_list(TokenKind::RBRACE))?;
        self.pop(TokenKind::RBRACE)?;
        Ok(stmts)
    }
}
