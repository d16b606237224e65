// パス: src/parser/expr.rs
// 役割: 式解析に関する `Parser` 実装をまとめる
// 意図: 中置演算・単項演算・呼び出し連鎖など複雑なロジックを専用モジュールに切り分ける
// 関連ファイル: src/parser/program.rs, src/parser/mod.rs

use super::*;

impl Parser {
    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_infix_level(0)
    }

    fn parse_infix_level(&mut self, level: usize) -> Result<Expr, ParseError> {
        if level >= INFIX_LEVELS.len() {
            return self.parse_unary();
        }
        let spec = &INFIX_LEVELS[level];
        let mut left = self.parse_infix_level(level + 1)?;
        match spec.assoc {
            Assoc::Left => {
                while let Some(op) = spec.lookup(self.peek().kind) {
                    let op_token = self.pop_any();
                    let right = self.parse_infix_level(level + 1)?;
                    left = Self::mk_binop(op, left, &op_token, right);
                }
                Ok(left)
            }
            Assoc::Non => {
                let Some(op) = spec.lookup(self.peek().kind) else {
                    return Ok(left);
                };
                let op_token = self.pop_any();
                let right = self.parse_infix_level(level + 1)?;
                if spec.lookup(self.peek().kind).is_some() {
                    let t = self.peek();
                    return Err(ParseError::at(
                        "PAR020",
                        "比較演算子は連結できません（括弧で区切ってください）",
                        Some(t.pos),
                        Some(t.line),
                        Some(t.col),
                    ));
                }
                Ok(Self::mk_binop(op, left, &op_token, right))
            }
        }
    }

    fn mk_binop(op: BinOp, left: Expr, op_token: &Token, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: span_from_token(op_token),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let t = self.peek().clone();
        let op = match t.kind {
            TokenKind::MINUS => UnaryOp::Neg,
            TokenKind::NOT => UnaryOp::Not,
            _ => return self.parse_pow(),
        };
        self.pop_any();
        if op == UnaryOp::Neg {
            if let Some(value) = self.min_int_literal() {
                return Ok(Expr::Int {
                    value,
                    span: span_from_token(&t),
                });
            }
        }
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span: span_from_token(&t),
        })
    }

    // `-9223372036854775808` は正の側で表せないため、符号ごと 1 つのリテラルとして読む。
    // `^` が続く場合は `-(x ^ y)` のままにする。
    fn min_int_literal(&mut self) -> Option<i64> {
        let lit = self.peek();
        if lit.kind != TokenKind::INT
            || lit.value.parse::<i64>().is_ok()
            || self.peek_kind(1) == Some(TokenKind::CARET)
        {
            return None;
        }
        let value = format!("-{}", lit.value).parse::<i64>().ok()?;
        self.pop_any();
        Some(value)
    }

    // `^` は右結合で、右辺には単項演算を許す（`2 ^ -1`）。
    fn parse_pow(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if let Some(op_token) = self.accept(TokenKind::CARET) {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Self::mk_binop(BinOp::Pow, base, &op_token, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if let Some(open) = self.accept(TokenKind::LPAREN) {
                let args = self.nested(|p| p.parse_comma_list(TokenKind::RPAREN))?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span: span_from_token(&open),
                };
            } else if let Some(open) = self.accept(TokenKind::LBRACK) {
                let index = self.nested(|p| {
                    let index = p.parse_expr()?;
                    p.pop(TokenKind::RBRACK)?;
                    Ok(index)
                })?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                    span: span_from_token(&open),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// 開き括弧の直後から `close` までのカンマ区切り式を読む。
    fn parse_comma_list(&mut self, close: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.accept(close).is_some() {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.accept(TokenKind::COMMA).is_some() {
                continue;
            }
            if self.accept(close).is_some() {
                return Ok(items);
            }
            return Err(self.unexpected(&[TokenKind::COMMA, close]));
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let t = self.peek().clone();
        let span = span_from_token(&t);
        match t.kind {
            TokenKind::INT => {
                self.pop_any();
                let value = t.value.parse::<i64>().map_err(|_| {
                    ParseError::at(
                        "PAR210",
                        "整数リテラルが範囲外",
                        Some(t.pos),
                        Some(t.line),
                        Some(t.col),
                    )
                })?;
                Ok(Expr::Int { value, span })
            }
            TokenKind::FLOAT => {
                self.pop_any();
                let value = t.value.parse::<f64>().map_err(|_| {
                    ParseError::at(
                        "PAR220",
                        "浮動小数リテラルが不正",
                        Some(t.pos),
                        Some(t.line),
                        Some(t.col),
                    )
                })?;
                Ok(Expr::Float { value, span })
            }
            TokenKind::STRING => {
                self.pop_any();
                let value = decode_string(&t.value).map_err(|mut e| {
                    e.info.line = Some(t.line);
                    e.info.col = Some(t.col);
                    e.info.pos = Some(t.pos);
                    e
                })?;
                Ok(Expr::Str { value, span })
            }
            TokenKind::TRUE | TokenKind::FALSE => {
                self.pop_any();
                Ok(Expr::Bool {
                    value: t.kind == TokenKind::TRUE,
                    span,
                })
            }
            TokenKind::NULL => {
                self.pop_any();
                Ok(Expr::Null { span })
            }
            TokenKind::IDENT => {
                self.pop_any();
                Ok(Expr::Var { name: t.value, span })
            }
            TokenKind::LPAREN => {
                self.pop_any();
                self.nested(|p| {
                    let expr = p.parse_expr()?;
                    p.pop(TokenKind::RPAREN)?;
                    Ok(expr)
                })
            }
            TokenKind::LBRACK => {
                self.pop_any();
                let items = self.nested(|p| p.parse_comma_list(TokenKind::RBRACK))?;
                Ok(Expr::List { items, span })
            }
            TokenKind::LBRACE => {
                let stmts = self.parse_block_stmts()?;
                Ok(Expr::Block { stmts, span })
            }
            TokenKind::IF => self.nested(Self::parse_if),
            TokenKind::FUN => self.nested(Self::parse_lambda),
            _ => Err(self.unexpected(EXPR_START)),
        }
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let if_tok = self.pop(TokenKind::IF)?;
        let cond = self.parse_expr()?;
        let then_branch = self.parse_block_stmts()?;
        // `}` の後の改行をまたいで `else` を探す
        if self.peek().kind == TokenKind::NEWLINE && self.peek_past_newlines() == TokenKind::ELSE {
            while self.accept(TokenKind::NEWLINE).is_some() {}
        }
        let else_branch = if self.accept(TokenKind::ELSE).is_some() {
            if self.peek().kind == TokenKind::IF {
                let chained = self.nested(Self::parse_if)?;
                Some(vec![Stmt::Expr(chained)])
            } else {
                Some(self.parse_block_stmts()?)
            }
        } else {
            None
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch,
            else_branch,
            span: span_from_token(&if_tok),
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let fun_tok = self.pop(TokenKind::FUN)?;
        let params = self.parse_params()?;
        let body = self.parse_fun_body()?;
        Ok(Expr::Lambda {
            params,
            body: Rc::new(body),
            span: span_from_token(&fun_tok),
        })
    }

    /// `(a, b, ...)` 形式の仮引数列。重複名はエラー。
    pub(super) fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.pop(TokenKind::LPAREN)?;
        let mut params: Vec<String> = Vec::new();
        if self.accept(TokenKind::RPAREN).is_some() {
            return Ok(params);
        }
        loop {
            let tok = self.pop(TokenKind::IDENT)?;
            if params.contains(&tok.value) {
                return Err(ParseError::at(
                    "PAR040",
                    format!("仮引数名が重複しています: {}", tok.value),
                    Some(tok.pos),
                    Some(tok.line),
                    Some(tok.col),
                ));
            }
            params.push(tok.value);
            if self.accept(TokenKind::COMMA).is_some() {
                continue;
            }
            self.pop(TokenKind::RPAREN)?;
            return Ok(params);
        }
    }

    /// `-> expr` またはブロック本体。
    pub(super) fn parse_fun_body(&mut self) -> Result<Expr, ParseError> {
        if self.accept(TokenKind::ARROW).is_some() {
            return self.parse_expr();
        }
        if self.peek().kind == TokenKind::LBRACE {
            let span = span_from_token(self.peek());
            let stmts = self.parse_block_stmts()?;
            return Ok(Expr::Block { stmts, span });
        }
        Err(self.unexpected(&[TokenKind::ARROW, TokenKind::LBRACE]))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{BinOp, Expr, UnaryOp};
    use crate::parser::parse_expr;

    fn expr(src: &str) -> Expr {
        parse_expr(src).unwrap()
    }

    #[test]
    /// 乗算は加算より強く結合する。
    fn multiplicative_binds_tighter() {
        assert_eq!(expr("1 + 2 * 3").to_string(), "(1 + (2 * 3))");
        assert_eq!(expr("(1 + 2) * 3").to_string(), "((1 + 2) * 3)");
        assert_eq!(expr("10 - 4 - 3").to_string(), "((10 - 4) - 3)");
    }

    #[test]
    /// `^` は右結合で、単項マイナスより強い。
    fn power_is_right_assoc_and_tighter_than_neg() {
        assert_eq!(expr("2 ^ 3 ^ 2").to_string(), "(2 ^ (3 ^ 2))");
        match expr("-2 ^ 2") {
            Expr::Unary { op, operand, .. } => {
                assert_eq!(op, UnaryOp::Neg);
                assert!(matches!(*operand, Expr::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    /// 呼び出しと添字は連鎖できる。
    fn call_and_index_chain() {
        assert_eq!(expr("f(1)(2)[0]").to_string(), "f(1)(2)[0]");
    }

    #[test]
    /// 比較演算子の連結は構文エラー。
    fn chained_comparison_is_rejected() {
        let err = parse_expr("1 < 2 < 3").unwrap_err();
        assert!(err.to_string().contains("PAR020"));
    }

    #[test]
    /// 深すぎる括弧はスタックを使い切る前に構文エラーになる。
    fn deep_nesting_is_a_syntax_error() {
        let src = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse_expr(&src).unwrap_err();
        assert!(err.to_string().contains("PAR030"), "{err}");

        let brackets = format!("{}1{}", "[".repeat(300), "]".repeat(300));
        assert!(parse_expr(&brackets).unwrap_err().to_string().contains("PAR030"));
        let negations = format!("{}1", "-".repeat(300));
        assert!(parse_expr(&negations).unwrap_err().to_string().contains("PAR030"));
    }

    #[test]
    /// 上限以内の入れ子はそのまま読める。
    fn moderate_nesting_is_accepted() {
        let src = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(expr(&src), Expr::Int { value: 1, .. }));
        let blocks = format!("{}1{}", "{ ".repeat(50), " }".repeat(50));
        assert!(parse_expr(&blocks).is_ok());
    }

    #[test]
    /// i64 の最小値は負のリテラルとして読める。
    fn min_int_literal_parses() {
        assert!(matches!(
            expr("-9223372036854775808"),
            Expr::Int { value: i64::MIN, .. }
        ));
        assert_eq!(expr("[-9223372036854775808]").to_string(), "[-9223372036854775808]");
        assert!(parse_expr("9223372036854775808").unwrap_err().to_string().contains("PAR210"));
        assert!(matches!(expr("-5"), Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn logical_precedence() {
        assert_eq!(
            expr("a || b && !c").to_string(),
            "(a || (b && (!c)))"
        );
    }
}
