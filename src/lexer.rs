// パス: src/lexer.rs
// 役割: UTF-8 対応の字句解析器とトークン定義を提供する
// 意図: 構文解析に必要な位置付きトークンと文区切りの改行トークンを生成する
// 関連ファイル: src/parser/mod.rs, src/errors.rs, src/repl/reader.rs
//! 字句解析モジュール
//!
//! - ソースをトークン列へ変換する。正規表現ライブラリは使わない。
//! - すべてのトークンに行・列・バイト位置を記録し、診断情報と連携させる。
//! - 改行は `(`/`[` の外側で、かつ直前が継続記号でない場合に限り `NEWLINE` として出力する。

use crate::errors::LexerError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// 生成されたトークンとその位置情報を保持するレコード。
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: usize,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// 字句解析で識別されるトークンの分類。
pub enum TokenKind {
    EOF,
    NEWLINE,
    // 演算子・記号トークン
    ARROW, // `->`
    EQ,
    NE,
    LE,
    GE,
    LT,
    GT,
    AND,
    OR,
    NOT,
    PLUS,
    MINUS,
    STAR,
    SLASH,
    PERCENT,
    CARET,
    PLUSEQ,
    MINUSEQ,
    STAREQ,
    SLASHEQ,
    PERCENTEQ,
    EQUAL,
    LPAREN,
    RPAREN,
    LBRACK,
    RBRACK,
    LBRACE,
    RBRACE,
    COMMA,
    SEMI,
    // リテラル分類
    STRING,
    FLOAT,
    INT,
    IDENT,
    // キーワード分類
    LET,
    VAR,
    INTTYPE,
    LONGTYPE,
    FLOATTYPE,
    DOUBLETYPE,
    BOOLTYPE,
    STRTYPE,
    FINAL,
    FUN,
    IF,
    ELSE,
    WHILE,
    TRUE,
    FALSE,
    NULL,
}

impl TokenKind {
    /// 診断メッセージ向けの表記。
    pub fn describe(self) -> &'static str {
        use TokenKind::*;
        match self {
            EOF => "end of input",
            NEWLINE => "newline",
            ARROW => "'->'",
            EQ => "'=='",
            NE => "'!='",
            LE => "'<='",
            GE => "'>='",
            LT => "'<'",
            GT => "'>'",
            AND => "'&&'",
            OR => "'||'",
            NOT => "'!'",
            PLUS => "'+'",
            MINUS => "'-'",
            STAR => "'*'",
            SLASH => "'/'",
            PERCENT => "'%'",
            CARET => "'^'",
            PLUSEQ => "'+='",
            MINUSEQ => "'-='",
            STAREQ => "'*='",
            SLASHEQ => "'/='",
            PERCENTEQ => "'%='",
            EQUAL => "'='",
            LPAREN => "'('",
            RPAREN => "')'",
            LBRACK => "'['",
            RBRACK => "']'",
            LBRACE => "'{'",
            RBRACE => "'}'",
            COMMA => "','",
            SEMI => "';'",
            STRING => "string",
            FLOAT => "float",
            INT => "integer",
            IDENT => "identifier",
            LET => "'let'",
            VAR => "'var'",
            INTTYPE => "'int'",
            LONGTYPE => "'long'",
            FLOATTYPE => "'float'",
            DOUBLETYPE => "'double'",
            BOOLTYPE => "'boolean'",
            STRTYPE => "'string'",
            FINAL => "'final'",
            FUN => "'fun'",
            IF => "'if'",
            ELSE => "'else'",
            WHILE => "'while'",
            TRUE => "'true'",
            FALSE => "'false'",
            NULL => "'null'",
        }
    }

    /// 行末に置かれたとき後続行を要求するトークンか。
    pub fn is_continuation(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            ARROW
                | EQ
                | NE
                | LE
                | GE
                | LT
                | GT
                | AND
                | OR
                | NOT
                | PLUS
                | MINUS
                | STAR
                | SLASH
                | PERCENT
                | CARET
                | PLUSEQ
                | MINUSEQ
                | STAREQ
                | SLASHEQ
                | PERCENTEQ
                | EQUAL
                | COMMA
        )
    }
}

#[derive(Debug)]
/// 行頭オフセットを事前計算し、行・列情報を素早く算出するヘルパ。
pub(crate) struct LineMap {
    starts: Vec<usize>,
}

impl LineMap {
    /// 入力全体を 1 度だけ走査して行頭インデックスを収集する。
    pub(crate) fn new(src: &str) -> Self {
        let mut starts = vec![0];
        for (idx, ch) in src.char_indices() {
            if ch == '\n' {
                starts.push(idx + 1);
            }
        }
        Self { starts }
    }

    /// 指定バイト位置の行番号と桁位置を返す。
    pub(crate) fn locate(&self, src: &str, pos: usize) -> (usize, usize) {
        let pos = pos.min(src.len());
        let idx = match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let start = self.starts[idx];
        let col = src[start..pos].chars().count() + 1;
        (idx + 1, col)
    }

    /// 指定行に対応するテキスト断片を返す（改行は除去する）。
    pub(crate) fn line_text<'a>(&self, src: &'a str, line: usize) -> &'a str {
        if line == 0 || line > self.starts.len() {
            return "";
        }
        let start = self.starts[line - 1];
        let end = self.starts.get(line).copied().unwrap_or(src.len());
        let slice = &src[start..end];
        slice.strip_suffix('\n').unwrap_or(slice)
    }
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}
fn is_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}
fn is_ident_rest(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Lexer<'a> {
    src: &'a str,
    cursor: usize,
    len: usize,
    line_map: LineMap,
    tokens: Vec<Token>,
    // 開いている括弧の種別。最内が `(` か `[` なら改行は空白扱い。
    groups: Vec<TokenKind>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            cursor: 0,
            len: src.len(),
            line_map: LineMap::new(src),
            tokens: Vec::new(),
            groups: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexerError> {
        loop {
            self.consume_trivia();
            if self.cursor >= self.len {
                break;
            }
            self.lex_token()?;
        }
        self.push_simple(TokenKind::EOF, "", self.len);
        Ok(self.tokens)
    }

    fn consume_trivia(&mut self) {
        while let Some(ch) = self.peek_char() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance_char();
                }
                '\n' => {
                    let pos = self.cursor;
                    self.advance_char();
                    self.push_newline(pos);
                }
                '/' if self.starts_with("//") => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn push_newline(&mut self, pos: usize) {
        if matches!(
            self.groups.last(),
            Some(TokenKind::LPAREN) | Some(TokenKind::LBRACK)
        ) {
            return;
        }
        match self.tokens.last().map(|t| t.kind) {
            None | Some(TokenKind::NEWLINE) | Some(TokenKind::SEMI) => {}
            Some(kind) if kind.is_continuation() => {}
            Some(_) => self.push_simple(TokenKind::NEWLINE, "\n", pos),
        }
    }

    fn lex_token(&mut self) -> Result<(), LexerError> {
        let start = self.cursor;
        let Some(ch) = self.peek_char() else {
            return Ok(());
        };
        if self.try_multi_char_symbol(ch) {
            return Ok(());
        }
        if self.try_single_char_symbol(ch) {
            return Ok(());
        }
        if ch == '"' || ch == '\'' {
            return self.lex_string_literal(ch);
        }
        if is_digit(ch) {
            return self.lex_number();
        }
        if is_letter(ch) {
            self.lex_identifier_or_keyword();
            return Ok(());
        }
        Err(self.err("LEX090", format!("字句解析に失敗: {:?}", ch), start))
    }

    fn try_multi_char_symbol(&mut self, first: char) -> bool {
        let Some(second) = self.peek_second_char() else {
            return false;
        };
        let token = match (first, second) {
            ('-', '>') => Some((TokenKind::ARROW, "->")),
            ('=', '=') => Some((TokenKind::EQ, "==")),
            ('!', '=') => Some((TokenKind::NE, "!=")),
            ('<', '=') => Some((TokenKind::LE, "<=")),
            ('>', '=') => Some((TokenKind::GE, ">=")),
            ('&', '&') => Some((TokenKind::AND, "&&")),
            ('|', '|') => Some((TokenKind::OR, "||")),
            ('+', '=') => Some((TokenKind::PLUSEQ, "+=")),
            ('-', '=') => Some((TokenKind::MINUSEQ, "-=")),
            ('*', '=') => Some((TokenKind::STAREQ, "*=")),
            ('/', '=') => Some((TokenKind::SLASHEQ, "/=")),
            ('%', '=') => Some((TokenKind::PERCENTEQ, "%=")),
            _ => None,
        };
        if let Some((kind, value)) = token {
            let start = self.cursor;
            self.advance_bytes(2);
            self.push_simple(kind, value, start);
            return true;
        }
        false
    }

    fn try_single_char_symbol(&mut self, ch: char) -> bool {
        let token = match ch {
            '<' => Some((TokenKind::LT, "<")),
            '>' => Some((TokenKind::GT, ">")),
            '!' => Some((TokenKind::NOT, "!")),
            '+' => Some((TokenKind::PLUS, "+")),
            '-' => Some((TokenKind::MINUS, "-")),
            '*' => Some((TokenKind::STAR, "*")),
            '/' => Some((TokenKind::SLASH, "/")),
            '%' => Some((TokenKind::PERCENT, "%")),
            '^' => Some((TokenKind::CARET, "^")),
            '=' => Some((TokenKind::EQUAL, "=")),
            '(' => Some((TokenKind::LPAREN, "(")),
            ')' => Some((TokenKind::RPAREN, ")")),
            '[' => Some((TokenKind::LBRACK, "[")),
            ']' => Some((TokenKind::RBRACK, "]")),
            '{' => Some((TokenKind::LBRACE, "{")),
            '}' => Some((TokenKind::RBRACE, "}")),
            ',' => Some((TokenKind::COMMA, ",")),
            ';' => Some((TokenKind::SEMI, ";")),
            _ => None,
        };
        let Some((kind, value)) = token else {
            return false;
        };
        match kind {
            TokenKind::LPAREN | TokenKind::LBRACK | TokenKind::LBRACE => self.groups.push(kind),
            TokenKind::RPAREN | TokenKind::RBRACK | TokenKind::RBRACE => {
                self.groups.pop();
            }
            _ => {}
        }
        let start = self.cursor;
        self.advance_bytes(1);
        self.push_simple(kind, value, start);
        true
    }

    fn lex_string_literal(&mut self, quote: char) -> Result<(), LexerError> {
        let start = self.cursor;
        self.advance_bytes(1); // 開始クォート
        let mut escaped = false;
        let mut ok = false;
        while let Some(ch) = self.advance_char() {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                ok = true;
                break;
            }
        }
        if !ok {
            return Err(self.err("LEX003", "文字列リテラルが閉じていません", start));
        }
        let end = self.cursor;
        self.push_slice(TokenKind::STRING, start, end);
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), LexerError> {
        let start = self.cursor;
        self.skip_digits();

        let mut is_float = false;
        if self.peek_char() == Some('.') && self.peek_second_char().is_some_and(is_digit) {
            is_float = true;
            self.advance_char(); // '.'
            self.skip_digits();
        }

        if let Some('e') | Some('E') = self.peek_char() {
            let mut idx = self.cursor + 1;
            if let Some('+') | Some('-') = self.char_at(idx) {
                idx += 1;
            }
            let mut scan = idx;
            while let Some(ch) = self.char_at(scan) {
                if !is_digit(ch) {
                    break;
                }
                scan += 1;
            }
            if scan > idx {
                is_float = true;
                self.cursor = scan;
            }
        }

        if self.peek_char().is_some_and(is_letter) {
            return Err(self.err("LEX010", "数値リテラルの直後に識別子があります", start));
        }
        let end = self.cursor;
        let kind = if is_float {
            TokenKind::FLOAT
        } else {
            TokenKind::INT
        };
        self.push_slice(kind, start, end);
        Ok(())
    }

    fn skip_digits(&mut self) {
        while self.peek_char().is_some_and(is_digit) {
            self.advance_char();
        }
    }

    fn lex_identifier_or_keyword(&mut self) {
        let start = self.cursor;
        self.advance_char();
        while self.peek_char().is_some_and(is_ident_rest) {
            self.advance_char();
        }
        let slice = &self.src[start..self.cursor];
        let kind = keyword(slice).unwrap_or(TokenKind::IDENT);
        self.push_simple(kind, slice, start);
    }

    fn push_simple(&mut self, kind: TokenKind, value: &str, start: usize) {
        let (line, col) = self.line_map.locate(self.src, start);
        self.tokens.push(Token {
            kind,
            value: value.into(),
            pos: start,
            line,
            col,
        });
    }

    fn push_slice(&mut self, kind: TokenKind, start: usize, end: usize) {
        let value = &self.src[start..end];
        self.push_simple(kind, value, start);
    }

    fn peek_char(&self) -> Option<char> {
        self.char_at(self.cursor)
    }

    fn peek_second_char(&self) -> Option<char> {
        let mut iter = self.src[self.cursor..].chars();
        iter.next()?;
        iter.next()
    }

    fn char_at(&self, idx: usize) -> Option<char> {
        if idx >= self.len {
            None
        } else {
            self.src[idx..].chars().next()
        }
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.advance_bytes(ch.len_utf8());
        Some(ch)
    }

    fn advance_bytes(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.len);
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.src[self.cursor..].starts_with(pattern)
    }

    fn err(&self, code: &'static str, message: impl Into<String>, pos: usize) -> LexerError {
        let (line, col) = self.line_map.locate(self.src, pos);
        LexerError::at_with_snippet(
            code,
            message,
            Some(pos),
            Some(line),
            Some(col),
            self.line_map.line_text(self.src, line).to_string(),
        )
    }
}

/// 予約語ならそのトークン種別を返す。
pub fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "let" => TokenKind::LET,
        "var" => TokenKind::VAR,
        "int" => TokenKind::INTTYPE,
        "long" => TokenKind::LONGTYPE,
        "float" => TokenKind::FLOATTYPE,
        "double" => TokenKind::DOUBLETYPE,
        "boolean" => TokenKind::BOOLTYPE,
        "string" => TokenKind::STRTYPE,
        "final" => TokenKind::FINAL,
        "fun" => TokenKind::FUN,
        "if" => TokenKind::IF,
        "else" => TokenKind::ELSE,
        "while" => TokenKind::WHILE,
        "true" => TokenKind::TRUE,
        "false" => TokenKind::FALSE,
        "null" => TokenKind::NULL,
        _ => return None,
    };
    Some(kind)
}

pub fn lex(src: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::new(src).run()
}
