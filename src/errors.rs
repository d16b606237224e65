//! エラー型の定義（共通フォーマット: \[CODE\] メッセージ @line:col / @pos）。
//!
//! 字句・構文・評価の各フェーズは `ErrorInfo` を包んだ専用型を返し、
//! REPL 全体の失敗は `ReplError` に集約する。

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub msg: String,
    pub pos: Option<usize>,      // バイトオフセット（任意）
    pub line: Option<usize>,     // 1-origin（任意）
    pub col: Option<usize>,      // 1-origin（任意）
    pub snippet: Option<String>, // エラー行のスニペット（任意）
}

impl ErrorInfo {
    pub fn new(code: &'static str, msg: impl Into<String>, pos: Option<usize>) -> Self {
        Self {
            code,
            msg: msg.into(),
            pos,
            line: None,
            col: None,
            snippet: None,
        }
    }
    pub fn at(
        code: &'static str,
        msg: impl Into<String>,
        pos: Option<usize>,
        line: Option<usize>,
        col: Option<usize>,
    ) -> Self {
        Self {
            code,
            msg: msg.into(),
            pos,
            line,
            col,
            snippet: None,
        }
    }
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// ソース全体から該当行を切り出してスニペットとして添付する。
    pub fn with_source(self, src: &str) -> Self {
        match self.line {
            Some(line) if self.snippet.is_none() => match src.lines().nth(line - 1) {
                Some(text) => self.with_snippet(text),
                None => self,
            },
            _ => self,
        }
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // 1行目: ヘッダ
        match (self.line, self.col, self.pos) {
            (Some(l), Some(c), Some(p)) => write!(
                f,
                "[{}] {} @line={},col={} @pos={}",
                self.code, self.msg, l, c, p
            )?,
            (Some(l), Some(c), None) => {
                write!(f, "[{}] {} @line={},col={}", self.code, self.msg, l, c)?
            }
            (_, _, Some(p)) => write!(f, "[{}] {} @pos={}", self.code, self.msg, p)?,
            _ => write!(f, "[{}] {}", self.code, self.msg)?,
        }
        // 2行目以降: スニペットとキャレット
        if let (Some(s), Some(c)) = (&self.snippet, self.col) {
            let caret = " ".repeat(c.saturating_sub(1)) + "^";
            write!(f, "\n{}\n{}", s, caret)?;
        }
        Ok(())
    }
}

/// 字句解析（および入力単位の未完了検出）で発生するエラー。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerError(pub ErrorInfo);
impl LexerError {
    pub fn new(code: &'static str, msg: impl Into<String>, pos: Option<usize>) -> Self {
        Self(ErrorInfo::new(code, msg, pos))
    }
    pub fn at_with_snippet(
        code: &'static str,
        msg: impl Into<String>,
        pos: Option<usize>,
        line: Option<usize>,
        col: Option<usize>,
        snippet: impl Into<String>,
    ) -> Self {
        Self(ErrorInfo::at(code, msg, pos, line, col).with_snippet(snippet))
    }
}

/// 構文エラー。位置情報に加えて、その位置で受理可能だったトークン種別を保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub info: ErrorInfo,
    pub expected: Vec<&'static str>,
}
impl ParseError {
    pub fn new(code: &'static str, msg: impl Into<String>, pos: Option<usize>) -> Self {
        Self {
            info: ErrorInfo::new(code, msg, pos),
            expected: Vec::new(),
        }
    }
    pub fn at(
        code: &'static str,
        msg: impl Into<String>,
        pos: Option<usize>,
        line: Option<usize>,
        col: Option<usize>,
    ) -> Self {
        Self {
            info: ErrorInfo::at(code, msg, pos, line, col),
            expected: Vec::new(),
        }
    }
    pub fn expecting(mut self, expected: &[&'static str]) -> Self {
        self.expected = expected.to_vec();
        self
    }
    pub fn with_source(mut self, src: &str) -> Self {
        self.info = self.info.with_source(src);
        self
    }
}

/// 評価時エラーの分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    UndefinedReference,
    TypeMismatch,
    ArityMismatch,
    DivisionByZero,
    InvalidAssignment,
    RecursionLimit,
    Timeout,
    UserAbort,
}

impl EvalErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            EvalErrorKind::UndefinedReference => "EVAL010",
            EvalErrorKind::TypeMismatch => "EVAL050",
            EvalErrorKind::ArityMismatch => "EVAL030",
            EvalErrorKind::DivisionByZero => "EVAL061",
            EvalErrorKind::InvalidAssignment => "EVAL080",
            EvalErrorKind::RecursionLimit => "EVAL090",
            EvalErrorKind::Timeout => "EVAL070",
            EvalErrorKind::UserAbort => "EVAL071",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub info: ErrorInfo,
}
impl EvalError {
    pub fn new(kind: EvalErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            info: ErrorInfo::new(kind.code(), msg, None),
        }
    }
    pub fn at(kind: EvalErrorKind, msg: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            info: ErrorInfo::at(kind.code(), msg, None, Some(line), Some(col)),
        }
    }
    /// 位置未設定のエラーにだけ位置を補う（内側の位置を優先する）。
    pub fn or_at(mut self, line: usize, col: usize) -> Self {
        if self.info.line.is_none() {
            self.info.line = Some(line);
            self.info.col = Some(col);
        }
        self
    }
    pub fn with_source(mut self, src: &str) -> Self {
        self.info = self.info.with_source(src);
        self
    }
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
impl StdError for LexerError {}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.info, f)?;
        if !self.expected.is_empty() {
            write!(f, "\n期待: {}", self.expected.join(", "))?;
        }
        Ok(())
    }
}
impl StdError for ParseError {}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.info, f)
    }
}
impl StdError for EvalError {}

/// 入力単位の処理で起こりうる失敗の総称。`Io` と `Config` のみが致命的。
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("{0}")]
    Lex(#[from] LexerError),
    #[error("{0}")]
    Syntax(#[from] ParseError),
    #[error("{0}")]
    Eval(#[from] EvalError),
    #[error("I/O エラー: {0}")]
    Io(#[from] io::Error),
    #[error("設定エラー: {0}")]
    Config(String),
}

impl ReplError {
    /// セッションを継続できない種類のエラーかどうか。
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplError::Io(_) | ReplError::Config(_))
    }

    /// 表示用の分類名。
    pub fn category(&self) -> &'static str {
        match self {
            ReplError::Lex(_) => "LexError",
            ReplError::Syntax(_) => "SyntaxError",
            ReplError::Eval(_) => "EvalError",
            ReplError::Io(_) | ReplError::Config(_) => "FatalError",
        }
    }
}
