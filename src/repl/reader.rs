// パス: src/repl/reader.rs
// 役割: 行単位の入力を蓄積し、評価可能な入力単位の区切りを判定する
// 意図: 端末 I/O から切り離した小さな状態機械として継続入力の判定を単体テスト可能にする
// 関連ファイル: src/repl/cmd.rs, src/lexer.rs
//! 入力単位リーダー
//!
//! - 括弧の開閉スタック・文字列の開閉・行末の継続演算子で完結を判定する。
//! - 判定はコメント（`//` 以降）を無視し、文字列内部の括弧や演算子は数えない。
//! - 対応しない閉じ括弧はスタックを負にせず、そのまま単位を確定させて構文解析に委ねる。

use tracing::trace;

use crate::errors::LexerError;
use crate::lexer::LineMap;

/// 評価に回す 1 単位分の入力。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputUnit {
    pub text: String,
    pub lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    NeedMore,
    Complete(InputUnit),
}

#[derive(Debug, Default)]
pub struct Reader {
    buffer: String,
    lines: usize,
}

/// バッファ全体を走査した結果。
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Scan {
    pub(crate) open: Vec<(char, usize)>,
    pub(crate) quote: Option<(char, usize)>,
    pub(crate) dangling: Option<usize>,
}

impl Scan {
    pub(crate) fn is_complete(&self) -> bool {
        self.open.is_empty() && self.quote.is_none() && self.dangling.is_none()
    }
}

fn is_operator_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '%' | '^' | '=' | '<' | '>' | '&' | '|' | '!' | ','
    )
}

pub(crate) fn scan(src: &str) -> Scan {
    let mut st = Scan::default();
    let mut last_sig: Option<(usize, char)> = None;
    let mut escaped = false;
    let mut chars = src.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if let Some((q, _)) = st.quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                st.quote = None;
                last_sig = Some((i, c));
            }
            continue;
        }
        match c {
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                while chars.next_if(|&(_, n)| n != '\n').is_some() {}
                continue;
            }
            '"' | '\'' => st.quote = Some((c, i)),
            '(' | '[' | '{' => st.open.push((c, i)),
            ')' | ']' | '}' => {
                st.open.pop();
            }
            _ => {}
        }
        if !c.is_whitespace() {
            last_sig = Some((i, c));
        }
    }
    st.dangling = match last_sig {
        Some((i, c)) if st.quote.is_none() && is_operator_char(c) => Some(i),
        _ => None,
    };
    st
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 継続入力の途中かどうか。
    pub fn is_accumulating(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// 1 行を受け取り、入力単位が完結したかを返す。
    pub fn submit_line(&mut self, line: &str) -> ReadOutcome {
        if self.buffer.is_empty() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return ReadOutcome::NeedMore;
            }
            // コマンド行は常に単独で確定する
            if trimmed.starts_with(':') {
                return ReadOutcome::Complete(InputUnit {
                    text: trimmed.to_string(),
                    lines: 1,
                });
            }
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.lines += 1;
        let st = scan(&self.buffer);
        if st.is_complete() {
            ReadOutcome::Complete(self.take())
        } else {
            trace!(lines = self.lines, depth = st.open.len(), "need more input");
            ReadOutcome::NeedMore
        }
    }

    /// 入力終端での後始末。未完了の構文が残っていれば字句エラーとして報告する。
    pub fn finish(&mut self) -> Result<Option<InputUnit>, LexerError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let unit = self.take();
        let st = scan(&unit.text);
        let (code, msg, pos) = if let Some((q, pos)) = st.quote {
            ("LEX020", format!("文字列リテラル {q}...{q} が閉じていません"), pos)
        } else if let Some(&(open, pos)) = st.open.last() {
            ("LEX021", format!("括弧 '{open}' が閉じていません"), pos)
        } else if let Some(pos) = st.dangling {
            ("LEX022", "行末の演算子の後に続く式がありません".to_string(), pos)
        } else {
            return Ok(Some(unit));
        };
        let map = LineMap::new(&unit.text);
        let (line, col) = map.locate(&unit.text, pos);
        Err(LexerError::at_with_snippet(
            code,
            msg,
            Some(pos),
            Some(line),
            Some(col),
            map.line_text(&unit.text, line),
        ))
    }

    /// 蓄積中の入力を破棄する（Ctrl-C など）。
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.lines = 0;
    }

    fn take(&mut self) -> InputUnit {
        let mut text = std::mem::take(&mut self.buffer);
        if text.ends_with('\n') {
            text.pop();
        }
        let lines = std::mem::replace(&mut self.lines, 0);
        InputUnit { text, lines }
    }
}
