// パス: src/repl/line_editor.rs
// 役割: 端末向けの履歴付き行エディタと、端末以外の入力向けの素朴な行読み取り
// 意図: 外部クレートに頼らず raw モードで ↑↓←→・Backspace・Ctrl-C・Ctrl-D を扱う
// 関連ファイル: src/repl/cmd.rs, src/config.rs
use std::env;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::errors::LexerError;

/// 履歴ファイルの場所を上書きする環境変数。
pub const HISTORY_ENV: &str = "MAINAU_HISTORY_FILE";
const HISTORY_FILE_NAME: &str = ".mainau_repl_history";
const MAX_HISTORY: usize = 1000;

/// 1 回の行読み取りの結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Line(String),
    Eof,
    Interrupted,
    /// 行として受け取れなかった入力。セッションは続く。
    Invalid(LexerError),
}

/// 標準入力から 1 行ずつ読む。端末なら raw モードで編集でき、履歴を持つ。
pub struct LineEditor {
    history: History,
    interactive: bool,
}

impl LineEditor {
    /// 履歴ファイルを読み込んでエディタを作る。`history_file` が `None` なら既定の場所を探す。
    pub fn new(history_file: Option<PathBuf>) -> Self {
        let path = history_file.or_else(default_history_path);
        let interactive = cfg!(unix) && io::stdin().is_terminal() && io::stdout().is_terminal();
        debug!(interactive, history = ?path, "line editor ready");
        Self {
            history: History::load(path),
            interactive,
        }
    }

    pub fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult> {
        #[cfg(unix)]
        {
            if self.interactive {
                return self.read_line_raw(prompt);
            }
        }
        self.read_line_plain(prompt)
    }

    pub fn add_history(&mut self, entry: &str) {
        self.history.push(entry);
    }

    pub fn save_history(&self) -> io::Result<()> {
        self.history.save()
    }

    /// パイプやファイルからの入力。プロンプトは端末でなくても表示する。
    fn read_line_plain(&mut self, prompt: &str) -> io::Result<ReadResult> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        let mut buf = Vec::new();
        if io::stdin().lock().read_until(b'\n', &mut buf)? == 0 {
            return Ok(ReadResult::Eof);
        }
        Ok(decode_line(buf))
    }
}

/// 改行を落として UTF-8 として解釈する。不正なバイト列は `LEX001`。
fn decode_line(mut buf: Vec<u8>) -> ReadResult {
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    match String::from_utf8(buf) {
        Ok(line) => ReadResult::Line(line),
        Err(e) => {
            let valid = e.utf8_error().valid_up_to();
            let bytes = e.into_bytes();
            let col = String::from_utf8_lossy(&bytes[..valid]).chars().count() + 1;
            debug!(pos = valid, "invalid utf-8 input line");
            ReadResult::Invalid(LexerError::at_with_snippet(
                "LEX001",
                "入力行が UTF-8 として不正です",
                Some(valid),
                Some(1),
                Some(col),
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        }
    }
}

#[cfg(unix)]
impl LineEditor {
    #[allow(unexpected_cfgs)]
    #[cfg_attr(coverage, coverage(off))]
    fn read_line_raw(&mut self, prompt: &str) -> io::Result<ReadResult> {
        let _raw = RawMode::enable()?;
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;

        let stdin = io::stdin();
        let mut stdin = stdin.lock();
        let mut state = EditState::new(&self.history);
        loop {
            let mut byte = [0u8; 1];
            if stdin.read(&mut byte)? == 0 {
                return Ok(ReadResult::Eof);
            }
            let redraw = match decode_key(byte[0], &mut stdin)? {
                Key::Enter => {
                    write!(stdout, "\r\n")?;
                    stdout.flush()?;
                    return Ok(ReadResult::Line(state.text()));
                }
                Key::CtrlC => {
                    write!(stdout, "^C\r\n")?;
                    stdout.flush()?;
                    return Ok(ReadResult::Interrupted);
                }
                Key::CtrlD if state.chars.is_empty() => {
                    write!(stdout, "\r\n")?;
                    stdout.flush()?;
                    return Ok(ReadResult::Eof);
                }
                Key::CtrlD | Key::Delete => state.delete_right(),
                Key::Backspace => state.delete_left(),
                Key::Left => state.left(),
                Key::Right => state.right(),
                Key::Home => state.home(),
                Key::End => state.end(),
                Key::KillLine => state.kill_line(),
                Key::Up => state.older(),
                Key::Down => state.newer(),
                Key::Char(ch) => {
                    state.insert(ch);
                    true
                }
                Key::Other => false,
            };
            if redraw {
                redraw_line(&mut stdout, prompt, &state.chars, state.cursor)?;
            }
        }
    }
}

/// UTF-8 の先頭バイトから残りのバイトを読み、1 文字に復元する。
fn decode_utf8<R: Read>(lead: u8, reader: &mut R) -> io::Result<Option<char>> {
    let width = match lead {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return Ok(None),
    };
    let mut buf = [lead, 0, 0, 0];
    reader.read_exact(&mut buf[1..width])?;
    Ok(std::str::from_utf8(&buf[..width])
        .ok()
        .and_then(|s| s.chars().next()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Enter,
    CtrlC,
    CtrlD,
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    KillLine,
    Up,
    Down,
    Char(char),
    Other,
}

/// 入力バイト列をキーに変換する。不完全なエスケープシーケンスは `Other`。
fn decode_key<R: Read>(first: u8, reader: &mut R) -> io::Result<Key> {
    let key = match first {
        b'\r' | b'\n' => Key::Enter,
        0x01 => Key::Home,
        0x03 => Key::CtrlC,
        0x04 => Key::CtrlD,
        0x05 => Key::End,
        0x15 => Key::KillLine,
        0x08 | 0x7f => Key::Backspace,
        0x1b => decode_escape(reader),
        _ => match decode_utf8(first, reader)? {
            Some(ch) if !ch.is_control() => Key::Char(ch),
            _ => Key::Other,
        },
    };
    Ok(key)
}

fn decode_escape<R: Read>(reader: &mut R) -> Key {
    let mut next = || {
        let mut b = [0u8; 1];
        reader.read_exact(&mut b).ok().map(|_| b[0])
    };
    if next() != Some(b'[') {
        return Key::Other;
    }
    match next() {
        Some(b'A') => Key::Up,
        Some(b'B') => Key::Down,
        Some(b'C') => Key::Right,
        Some(b'D') => Key::Left,
        Some(b'H') => Key::Home,
        Some(b'F') => Key::End,
        Some(b'3') if next() == Some(b'~') => Key::Delete,
        _ => Key::Other,
    }
}

/// 編集中の 1 行とカーソル、履歴上の位置。
struct EditState<'a> {
    chars: Vec<char>,
    cursor: usize,
    // 履歴を辿っている間の位置。`history.len()` は編集中の行を指す。
    browse: usize,
    draft: Vec<char>,
    history: &'a History,
}

impl<'a> EditState<'a> {
    fn new(history: &'a History) -> Self {
        Self {
            chars: Vec::new(),
            cursor: 0,
            browse: history.len(),
            draft: Vec::new(),
            history,
        }
    }

    fn text(&self) -> String {
        self.chars.iter().collect()
    }

    fn insert(&mut self, ch: char) {
        self.chars.insert(self.cursor, ch);
        self.cursor += 1;
        self.browse = self.history.len();
    }

    fn delete_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        true
    }

    fn delete_right(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.chars.remove(self.cursor);
        true
    }

    fn left(&mut self) -> bool {
        let moved = self.cursor > 0;
        self.cursor = self.cursor.saturating_sub(1);
        moved
    }

    fn right(&mut self) -> bool {
        let moved = self.cursor < self.chars.len();
        if moved {
            self.cursor += 1;
        }
        moved
    }

    fn home(&mut self) -> bool {
        std::mem::replace(&mut self.cursor, 0) != 0
    }

    fn end(&mut self) -> bool {
        let end = self.chars.len();
        std::mem::replace(&mut self.cursor, end) != end
    }

    fn kill_line(&mut self) -> bool {
        let changed = !self.chars.is_empty();
        self.chars.clear();
        self.cursor = 0;
        changed
    }

    fn older(&mut self) -> bool {
        if self.browse == 0 {
            return false;
        }
        if self.browse == self.history.len() {
            self.draft = self.chars.clone();
        }
        self.browse -= 1;
        self.show(self.history.get(self.browse).unwrap_or_default().chars().collect());
        true
    }

    fn newer(&mut self) -> bool {
        if self.browse >= self.history.len() {
            return false;
        }
        self.browse += 1;
        let chars = match self.history.get(self.browse) {
            Some(entry) => entry.chars().collect(),
            None => std::mem::take(&mut self.draft),
        };
        self.show(chars);
        true
    }

    fn show(&mut self, chars: Vec<char>) {
        self.chars = chars;
        self.cursor = self.chars.len();
    }
}

/// 行頭に戻って行全体を描き直し、カーソルを編集位置へ戻す。
fn redraw_line<W: Write>(out: &mut W, prompt: &str, chars: &[char], cursor: usize) -> io::Result<()> {
    let text: String = chars.iter().collect();
    write!(out, "\r{prompt}{text}\x1b[K")?;
    let back = chars.len().saturating_sub(cursor);
    if back > 0 {
        write!(out, "\x1b[{back}D")?;
    }
    out.flush()
}

/// 入力履歴。末尾ほど新しい。
struct History {
    entries: Vec<String>,
    path: Option<PathBuf>,
    limit: usize,
}

impl History {
    fn load(path: Option<PathBuf>) -> Self {
        let mut entries: Vec<String> = path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default();
        if entries.len() > MAX_HISTORY {
            entries.drain(..entries.len() - MAX_HISTORY);
        }
        Self {
            entries,
            path,
            limit: MAX_HISTORY,
        }
    }

    /// 空行と直前と同じ入力は記録しない。複数行の入力は 1 行に畳む。
    fn push(&mut self, entry: &str) {
        let entry = entry
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if entry.is_empty() || self.entries.last() == Some(&entry) {
            return;
        }
        if self.entries.len() >= self.limit {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, idx: usize) -> Option<&str> {
        self.entries.get(idx).map(String::as_str)
    }

    fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut body = self.entries.join("\n");
        body.push('\n');
        fs::write(path, body).map_err(|e| {
            warn!(error = %e, "history not saved");
            e
        })
    }
}

/// `MAINAU_HISTORY_FILE`、なければ `$HOME/.mainau_repl_history`。
pub(crate) fn default_history_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(HISTORY_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(HISTORY_FILE_NAME))
}

#[cfg(unix)]
/// 生成時に raw モードへ入り、破棄時に元の端末設定へ戻すガード。
struct RawMode {
    saved: Termios,
}

#[cfg(unix)]
impl RawMode {
    const STDIN_FD: i32 = 0;

    #[allow(unexpected_cfgs)]
    #[cfg_attr(coverage, coverage(off))]
    fn enable() -> io::Result<Self> {
        let mut saved = Termios::zeroed();
        if unsafe { tcgetattr(Self::STDIN_FD, &mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut raw = saved;
        unsafe { cfmakeraw(&mut raw) };
        if unsafe { tcsetattr(Self::STDIN_FD, TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { saved })
    }
}

#[cfg(unix)]
impl Drop for RawMode {
    #[allow(unexpected_cfgs)]
    #[cfg_attr(coverage, coverage(off))]
    fn drop(&mut self) {
        unsafe {
            tcsetattr(Self::STDIN_FD, TCSANOW, &self.saved);
        }
    }
}

#[cfg(unix)]
const TCSANOW: i32 = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const NCCS: usize = 32;
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
const NCCS: usize = 20;

/// libc の `struct termios` と同じ配置。
#[cfg(unix)]
#[repr(C)]
#[derive(Clone, Copy)]
struct Termios {
    c_iflag: u32,
    c_oflag: u32,
    c_cflag: u32,
    c_lflag: u32,
    c_line: u8,
    c_cc: [u8; NCCS],
    c_ispeed: u32,
    c_ospeed: u32,
}

#[cfg(unix)]
impl Termios {
    fn zeroed() -> Self {
        Self {
            c_iflag: 0,
            c_oflag: 0,
            c_cflag: 0,
            c_lflag: 0,
            c_line: 0,
            c_cc: [0; NCCS],
            c_ispeed: 0,
            c_ospeed: 0,
        }
    }
}

#[cfg(unix)]
extern "C" {
    fn tcgetattr(fd: i32, termios: *mut Termios) -> i32;
    fn tcsetattr(fd: i32, optional_actions: i32, termios: *const Termios) -> i32;
    fn cfmakeraw(termios: *mut Termios);
}

#[cfg(test)]
mod tests {
    use super::{decode_key, decode_line, decode_utf8, default_history_path, redraw_line, EditState, History, Key};
    use super::{ReadResult, HISTORY_ENV};
    use std::env;
    use std::io::Cursor;
    use std::sync::{Mutex, OnceLock};

    #[test]
    /// 改行は落とし、不正な UTF-8 は位置つきの字句エラーにする。
    fn plain_lines_are_decoded() {
        assert_eq!(decode_line(b"1 + 1\r\n".to_vec()), ReadResult::Line("1 + 1".into()));
        assert_eq!(decode_line(b"\n".to_vec()), ReadResult::Line(String::new()));
        match decode_line(b"ab\xff\xfe\n".to_vec()) {
            ReadResult::Invalid(e) => {
                assert_eq!(e.0.code, "LEX001");
                assert_eq!(e.0.pos, Some(2));
                assert_eq!(e.0.col, Some(3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn history(entries: &[&str]) -> History {
        History {
            entries: entries.iter().map(|s| s.to_string()).collect(),
            path: None,
            limit: 4,
        }
    }

    /// 環境変数を書き換えるテストを直列化する。
    fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = GUARD.get_or_init(|| Mutex::new(())).lock().unwrap();
        f()
    }

    #[test]
    /// 空行・直前と同じ入力は記録されず、上限を超えると古いものから捨てる。
    fn history_push_rules() {
        let mut h = history(&["a", "b", "c"]);
        h.push("   ");
        h.push("c");
        h.push("d");
        h.push("e");
        assert_eq!(h.entries, vec!["b", "c", "d", "e"]);
    }

    #[test]
    /// 複数行の入力は 1 行に畳んで記録する。
    fn history_folds_multiline_units() {
        let mut h = history(&[]);
        h.push("fun f(x) {\n  x + 1\n}");
        assert_eq!(h.entries, vec!["fun f(x) { x + 1 }"]);
    }

    #[test]
    fn history_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history");
        let mut h = History::load(Some(path.clone()));
        assert_eq!(h.len(), 0);
        h.push("let x = 1");
        h.push("x + 1");
        h.save().unwrap();
        let loaded = History::load(Some(path));
        assert_eq!(loaded.entries, vec!["let x = 1", "x + 1"]);
    }

    #[test]
    /// 環境変数の指定がホームディレクトリより優先される。
    fn history_path_prefers_env() {
        with_env_lock(|| {
            env::set_var(HISTORY_ENV, "/tmp/mainau_history_test");
            let resolved = default_history_path();
            env::remove_var(HISTORY_ENV);
            assert_eq!(
                resolved.as_deref(),
                Some(std::path::Path::new("/tmp/mainau_history_test"))
            );
        });
    }

    #[test]
    fn decodes_keys_and_escape_sequences() {
        let mut none = Cursor::new(Vec::<u8>::new());
        assert_eq!(decode_key(b'\r', &mut none).unwrap(), Key::Enter);
        assert_eq!(decode_key(0x03, &mut none).unwrap(), Key::CtrlC);
        assert_eq!(decode_key(0x7f, &mut none).unwrap(), Key::Backspace);
        assert_eq!(decode_key(b'x', &mut none).unwrap(), Key::Char('x'));
        assert_eq!(
            decode_key(0x1b, &mut Cursor::new(b"[A".to_vec())).unwrap(),
            Key::Up
        );
        assert_eq!(
            decode_key(0x1b, &mut Cursor::new(b"[3~".to_vec())).unwrap(),
            Key::Delete
        );
        // 途中で途切れたシーケンスは無視する
        assert_eq!(decode_key(0x1b, &mut Cursor::new(b"[".to_vec())).unwrap(), Key::Other);
        assert_eq!(decode_key(0x1b, &mut none).unwrap(), Key::Other);
        assert_eq!(decode_key(0x02, &mut none).unwrap(), Key::Other);
    }

    #[test]
    fn decodes_multibyte_utf8() {
        let mut rest = Cursor::new(vec![0x81, 0x82]);
        assert_eq!(decode_utf8(0xe3, &mut rest).unwrap(), Some('あ'));
        assert_eq!(decode_utf8(0xff, &mut Cursor::new(Vec::new())).unwrap(), None);
    }

    #[test]
    /// ↑ で履歴を遡り、↓ で編集中の行に戻る。
    fn history_navigation_restores_draft() {
        let h = history(&["first", "second"]);
        let mut st = EditState::new(&h);
        for ch in "dr".chars() {
            st.insert(ch);
        }
        assert!(st.older());
        assert_eq!(st.text(), "second");
        assert!(st.older());
        assert!(!st.older());
        assert_eq!(st.text(), "first");
        assert!(st.newer());
        assert!(st.newer());
        assert_eq!(st.text(), "dr");
        assert!(!st.newer());
    }

    #[test]
    fn cursor_editing() {
        let h = history(&[]);
        let mut st = EditState::new(&h);
        assert!(!st.delete_left());
        assert!(!st.left());
        for ch in "abc".chars() {
            st.insert(ch);
        }
        assert!(st.left());
        assert!(st.delete_left());
        assert_eq!(st.text(), "ac");
        assert!(st.home());
        assert!(!st.home());
        assert!(st.delete_right());
        assert_eq!(st.text(), "c");
        assert!(st.end());
        assert!(!st.right());
        assert!(st.kill_line());
        assert_eq!(st.text(), "");
    }

    #[test]
    fn redraw_moves_cursor_back() {
        let mut out = Vec::new();
        redraw_line(&mut out, "> ", &['a', 'b', 'c'], 1).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "\r> abc\x1b[K\x1b[2D");
    }
}
