// パス: src/repl/cmd.rs
// 役割: REPL の状態遷移・コマンド解釈・評価結果の振り分けを担う
// 意図: 入力源・ファイル I/O・出力先を差し替え可能にして、対話ループ全体を端末なしで検証する
// 関連ファイル: src/repl/reader.rs, src/repl/printer.rs, src/evaluator.rs
//! Mainau REPL のメインループとコマンド処理。
//! 完結した入力単位をコマンドか Mainau のソースとして解釈し、結果を 1 つの表示にまとめる。

use std::io::{self, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::line_editor::{LineEditor, ReadResult};
use super::loader::load_source;
use super::printer::Renderer;
use super::reader::{ReadOutcome, Reader};
use super::signal;
use crate::ast::{Expr, Program, Stmt};
use crate::config::Settings;
use crate::errors::ReplError;
use crate::evaluator::Evaluator;
use crate::parser::parse_program;
use crate::runtime::Value;

/// 対話ループの状態。`Exiting` と `Fatal` は終端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Idle,
    Accumulating,
    Evaluating,
    Exiting,
    Fatal,
}

/// 設定に従って端末上で REPL を実行する。
///
/// 出力の書き込みに失敗した場合だけ `Err`（致命的エラー）を返す。
pub fn run_repl(settings: &Settings) -> Result<(), ReplError> {
    let renderer = Renderer::detect(settings.no_color);
    let mut editor = LineEditor::new(settings.history_file.clone());
    let mut session = ReplSession::new(settings);
    if !signal::install(session.interrupt_handle()) {
        warn!("SIGINT handler already installed");
    }
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    writeln!(stdout, "{}", renderer.render_banner())?;
    for path in &settings.load {
        let msgs = session.execute(ReplCommand::Load(path.display().to_string()), &FsIo);
        dispatch_messages(msgs, &renderer, &mut stdout, &mut stderr)?;
    }
    repl_loop(&mut session, &mut editor, &FsIo, &renderer, &mut stdout, &mut stderr)
}

/// 行単位の入力源。端末の行エディタとテスト用の台本を差し替えられる。
pub trait ReplLineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult>;
    fn add_history(&mut self, entry: &str);
    fn save_history(&mut self) -> io::Result<()>;
}

impl ReplLineSource for LineEditor {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult> {
        LineEditor::read_line(self, prompt)
    }

    fn add_history(&mut self, entry: &str) {
        LineEditor::add_history(self, entry);
    }

    fn save_history(&mut self) -> io::Result<()> {
        LineEditor::save_history(self)
    }
}

/// 入力源・ファイル I/O・出力先を受け取って対話ループを回す。
pub fn run_repl_with<S, I, W, E>(
    session: &mut ReplSession,
    editor: &mut S,
    file_io: &I,
    renderer: &Renderer,
    out: &mut W,
    err: &mut E,
) -> Result<(), ReplError>
where
    S: ReplLineSource,
    I: ReplIo,
    W: Write,
    E: Write,
{
    writeln!(out, "{}", renderer.render_banner())?;
    repl_loop(session, editor, file_io, renderer, out, err)
}

/// バナー表示後の読み取り・評価・表示の繰り返し。
fn repl_loop<S, I, W, E>(
    session: &mut ReplSession,
    editor: &mut S,
    file_io: &I,
    renderer: &Renderer,
    out: &mut W,
    err: &mut E,
) -> Result<(), ReplError>
where
    S: ReplLineSource,
    I: ReplIo,
    W: Write,
    E: Write,
{
    let mut reader = Reader::new();
    let mut state = ReplState::Idle;

    while state != ReplState::Exiting {
        let line = match editor.read_line(renderer.render_prompt(state)) {
            Ok(line) => line,
            Err(e) => {
                debug!(?state, "input failed");
                return Err(ReplError::Io(e));
            }
        };
        state = match line {
            ReadResult::Line(text) => match reader.submit_line(&text) {
                ReadOutcome::NeedMore if reader.is_accumulating() => ReplState::Accumulating,
                ReadOutcome::NeedMore => ReplState::Idle,
                ReadOutcome::Complete(unit) => {
                    editor.add_history(&unit.text);
                    state = ReplState::Evaluating;
                    debug!(?state, lines = unit.lines, "unit complete");
                    run_unit(session, &unit.text, file_io, renderer, out, err)?
                }
            },
            ReadResult::Invalid(e) => {
                reader.reset();
                dispatch_messages(vec![ReplMsg::Err(e.into())], renderer, out, err)?;
                ReplState::Idle
            }
            ReadResult::Interrupted => {
                reader.reset();
                ReplState::Idle
            }
            ReadResult::Eof => {
                writeln!(out)?;
                match reader.finish() {
                    Ok(Some(unit)) => {
                        state = ReplState::Evaluating;
                        debug!(?state, lines = unit.lines, "unit complete at eof");
                        run_unit(session, &unit.text, file_io, renderer, out, err)?;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        dispatch_messages(vec![ReplMsg::Err(e.into())], renderer, out, err)?;
                    }
                }
                ReplState::Exiting
            }
        };
    }

    if let Err(e) = editor.save_history() {
        warn!(error = %e, "history save failed");
        writeln!(err, "履歴の保存に失敗しました: {e}")?;
    }
    out.flush()?;
    Ok(())
}

/// 完結した入力単位を 1 つ処理し、次の状態を返す。
fn run_unit<I: ReplIo, W: Write, E: Write>(
    session: &mut ReplSession,
    text: &str,
    file_io: &I,
    renderer: &Renderer,
    out: &mut W,
    err: &mut E,
) -> Result<ReplState, ReplError> {
    let cmd = parse_repl_command(text);
    debug!(?cmd, "dispatch unit");
    if cmd == ReplCommand::Quit {
        writeln!(out, "Goodbye!")?;
        return Ok(ReplState::Exiting);
    }
    let msgs = session.execute(cmd, file_io);
    dispatch_messages(msgs, renderer, out, err)?;
    Ok(ReplState::Idle)
}

fn dispatch_messages<W: Write, E: Write>(
    msgs: Vec<ReplMsg>,
    renderer: &Renderer,
    out: &mut W,
    err: &mut E,
) -> io::Result<()> {
    for msg in msgs {
        match msg {
            ReplMsg::Out(s) => writeln!(out, "{s}")?,
            ReplMsg::Notice(s) => writeln!(out, "{}", renderer.render_notice(&s))?,
            ReplMsg::Help => writeln!(out, "{}", renderer.render_help())?,
            ReplMsg::Value(v) => writeln!(out, "{}", renderer.render_value(&v))?,
            ReplMsg::Bindings(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(name, v)| renderer.render_binding(name, v))
                    .collect();
                writeln!(out, "{}", parts.join(", "))?
            }
            ReplMsg::Failure(s) => writeln!(out, "{}", renderer.render_failure(&s))?,
            ReplMsg::Err(e) if e.is_fatal() => writeln!(err, "{}", renderer.render_error(&e))?,
            ReplMsg::Err(e) => writeln!(out, "{}", renderer.render_error(&e))?,
        }
    }
    out.flush()
}

/// 1 つの対話セッション。評価器（とその環境）を所有する。
pub struct ReplSession {
    evaluator: Evaluator,
    verbose: bool,
    loaded_paths: Vec<String>,
}

impl ReplSession {
    pub fn new(settings: &Settings) -> Self {
        Self {
            evaluator: Evaluator::with_options(settings.eval_options()),
            verbose: settings.verbose,
            loaded_paths: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&Settings::default())
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.evaluator.interrupt_handle()
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn loaded_paths(&self) -> &[String] {
        &self.loaded_paths
    }

    /// 解釈済みコマンドを実行し、表示すべきメッセージを返す。
    pub fn execute<I: ReplIo>(&mut self, cmd: ReplCommand, io: &I) -> Vec<ReplMsg> {
        use ReplCommand::*;
        match cmd {
            Help => vec![ReplMsg::Help],
            Quit => Vec::new(),
            Clear => self.exec_clear(),
            Env(prefix) => self.exec_env(prefix),
            Unset(name) => self.exec_unset(&name),
            Ast(src) => exec_ast(&src),
            Load(path) => self.exec_load(&path, io),
            Reload => self.exec_reload(io),
            SetVerbose(on) => {
                self.verbose = on;
                vec![ReplMsg::Notice(format!(
                    "set verbose = {}",
                    if on { "on" } else { "off" }
                ))]
            }
            SetTimeout(ms) => {
                self.evaluator.set_timeout(ms.map(Duration::from_millis));
                let shown = ms.map_or_else(|| "off".to_string(), |ms| format!("{ms}ms"));
                vec![ReplMsg::Notice(format!("set timeout = {shown}"))]
            }
            Eval(src) => self.exec_eval(&src),
            Invalid(s) => vec![ReplMsg::Failure(format!("コマンド形式が不正です: {s}"))],
        }
    }

    fn exec_clear(&mut self) -> Vec<ReplMsg> {
        let n = self.evaluator.binding_count();
        self.evaluator.clear();
        vec![ReplMsg::Notice(format!("Cleared {n} binding(s)"))]
    }

    fn exec_env(&self, prefix: Option<String>) -> Vec<ReplMsg> {
        let prefix = prefix.unwrap_or_default();
        let msgs: Vec<ReplMsg> = self
            .evaluator
            .snapshot()
            .into_iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|pair| ReplMsg::Bindings(vec![pair]))
            .collect();
        if msgs.is_empty() {
            return vec![ReplMsg::Notice("(束縛なし)".into())];
        }
        msgs
    }

    fn exec_unset(&mut self, name: &str) -> Vec<ReplMsg> {
        match self.evaluator.unset(name) {
            Some(_) => vec![ReplMsg::Notice(format!("Unset {name}"))],
            None => vec![ReplMsg::Failure(format!("未定義です: {name}"))],
        }
    }

    fn exec_eval(&mut self, src: &str) -> Vec<ReplMsg> {
        let program = match parse_program(src) {
            Ok(p) => p,
            Err(e) => return vec![ReplMsg::Err(e)],
        };
        let mut msgs = Vec::new();
        if self.verbose {
            msgs.push(ReplMsg::Notice(format!("ast: {program}")));
        }
        let result = self.evaluator.evaluate(&program);
        let output = self.evaluator.take_output();
        let printed = !output.is_empty();
        msgs.extend(output.into_iter().map(ReplMsg::Out));
        match result {
            Ok(value) => msgs.extend(self.outcome(&program, value, printed)),
            Err(e) => msgs.push(ReplMsg::Err(ReplError::Eval(e.with_source(src)))),
        }
        msgs
    }

    /// 最後の文の種類に応じて確認表示か値を選ぶ。
    /// null を返す呼び出しが何か出力した場合は、その出力を結果表示とみなす。
    fn outcome(&self, program: &Program, value: Value, printed: bool) -> Option<ReplMsg> {
        let Some(last) = program.stmts.last() else {
            return Some(ReplMsg::Value(Value::Null));
        };
        match last {
            Stmt::Decl { bindings, .. } => Some(ReplMsg::Bindings(
                bindings
                    .iter()
                    .map(|(name, _)| {
                        let v = self.evaluator.lookup(name).unwrap_or(Value::Null);
                        (name.clone(), v)
                    })
                    .collect(),
            )),
            Stmt::FunDecl { name, .. } | Stmt::Assign { name, .. } => {
                Some(ReplMsg::Bindings(vec![(name.clone(), value)]))
            }
            Stmt::Expr(Expr::Call { .. }) if printed && value.is_null() => None,
            Stmt::While { .. } | Stmt::Expr(_) => Some(ReplMsg::Value(value)),
        }
    }

    fn exec_load<I: ReplIo>(&mut self, path: &str, io: &I) -> Vec<ReplMsg> {
        let mut msgs = Vec::new();
        match self.load_path(path, io, &mut msgs) {
            Ok(names) => {
                msgs.push(ReplMsg::Notice(format!(
                    "Loaded {} def(s) from {}{}",
                    names.len(),
                    path,
                    summary(&names)
                )));
                if !self.loaded_paths.iter().any(|p| p == path) {
                    self.loaded_paths.push(path.to_string());
                }
            }
            Err(msg) => msgs.push(msg),
        }
        msgs
    }

    fn exec_reload<I: ReplIo>(&mut self, io: &I) -> Vec<ReplMsg> {
        if self.loaded_paths.is_empty() {
            return vec![ReplMsg::Failure("直近の :load がありません".into())];
        }
        let mut msgs = Vec::new();
        for path in self.loaded_paths.clone() {
            match self.load_path(&path, io, &mut msgs) {
                Ok(names) => msgs.push(ReplMsg::Notice(format!(
                    "Reloaded {} def(s) from {}",
                    names.len(),
                    path
                ))),
                Err(msg) => msgs.push(msg),
            }
        }
        msgs
    }

    /// ファイルを読んで評価する。`print` の出力は `msgs` へ積む。
    fn load_path<I: ReplIo>(
        &mut self,
        path: &str,
        io: &I,
        msgs: &mut Vec<ReplMsg>,
    ) -> Result<Vec<String>, ReplMsg> {
        let src = io.read_to_string(path).map_err(ReplMsg::Failure)?;
        let result = load_source(&mut self.evaluator, &src);
        msgs.extend(self.evaluator.take_output().into_iter().map(ReplMsg::Out));
        result.map_err(ReplMsg::Err)
    }
}

/// 1 行ぶんの入力をコマンドとして解釈して実行する（ループを介さない呼び出し口）。
pub fn handle_command<I: ReplIo>(session: &mut ReplSession, input: &str, io: &I) -> Vec<ReplMsg> {
    session.execute(parse_repl_command(input), io)
}

fn summary(names: &[String]) -> String {
    if names.is_empty() {
        String::new()
    } else {
        format!(": {}", names.join(", "))
    }
}

fn exec_ast(src: &str) -> Vec<ReplMsg> {
    match parse_program(src) {
        Ok(program) if program.stmts.is_empty() => vec![ReplMsg::Notice("(空)".into())],
        Ok(program) => program
            .stmts
            .iter()
            .map(|stmt| ReplMsg::Notice(stmt.to_string()))
            .collect(),
        Err(e) => vec![ReplMsg::Err(e)],
    }
}

/// 対話セッションが利用者へ返す応答。
#[derive(Debug)]
pub enum ReplMsg {
    /// `print` の出力（そのまま表示）。
    Out(String),
    Notice(String),
    Help,
    Value(Value),
    /// 宣言・代入の確認表示。1 行にまとめて出す。
    Bindings(Vec<(String, Value)>),
    /// コマンドの失敗（ファイルが読めない、未定義名の削除など）。
    Failure(String),
    Err(ReplError),
}

/// REPL に必要な最小限のファイル読み込み抽象。
pub trait ReplIo {
    fn read_to_string(&self, path: &str) -> Result<String, String>;
}

/// 実際のファイルシステムを読む実装。
pub struct FsIo;

impl ReplIo for FsIo {
    fn read_to_string(&self, path: &str) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| format!("ファイルを開けません: {path}: {e}"))
    }
}

/// REPL が解釈するコマンド。`:` で始まらない入力は `Eval`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// `:help` / `:h`
    Help,
    /// `exit` / `:quit` / `:q`
    Quit,
    /// `clear` / `:clear`
    Clear,
    /// `:env [PREFIX]`
    Env(Option<String>),
    /// `:unset NAME`
    Unset(String),
    /// `:ast SRC`
    Ast(String),
    /// `:load PATH`
    Load(String),
    /// `:reload`
    Reload,
    /// `:set verbose on|off`
    SetVerbose(bool),
    /// `:set timeout MS|off`
    SetTimeout(Option<u64>),
    Eval(String),
    /// 認識できないコマンド入力。
    Invalid(String),
}

/// 完結した入力単位をコマンドへ分類する。
pub fn parse_repl_command(input: &str) -> ReplCommand {
    let s = input.trim();
    match s {
        "exit" | ":quit" | ":q" => return ReplCommand::Quit,
        "clear" | ":clear" => return ReplCommand::Clear,
        ":help" | ":h" => return ReplCommand::Help,
        ":reload" => return ReplCommand::Reload,
        _ => {}
    }
    if !s.starts_with(':') {
        return ReplCommand::Eval(s.to_string());
    }
    let (head, rest) = match s.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (s, ""),
    };
    let invalid = || ReplCommand::Invalid(s.to_string());
    match head {
        ":env" if rest.is_empty() => ReplCommand::Env(None),
        ":env" if !rest.contains(char::is_whitespace) => ReplCommand::Env(Some(rest.to_string())),
        ":unset" if !rest.is_empty() && !rest.contains(char::is_whitespace) => {
            ReplCommand::Unset(rest.to_string())
        }
        ":ast" if !rest.is_empty() => ReplCommand::Ast(rest.to_string()),
        ":load" if !rest.is_empty() => ReplCommand::Load(rest.to_string()),
        ":set" => {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            match parts.as_slice() {
                ["verbose", "on"] => ReplCommand::SetVerbose(true),
                ["verbose", "off"] => ReplCommand::SetVerbose(false),
                ["timeout", "off"] => ReplCommand::SetTimeout(None),
                ["timeout", ms] => match ms.parse::<u64>() {
                    Ok(0) => ReplCommand::SetTimeout(None),
                    Ok(n) => ReplCommand::SetTimeout(Some(n)),
                    Err(_) => invalid(),
                },
                _ => invalid(),
            }
        }
        _ => invalid(),
    }
}
