// パス: tests/repl_scenarios.rs
// 役割: 台本付き入力で REPL ループ全体を通しで検証する
// 意図: 状態遷移・表示・終了条件を利用者から見える出力で固定する
// 関連ファイル: src/repl/cmd.rs, src/repl/reader.rs, tests/test_support.rs
#[path = "test_support.rs"]
mod support;

use mainau::config::Settings;
use mainau::errors::ReplError;
use mainau::repl::{run_repl_with, Renderer, ReplSession};
use mainau::runtime::Value;
use support::{
    run_lines, run_script, run_script_with, BrokenPipe, MapIo, ScriptEvent, ScriptedLineSource,
};

#[test]
/// `let x = 2 + 3` は `x = 5` と表示され、後続の入力から参照できる。
fn scenario_declaration_then_use() {
    let t = run_lines(&["let x = 2 + 3", "x * 2"]);
    assert!(t.result.is_ok());
    assert_eq!(t.body_lines(), vec!["x = 5", "10", ""]);
    assert_eq!(t.session.evaluator().lookup("x"), Some(Value::Int(5)));
}

#[test]
/// 0 除算は EvalError として表示され、セッションは続き、x は 5 のまま。
fn scenario_division_by_zero_keeps_session() {
    let t = run_lines(&["let x = 2 + 3", "x / 0", "x"]);
    let lines = t.body_lines();
    assert_eq!(lines[0], "x = 5");
    assert!(
        lines[1].starts_with("EvalError: [EVAL061]"),
        "unexpected: {}",
        lines[1]
    );
    assert!(t.stdout.contains("\n5\n"));
    assert!(t.stderr.is_empty());
    assert!(t.result.is_ok());
}

#[test]
/// 閉じていない括弧のまま入力が終わると LexError を表示して正常終了する。
fn scenario_unterminated_input_at_eof() {
    let t = run_lines(&["(1 + 2"]);
    assert!(t.result.is_ok());
    assert!(t.stdout.contains("LexError: [LEX021]"), "{}", t.stdout);
    assert_eq!(t.source.prompts, vec!["> ", ".. "]);
    assert!(t.source.history.is_empty());
}

#[test]
/// `exit` で即座に終了し、値は表示されず、残りの入力は読まれない。
fn scenario_exit_from_idle() {
    let t = run_lines(&["exit", "1 + 1"]);
    assert!(t.result.is_ok());
    assert_eq!(t.body_lines(), vec!["Goodbye!"]);
    assert_eq!(t.source.remaining(), 1);
    assert!(t.source.saved);
}

#[test]
/// `A; B; C` で B が失敗すると A の効果だけが残る。
fn failing_statement_keeps_earlier_effects() {
    let t = run_lines(&["let a = 1; let b = nope; let c = 3", ":env"]);
    let ev = t.session.evaluator();
    assert_eq!(ev.lookup("a"), Some(Value::Int(1)));
    assert_eq!(ev.lookup("b"), None);
    assert_eq!(ev.lookup("c"), None);
    assert!(t.stdout.contains("EvalError: [EVAL010]"));
    assert!(t.stdout.contains("\na = 1\n"));
}

#[test]
/// 構文エラーは環境を変えない。
fn syntax_error_leaves_environment_untouched() {
    let t = run_lines(&["let x = 1", "let x = 2 +* 3", "x"]);
    assert!(t.stdout.contains("SyntaxError: [PAR"), "{}", t.stdout);
    assert_eq!(t.session.evaluator().lookup("x"), Some(Value::Int(1)));
}

#[test]
/// 関数定義は複数行にまたがって入力でき、継続中は `.. ` プロンプトになる。
fn multiline_function_definition() {
    let t = run_lines(&[
        "fun fact(n) {",
        "  if n <= 1 { 1 } else {",
        "    n * fact(n - 1)",
        "  }",
        "}",
        "fact(10)",
    ]);
    assert_eq!(
        t.source.prompts,
        vec!["> ", ".. ", ".. ", ".. ", ".. ", "> ", "> "]
    );
    assert!(t.stdout.contains("fact = <fun fact/1>"));
    assert!(t.stdout.contains("\n3628800\n"));
    assert_eq!(t.source.history.len(), 2);
}

#[test]
/// 行末の演算子は継続入力として扱われる。
fn trailing_operator_continues_input() {
    let t = run_lines(&["let total = 1 +", "2 +", "3"]);
    assert_eq!(t.body_lines()[0], "total = 6");
}

#[test]
/// print の出力は結果の表示より先に、評価失敗時も表示される。
fn print_output_precedes_result_and_survives_errors() {
    let t = run_lines(&["print(\"a\"); 1 / 0"]);
    let lines = t.body_lines();
    assert_eq!(lines[0], "a");
    assert!(lines[1].starts_with("EvalError"));
}

#[test]
/// 中断は蓄積中の入力を捨て、次のプロンプトは Idle に戻る。
fn interrupt_while_accumulating() {
    let t = run_script(vec![
        ScriptEvent::Line("let xs = [1,".into()),
        ScriptEvent::Interrupt,
        ScriptEvent::Line("xs".into()),
    ]);
    assert_eq!(t.source.prompts, vec!["> ", ".. ", "> ", "> "]);
    assert!(t.stdout.contains("EvalError: [EVAL010]"));
}

#[test]
fn commands_are_only_recognised_on_empty_buffer() {
    let t = run_lines(&["let s = [", ":help", "]"]);
    // 継続中の `:help` はソースの一部として字句解析され、エラーになる
    assert!(t.stdout.contains("LexError: [LEX090]"), "{}", t.stdout);
    assert!(!t.stdout.contains("利用可能なコマンド"));
}

#[test]
fn unknown_command_is_reported() {
    let t = run_lines(&[":frobnicate"]);
    assert_eq!(
        t.body_lines()[0],
        "エラー: コマンド形式が不正です: :frobnicate"
    );
}

#[test]
/// `:load` したファイルの定義がセッションに入り、`:reload` で再評価される。
fn load_and_reload_through_loop() {
    let io = MapIo::with(
        "lib.mn",
        "var hits = 0\nfun bump() { hits += 1 }\nprint(\"loaded\")",
    );
    let t = run_script_with(
        vec![
            ScriptEvent::Line(":load lib.mn".into()),
            ScriptEvent::Line("bump()".into()),
            ScriptEvent::Line(":reload".into()),
            ScriptEvent::Line("hits".into()),
        ],
        &io,
        &Settings::default(),
    );
    let lines = t.body_lines();
    assert_eq!(lines[0], "loaded");
    assert_eq!(lines[1], "Loaded 2 def(s) from lib.mn: hits, bump");
    assert_eq!(lines[2], "1");
    assert_eq!(lines[3], "loaded");
    assert_eq!(lines[4], "Reloaded 2 def(s) from lib.mn");
    assert_eq!(lines[5], "0");
}

#[test]
fn verbose_setting_prints_ast() {
    let settings = Settings {
        verbose: true,
        ..Settings::default()
    };
    let t = run_script_with(
        vec![ScriptEvent::Line("-2 ^ 2".into())],
        &MapIo::default(),
        &settings,
    );
    assert_eq!(t.body_lines()[0], "ast: (-(2 ^ 2))");
    assert_eq!(t.body_lines()[1], "-4");
}

#[test]
fn clear_removes_all_bindings() {
    let t = run_lines(&["let a = 1, b = 2", "clear", "a"]);
    let lines = t.body_lines();
    assert_eq!(lines[0], "a = 1, b = 2");
    assert_eq!(lines[1], "Cleared 2 binding(s)");
    assert!(lines[2].starts_with("EvalError: [EVAL010]"));
}

#[test]
/// `while` だけの単位も結果表示をちょうど 1 行出す。
fn while_unit_renders_one_line() {
    let t = run_lines(&["var i = 0", "while i < 3 { i += 1 }", "i"]);
    assert_eq!(t.body_lines(), vec!["i = 0", "null", "3", ""]);
}

#[test]
/// print の出力はそれ自体が結果表示になり、null は重ねて表示しない。
fn print_call_is_its_own_outcome() {
    let t = run_lines(&["print(\"hi\")", "fun nop() { null }", "nop()"]);
    assert_eq!(t.body_lines(), vec!["hi", "nop = <fun nop/0>", "null", ""]);
}

#[test]
/// 極端に深い括弧は構文エラーとして報告され、セッションは続く。
fn deep_nesting_is_reported_not_fatal() {
    let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
    let t = run_lines(&[&deep, "1 + 1"]);
    assert!(t.result.is_ok());
    assert!(t.stdout.contains("SyntaxError: [PAR030]"));
    assert!(t.stdout.contains("\n2\n"));
}

#[test]
/// UTF-8 として読めない行は字句エラーとして表示し、次の入力へ進む。
fn invalid_input_line_is_recoverable() {
    let t = run_script(vec![
        ScriptEvent::Line("let xs = [1,".into()),
        ScriptEvent::Invalid,
        ScriptEvent::Line("7".into()),
    ]);
    assert!(t.result.is_ok());
    assert_eq!(t.source.prompts, vec!["> ", ".. ", "> ", "> "]);
    assert!(t.stdout.contains("LexError: [LEX001]"), "{}", t.stdout);
    assert!(t.stdout.contains("\n7\n"));
    assert!(t.stderr.is_empty());
}

#[test]
/// 出力の書き込みに失敗したら致命的エラーとして呼び出し元へ返る。
fn output_failure_is_fatal() {
    let mut session = ReplSession::with_defaults();
    let mut source = ScriptedLineSource::lines(&["1"]);
    let mut err = Vec::new();
    let result = run_repl_with(
        &mut session,
        &mut source,
        &MapIo::default(),
        &Renderer::plain(),
        &mut BrokenPipe,
        &mut err,
    );
    match result {
        Err(e @ ReplError::Io(_)) => assert!(e.is_fatal()),
        other => panic!("expected Io error, got {other:?}"),
    }
    assert!(source.prompts.is_empty());
}
