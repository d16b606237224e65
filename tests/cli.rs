// パス: tests/cli.rs
// 役割: 実行ファイルを標準入出力つきで起動し、終了コードと出力を検証する
// 意図: 端末でない入力（パイプ）での動作と致命的エラー時の終了コードを保証する
// 関連ファイル: src/bin/mainau.rs, src/config.rs, src/repl/line_editor.rs
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn run_with_stdin(args: &[&str], input: impl AsRef<[u8]>, home: &Path) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_mainau-repl"))
        .args(args)
        .env("MAINAU_HISTORY_FILE", home.join("history"))
        .env_remove("MAINAU_CONFIG")
        .env_remove("MAINAU_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn mainau-repl");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_ref())
        .expect("write stdin");
    child.wait_with_output().expect("wait")
}

#[test]
/// パイプ入力でも評価・エラー表示・EOF 終了が行われる。
fn piped_session_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_with_stdin(&["--no-color"], "let x = 2 + 3\nx / 0\nx\n", dir.path());
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("x = 5"), "{stdout}");
    assert!(stdout.contains("EvalError: [EVAL061]"), "{stdout}");
    assert!(!stdout.contains('\u{1b}'));
    let history = std::fs::read_to_string(dir.path().join("history")).unwrap();
    assert_eq!(history.lines().count(), 3);
}

#[test]
fn exit_command_returns_zero() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_with_stdin(&[], "exit\nprint(1)\n", dir.path());
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Goodbye!"));
    assert!(!stdout.contains("\n1\n"));
}

#[test]
fn load_flag_evaluates_file_before_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.mn");
    std::fs::write(&lib, "fun sq(n) -> n * n").unwrap();
    let lib_arg = lib.display().to_string();
    let out = run_with_stdin(&["--load", &lib_arg], "sq(9)\n", dir.path());
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Loaded 1 def(s)"), "{stdout}");
    assert!(stdout.contains("81"), "{stdout}");
}

#[test]
/// 設定エラーは致命的で、終了コード 1 と標準エラーへの診断になる。
fn bad_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("mainau.json");
    std::fs::write(&cfg, "{ not json").unwrap();
    let cfg_arg = cfg.display().to_string();
    let out = run_with_stdin(&["--config", &cfg_arg], "", dir.path());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("FatalError: 設定エラー"), "{stderr}");
}

#[test]
/// UTF-8 でないバイト列の行は字句エラーとして扱い、後続の行は評価される。
fn invalid_utf8_line_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_with_stdin(&["--no-color"], b"\xff\xfe\n40 + 2\n".as_slice(), dir.path());
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("LexError: [LEX001]"), "{stdout}");
    assert!(stdout.contains("42"), "{stdout}");
}

#[test]
/// 深い入れ子はスタックを溢れさせず構文エラーになる。
fn deep_nesting_does_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let deep = format!("{}1{}\n", "(".repeat(10_000), ")".repeat(10_000));
    let out = run_with_stdin(&["--no-color"], deep, dir.path());
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("SyntaxError: [PAR030]"), "{stdout}");
}
