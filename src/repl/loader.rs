// パス: src/repl/loader.rs
// 役割: ソースファイルの内容をセッションへ取り込む
// 意図: `:load` / `:reload` / 起動時の `--load` で同じ取り込み経路を共有する
// 関連ファイル: src/repl/cmd.rs, src/evaluator.rs
//! プログラムのロード処理

use tracing::debug;

use crate::ast::{Program, Stmt};
use crate::errors::ReplError;
use crate::evaluator::Evaluator;
use crate::parser::parse_program;

/// プログラムのトップレベルで束縛される名前を出現順に返す（重複は除く）。
pub fn defined_names(program: &Program) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for stmt in &program.stmts {
        let found: Vec<&String> = match stmt {
            Stmt::Decl { bindings, .. } => bindings.iter().map(|(n, _)| n).collect(),
            Stmt::FunDecl { name, .. } => vec![name],
            _ => Vec::new(),
        };
        for name in found {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

/// ソーステキストを評価してセッションに取り込み、定義された名前を返す。
///
/// # 仕様
/// - 構文エラー時は何も評価しない。
/// - 評価エラー時は失敗した文より前の文の効果だけが残る。
///
/// # Examples
/// ```
/// use mainau::evaluator::Evaluator;
/// use mainau::repl::load_source;
/// let mut ev = Evaluator::new();
/// let names = load_source(&mut ev, "let a = 1\nfun twice(x) -> x * 2").unwrap();
/// assert_eq!(names, vec!["a", "twice"]);
/// ```
pub fn load_source(evaluator: &mut Evaluator, src: &str) -> Result<Vec<String>, ReplError> {
    let program = parse_program(src)?;
    let names = defined_names(&program);
    evaluator
        .evaluate(&program)
        .map_err(|e| ReplError::Eval(e.with_source(src)))?;
    debug!(count = names.len(), "source loaded");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::{defined_names, load_source};
    use crate::errors::ReplError;
    use crate::evaluator::Evaluator;
    use crate::parser::parse_program;
    use crate::runtime::Value;

    #[test]
    fn defined_names_skips_expressions_and_duplicates() {
        let prog = parse_program("let a = 1, b = 2\na + b\nvar a = 3\nfun f() -> 1").unwrap();
        assert_eq!(defined_names(&prog), vec!["a", "b", "f"]);
    }

    #[test]
    /// 構文エラーのあるソースは一切評価されない。
    fn syntax_error_loads_nothing() {
        let mut ev = Evaluator::new();
        let err = load_source(&mut ev, "let a = 1\nlet = 2").unwrap_err();
        assert!(matches!(err, ReplError::Syntax(_)));
        assert_eq!(ev.lookup("a"), None);
    }

    #[test]
    fn eval_error_keeps_earlier_statements() {
        let mut ev = Evaluator::new();
        let err = load_source(&mut ev, "let a = 1\nlet b = missing\nlet c = 3").unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert_eq!(ev.lookup("a"), Some(Value::Int(1)));
        assert_eq!(ev.lookup("c"), None);
    }
}
