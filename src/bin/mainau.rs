// パス: src/bin/mainau.rs
// 役割: 引数と設定を解決して REPL を起動する実行ファイルの入口
// 意図: 致命的エラーだけを終了コード 1 に対応づけ、それ以外は REPL 内で報告させる
// 関連ファイル: src/config.rs, src/logger.rs, src/repl/cmd.rs
use std::process::ExitCode;

use clap::Parser;
use mainau::config::{Cli, Settings};
use mainau::{logger, repl};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::resolve(&cli) {
        Ok(s) => s,
        Err(e) => {
            logger::init(cli.log_level.as_deref());
            eprintln!("{}: {}", e.category(), e);
            return ExitCode::FAILURE;
        }
    };
    logger::init(settings.log_level.as_deref());
    tracing::debug!(?settings, "starting repl");
    match repl::run_repl(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", e.category(), e);
            ExitCode::FAILURE
        }
    }
}
