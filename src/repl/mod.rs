// パス: src/repl/mod.rs
// 役割: REPL を構成するモジュールの束ねと公開 API の再公開
// 意図: 端末依存の部品を隠し、ループ本体とテスト用の差し替え口だけを見せる
// 関連ファイル: src/repl/cmd.rs, src/repl/reader.rs, src/bin/mainau.rs
//! Mainau の対話環境を構成するモジュール群をまとめたファサード。
//!
//! - `cmd`: 状態遷移とコマンド解釈
//! - `reader`: 複数行入力の完結判定
//! - `loader`: ファイルの取り込み
//! - `printer`: 端末向けの表示
//! - `line_editor` / `signal`: 端末とシグナルの扱い

pub mod cmd;
mod line_editor;
mod loader;
mod printer;
pub mod reader;
mod signal;

pub use cmd::{
    handle_command, parse_repl_command, run_repl, run_repl_with, FsIo, ReplCommand, ReplIo,
    ReplLineSource, ReplMsg, ReplSession, ReplState,
};
pub use line_editor::{LineEditor, ReadResult};
pub use loader::{defined_names, load_source};
pub use printer::{Renderer, BANNER};
pub use reader::{InputUnit, ReadOutcome, Reader};
pub use signal::install as install_interrupt_handler;
