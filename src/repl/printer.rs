// パス: src/repl/printer.rs
// 役割: 値・束縛・エラー・プロンプト・バナーの端末向け表記を組み立てる
// 意図: 表示形式を一箇所にまとめ、色付けの有無で文字列が変わらないようにする
// 関連ファイル: src/repl/cmd.rs, src/runtime.rs, src/errors.rs
//! REPL の表示モジュール。
//! 色付けは `owo-colors` で行い、無効時はエスケープシーケンスを除いて同一の文字列を返す。

use std::io::IsTerminal;

use owo_colors::OwoColorize;

use super::cmd::ReplState;
use crate::errors::ReplError;
use crate::runtime::Value;

pub const BANNER: &str = "Mainau REPL v0.1";

pub(crate) const HELP_TEXT: &str = concat!(
    "利用可能なコマンド:\n",
    "  :help, :h           ヘルプ（本メッセージ）\n",
    "  exit, :quit, :q     終了\n",
    "  clear, :clear       すべての束縛を削除\n",
    "  :env [PFX]          束縛一覧（接頭辞フィルタ）\n",
    "  :unset NAME         束縛を削除\n",
    "  :ast SRC            評価せずに構文木を表示\n",
    "  :load PATH          ファイルを評価してセッションに取り込む\n",
    "  :reload             これまでに :load したファイルを再評価\n",
    "  :set verbose on|off 評価前に構文木を表示するか切替\n",
    "  :set timeout MS|off 評価の制限時間（ミリ秒）\n",
    "\n",
    "例:\n",
    "  > let x = 2 + 3          -- x = 5\n",
    "  > fun sq(n) -> n * n\n",
    "  > sq(x)                  -- 25\n",
    "  > [1, 2] + [3]           -- [1, 2, 3]\n",
);

/// 端末出力の整形器。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Renderer {
    styled: bool,
}

impl Renderer {
    pub fn new(styled: bool) -> Self {
        Self { styled }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    /// 標準出力が端末で、`NO_COLOR` が未設定で、設定でも無効化されていない場合にのみ色を付ける。
    pub fn detect(no_color: bool) -> Self {
        let styled = !no_color
            && std::env::var_os("NO_COLOR").is_none()
            && std::io::stdout().is_terminal();
        Self::new(styled)
    }

    pub fn is_styled(&self) -> bool {
        self.styled
    }

    pub fn render_value(&self, v: &Value) -> String {
        let text = v.to_string();
        if !self.styled {
            return text;
        }
        match v {
            Value::Int(_) | Value::Float(_) => text.cyan().to_string(),
            Value::Str(_) => text.green().to_string(),
            Value::Bool(_) | Value::Null => text.yellow().to_string(),
            Value::Function(_) | Value::Builtin(_) => text.magenta().to_string(),
            Value::List(_) => text,
        }
    }

    /// 宣言・代入の確認表示（`x = 5`）。
    pub fn render_binding(&self, name: &str, v: &Value) -> String {
        let value = self.render_value(v);
        if self.styled {
            format!("{} = {}", name.bold(), value)
        } else {
            format!("{name} = {value}")
        }
    }

    pub fn render_error(&self, e: &ReplError) -> String {
        let category = e.category();
        if self.styled {
            format!("{}: {}", category.red().bold(), e)
        } else {
            format!("{category}: {e}")
        }
    }

    /// コマンドの失敗（言語のエラーではないもの）。
    pub fn render_failure(&self, msg: &str) -> String {
        if self.styled {
            format!("{} {}", "エラー:".red(), msg)
        } else {
            format!("エラー: {msg}")
        }
    }

    /// コマンドの応答など補助的なメッセージ。
    pub fn render_notice(&self, msg: &str) -> String {
        if self.styled {
            msg.dimmed().to_string()
        } else {
            msg.to_string()
        }
    }

    /// 行エディタがカーソル位置を計算するため、プロンプトは色付けしない。
    pub fn render_prompt(&self, state: ReplState) -> &'static str {
        match state {
            ReplState::Idle => "> ",
            ReplState::Accumulating => ".. ",
            ReplState::Evaluating | ReplState::Exiting | ReplState::Fatal => "",
        }
    }

    pub fn render_banner(&self) -> String {
        let rest = ":: :help でヘルプ :: exit で終了";
        if self.styled {
            format!("{} {}", BANNER.green().bold(), rest)
        } else {
            format!("{BANNER} {rest}")
        }
    }

    pub fn render_help(&self) -> String {
        HELP_TEXT.trim_end().to_string()
    }
}
