// パス: src/config.rs
// 役割: コマンドライン引数と JSON 設定ファイルを読み、実行時設定へまとめる
// 意図: 起動時の設定解決を 1 箇所に集め、優先順位（CLI > 設定ファイル > 既定値）を明示する
// 関連ファイル: src/bin/mainau.rs, src/repl/cmd.rs, src/logger.rs
//! 設定の解決
//!
//! - 設定ファイルは `--config`、なければ環境変数 `MAINAU_CONFIG` で指定する。
//! - ファイルの各項目は省略可能。未知の項目はエラーにする。
//! - `load` はファイル側の指定に CLI の指定を後ろから足す。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ReplError;
use crate::evaluator::{EvalOptions, DEFAULT_MAX_DEPTH};

pub const CONFIG_ENV: &str = "MAINAU_CONFIG";

/// Mainau の対話環境（REPL）
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "mainau-repl", version, about, long_about = None)]
pub struct Cli {
    /// 色付けを無効にする（`NO_COLOR` でも無効になる）
    #[arg(long)]
    pub no_color: bool,

    /// 評価の前に構文木を表示する
    #[arg(short, long)]
    pub verbose: bool,

    /// 入力単位ごとの評価の制限時間（ミリ秒、0 で無制限）
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// 関数呼び出しの深さの上限
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// 履歴ファイルの場所
    #[arg(long, value_name = "PATH")]
    pub history_file: Option<PathBuf>,

    /// JSON 設定ファイル
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// 起動時に評価するソースファイル（複数指定可）
    #[arg(long = "load", value_name = "PATH")]
    pub load: Vec<PathBuf>,

    /// ログのフィルタ（例: `debug`, `mainau=trace`）
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

/// 設定ファイルの内容。すべて省略可能。
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub no_color: Option<bool>,
    pub verbose: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub max_depth: Option<usize>,
    pub history_file: Option<PathBuf>,
    pub load: Vec<PathBuf>,
    pub log_level: Option<String>,
}

/// 解決済みの実行時設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub no_color: bool,
    pub verbose: bool,
    pub timeout: Option<Duration>,
    pub max_depth: usize,
    pub history_file: Option<PathBuf>,
    pub load: Vec<PathBuf>,
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            no_color: false,
            verbose: false,
            timeout: None,
            max_depth: DEFAULT_MAX_DEPTH,
            history_file: None,
            load: Vec::new(),
            log_level: None,
        }
    }
}

impl Settings {
    /// CLI 引数から設定ファイルを探して読み、両者を統合する。
    pub fn resolve(cli: &Cli) -> Result<Self, ReplError> {
        let path = cli
            .config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let file = match path {
            Some(p) => load_file_config(&p)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// CLI の指定を設定ファイルより優先して統合する。
    pub fn merge(cli: &Cli, file: FileConfig) -> Result<Self, ReplError> {
        let max_depth = cli.max_depth.or(file.max_depth).unwrap_or(DEFAULT_MAX_DEPTH);
        if max_depth == 0 {
            return Err(ReplError::Config("max_depth は 1 以上を指定してください".into()));
        }
        let timeout = cli
            .timeout_ms
            .or(file.timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let mut load = file.load;
        load.extend(cli.load.iter().cloned());
        Ok(Self {
            no_color: cli.no_color || file.no_color.unwrap_or(false),
            verbose: cli.verbose || file.verbose.unwrap_or(false),
            timeout,
            max_depth,
            history_file: cli.history_file.clone().or(file.history_file),
            load,
            log_level: cli.log_level.clone().or(file.log_level),
        })
    }

    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            max_depth: self.max_depth,
            timeout: self.timeout,
        }
    }
}

/// JSON 設定ファイルを読む。読めない・解釈できない場合は `ReplError::Config`。
pub fn load_file_config(path: &Path) -> Result<FileConfig, ReplError> {
    let text = fs::read_to_string(path)
        .map_err(|e| ReplError::Config(format!("{} を読めません: {}", path.display(), e)))?;
    let cfg: FileConfig = serde_json::from_str(&text)
        .map_err(|e| ReplError::Config(format!("{}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "config file loaded");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::{load_file_config, Cli, FileConfig, Settings};
    use crate::errors::ReplError;
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from([
            "mainau-repl",
            "--no-color",
            "-v",
            "--timeout-ms",
            "250",
            "--load",
            "a.mn",
            "--load",
            "b.mn",
        ])
        .unwrap();
        assert!(cli.no_color);
        assert!(cli.verbose);
        assert_eq!(cli.timeout_ms, Some(250));
        assert_eq!(cli.load, vec![PathBuf::from("a.mn"), PathBuf::from("b.mn")]);
    }

    #[test]
    /// CLI の値が設定ファイルより優先され、load は連結される。
    fn cli_wins_over_file() {
        let cli = Cli {
            max_depth: Some(50),
            load: vec!["cli.mn".into()],
            ..Cli::default()
        };
        let file = FileConfig {
            max_depth: Some(10),
            timeout_ms: Some(1000),
            verbose: Some(true),
            load: vec!["file.mn".into()],
            ..FileConfig::default()
        };
        let s = Settings::merge(&cli, file).unwrap();
        assert_eq!(s.max_depth, 50);
        assert_eq!(s.timeout, Some(Duration::from_millis(1000)));
        assert!(s.verbose);
        assert_eq!(s.load, vec![PathBuf::from("file.mn"), PathBuf::from("cli.mn")]);
    }

    #[test]
    fn zero_timeout_means_unlimited_and_zero_depth_is_rejected() {
        let cli = Cli {
            timeout_ms: Some(0),
            ..Cli::default()
        };
        assert_eq!(Settings::merge(&cli, FileConfig::default()).unwrap().timeout, None);
        let cli = Cli {
            max_depth: Some(0),
            ..Cli::default()
        };
        assert!(matches!(
            Settings::merge(&cli, FileConfig::default()),
            Err(ReplError::Config(_))
        ));
    }

    #[test]
    fn file_config_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mainau.json");
        std::fs::write(&path, r#"{ "no_color": true, "max_depth": 64 }"#).unwrap();
        let cfg = load_file_config(&path).unwrap();
        assert_eq!(cfg.no_color, Some(true));
        assert_eq!(cfg.max_depth, Some(64));
        assert!(cfg.load.is_empty());
    }

    #[test]
    /// 未知の項目や読めないファイルは設定エラー。
    fn bad_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "colour": false }"#).unwrap();
        let err = load_file_config(&path).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("colour"));
        let missing = load_file_config(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ReplError::Config(_)));
    }
}
