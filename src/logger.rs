// パス: src/logger.rs
// 役割: tracing の購読者を標準エラー出力向けに初期化する
// 意図: REPL の表示（標準出力）と診断ログを混ぜない
// 関連ファイル: src/bin/mainau.rs, src/config.rs
//! ログ初期化
//!
//! - フィルタは `--log-level`、なければ環境変数 `MAINAU_LOG`（EnvFilter 書式）、既定は `warn`。
//! - 時刻・ANSI 色は出さない。何度呼んでも最初の 1 回だけが有効。

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// フィルタ指定を読む環境変数。
pub const LOG_ENV: &str = "MAINAU_LOG";
pub const DEFAULT_FILTER: &str = "warn";

static INIT: Once = Once::new();

/// 明示指定 > `MAINAU_LOG` > 既定値 の順でフィルタ文字列を決める。
pub fn resolve_filter(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

pub fn init(explicit: Option<&str>) {
    INIT.call_once(|| {
        let spec = resolve_filter(explicit);
        let filter = EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .with_ansi(false)
            .compact();
        // 既に他の購読者が登録されていれば何もしない
        let _ = tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::{init, resolve_filter, DEFAULT_FILTER};

    #[test]
    fn explicit_filter_wins() {
        assert_eq!(resolve_filter(Some("mainau=debug")), "mainau=debug");
    }

    #[test]
    /// 空白だけの指定は採用しない。
    fn blank_filter_is_not_used() {
        assert!(!resolve_filter(Some("  ")).trim().is_empty());
        assert_eq!(DEFAULT_FILTER, "warn");
    }

    #[test]
    fn init_is_idempotent() {
        init(Some("off"));
        init(Some("debug"));
    }
}
