// パス: src/stack.rs
// 役割: 深い再帰に入る前にスタック残量を確保する
// 意図: 構文解析と評価の再帰がネイティブスタックを使い切らないようにする
// 関連ファイル: src/parser/mod.rs, src/evaluator.rs

/// 残りがこれを下回ったらスタックを伸ばす。
const RED_ZONE: usize = 100 * 1024;

/// 1 回の伸長で確保する量。
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// 必要ならスタックを伸ばしてから `f` を実行する。
#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[cfg(test)]
mod tests {
    use super::ensure_sufficient_stack;

    #[test]
    /// 素朴な再帰でも深さ 10 万まで落ちない。
    fn deep_recursion_survives() {
        fn depth(n: u64) -> u64 {
            ensure_sufficient_stack(|| if n == 0 { 0 } else { 1 + depth(n - 1) })
        }
        assert_eq!(depth(100_000), 100_000);
    }
}
