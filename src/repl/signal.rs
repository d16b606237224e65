// パス: src/repl/signal.rs
// 役割: SIGINT を評価器の中断フラグへつなぐ
// 意図: 評価中の Ctrl-C でプロセスを終わらせず、実行中の入力単位だけを打ち切る
// 関連ファイル: src/evaluator.rs, src/repl/cmd.rs
//! 中断シグナルの登録。プロセス全体で 1 つのフラグだけを登録できる。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

static INTERRUPT_FLAG: OnceCell<Arc<AtomicBool>> = OnceCell::new();

/// SIGINT を受けたときに立てるフラグを登録し、ハンドラを設定する。
///
/// 既に別のフラグが登録済みなら `false` を返す。
pub fn install(flag: Arc<AtomicBool>) -> bool {
    if INTERRUPT_FLAG.set(flag).is_err() {
        return false;
    }
    #[cfg(unix)]
    {
        // SAFETY: ハンドラはアトミック変数への書き込みのみを行う
        unsafe {
            signal(SIGINT, on_sigint);
        }
    }
    true
}

/// ハンドラから呼ばれる処理。テストからも直接呼べる。
fn raise_interrupt() {
    if let Some(flag) = INTERRUPT_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(unix)]
extern "C" fn on_sigint(_signum: i32) {
    raise_interrupt();
}

#[cfg(unix)]
const SIGINT: i32 = 2;

#[cfg(unix)]
extern "C" {
    fn signal(signum: i32, handler: extern "C" fn(i32)) -> usize;
}

#[cfg(test)]
mod tests {
    use super::{install, raise_interrupt};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    /// 登録は最初の 1 回だけ成功し、中断は登録済みのフラグに届く。
    fn install_once_and_raise() {
        let flag = Arc::new(AtomicBool::new(false));
        assert!(install(Arc::clone(&flag)));
        assert!(!install(Arc::new(AtomicBool::new(false))));
        raise_interrupt();
        assert!(flag.load(Ordering::SeqCst));
    }
}
