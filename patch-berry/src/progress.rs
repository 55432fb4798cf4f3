//! 进度汇报. 纯观察性质, 不影响任何计算结果.

use std::sync::atomic::{AtomicUsize, Ordering};

/// 进度汇报器. 可能被多个工作线程同时调用.
pub trait Progress: Sync {
    /// 汇报已完成 `current` 个, 共 `total` 个.
    fn report(&self, current: usize, total: usize, suffix: &str);
}

/// 什么也不做.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    #[inline]
    fn report(&self, _: usize, _: usize, _: &str) {}
}

/// 以 `log::info!` 输出进度.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn report(&self, current: usize, total: usize, suffix: &str) {
        let pct = if total == 0 {
            100.0
        } else {
            current as f64 * 100.0 / total as f64
        };
        log::info!("[{current}/{total}] {pct:.1}%{suffix}");
    }
}

/// 线程安全的完成计数器, 每完成一项就汇报一次.
pub(crate) struct Ticker<'a, P: ?Sized> {
    done: AtomicUsize,
    total: usize,
    suffix: &'static str,
    progress: &'a P,
}

impl<'a, P: Progress + ?Sized> Ticker<'a, P> {
    pub(crate) fn new(progress: &'a P, total: usize, suffix: &'static str) -> Self {
        progress.report(0, total, suffix);
        Self {
            done: AtomicUsize::new(0),
            total,
            suffix,
            progress,
        }
    }

    pub(crate) fn tick(&self) {
        let cur = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.report(cur, self.total, self.suffix);
    }
}
