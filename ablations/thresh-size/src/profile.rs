//! 搜索策略运行统计.

use std::time::{Duration, Instant};

/// ablation/benchmark 计时器, 创建即开始计时.
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时会视为已经开始计时.
    #[inline]
    fn new() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: Instant::now(),
        }
    }

    /// 结束计时, 并将这一区间的时间累加.
    #[inline]
    fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    #[inline]
    fn total_ms(&self) -> u128 {
        self.consumed.as_millis()
    }
}

/// 单个策略的运行统计.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 参与搜索的样本个数 (真值与概率图都存在).
    samples: usize,

    /// 网格格子个数.
    cells: usize,

    /// 搜索花费的总时间.
    time: AccTimer,
}

impl Profile {
    /// 初始化, 同时开始计时.
    #[inline]
    pub fn start(samples: usize, cells: usize) -> Self {
        Self {
            samples,
            cells,
            time: AccTimer::new(),
        }
    }

    /// 结束计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.time.elapsed();
        self
    }

    /// 样本个数.
    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// 格子个数.
    #[inline]
    pub fn cells(&self) -> usize {
        self.cells
    }

    /// 总时间 (毫秒).
    #[inline]
    pub fn total_ms(&self) -> u128 {
        self.time.total_ms()
    }

    /// 平均每个样本的时间 (毫秒).
    #[inline]
    pub fn avg_sample_ms(&self) -> Option<f64> {
        match self.samples {
            0 => None,
            n => Some(self.total_ms() as f64 / n as f64),
        }
    }
}
