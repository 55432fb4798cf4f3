//! 通用常量.

/// 标签体数据中背景的体素值.
pub const BACKGROUND: u8 = 0;

/// 均衡采样默认的并行工作线程数.
pub const DEFAULT_WORKERS: usize = 12;

/// 均衡采样随机偏移的默认种子.
pub const DEFAULT_OFFSET_SEED: u64 = 0;

/// 概率图文件的默认扩展名.
pub const PROBS_EXT: &str = "npy";

/// 模型 checkpoint 文件的扩展名.
pub const CHECKPOINT_EXT: &str = "pt";

/// 训练日志文件的扩展名.
pub const LOG_EXT: &str = "csv";
