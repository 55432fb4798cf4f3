#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 为三维医学影像 (如 CT/MRI 病灶分割) 的 patch 式训练与评估提供
//! 采样、提取和后处理算法.
//!
//! # 数据流
//!
//! ```text
//! volumes -> Sampling -> centers (每个图像一组) -> build_instructions
//!         -> PatchSet::get(i) -> 归一化后的 patch
//!
//! probability volumes + ground truth -> thresh_size_search -> 每个 (threshold, lesion size) 的指标
//! ```
//!
//! # 注意
//!
//! 1. 所有体数据的空间维度均为 3. 图像按照 (C, X, Y, Z) 组织,
//!   标签按照 (X, Y, Z) 组织.
//! 2. 中心非法 (提取会越界) 属于调用方的编程错误, 提取时程序会直接 panic,
//!   不会静默裁剪. 裁剪是采样阶段的职责.
//! 3. 并行部分依赖 `rayon` feature (默认开启). 关闭后所有算法退化为单线程,
//!   结果完全一致.
//!
//! # 模块
//!
//! ### 中心采样 ✅
//!
//! 均匀网格采样与按标签均衡采样. 实现位于 `patch-berry/src/sampling`.
//!
//! ### patch 指令与数据集 ✅
//!
//! 实现位于 `patch-berry/src/instruction.rs` 和 `patch-berry/src/dataset.rs`.
//!
//! ### 阈值 × 最小病灶尺寸搜索 ✅
//!
//! 三维连通域标记、病灶过滤、两种等价的网格搜索策略.
//! 实现位于 `patch-berry/src/binarize`.
//!
//! ### 外部协作接口 ✅
//!
//! 指标、进度汇报、训练器以及交叉验证产物路径.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// patch 中心点 (x, y, z).
pub type Center = Idx3d;

/// patch 形状 (x, y, z).
pub type PatchShape = Idx3d;

pub mod augment;
pub mod binarize;
pub mod consts;
pub mod dataset;
mod error;
pub mod fold;
pub mod instruction;
pub mod io;
pub mod metrics;
pub mod prelude;
pub mod progress;
pub mod sampling;
mod volume;

pub use error::{IoError, MetricsError, PatchError};
pub use volume::{ChannelStats, LabelVolume, Volume};

/// 采样 / 构建运行时结果.
pub type PatchResult<T> = Result<T, PatchError>;
