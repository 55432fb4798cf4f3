//! patch 中心采样.
//!
//! 两种策略以 [`Sampling`] 统一调度:
//!
//! 1. [`UniformSampling`]: 按固定步长在体数据上取规则网格;
//! 2. [`BalancedSampling`]: 按标签值均衡地从标签体数据中抽取体素坐标.
//!
//! 两者都保证输出中心满足提取不越界的约束, 且对相同输入给出相同输出.

mod balanced;
mod uniform;

pub use balanced::{sample_centers_balanced, BalancedSampling};
pub use uniform::{sample_centers_uniform, UniformSampling};

use crate::{Center, PatchError, PatchResult, PatchShape, Volume};

/// 中心采样策略.
#[derive(Debug, Clone)]
pub enum Sampling {
    /// 规则网格采样.
    Uniform(UniformSampling),

    /// 按标签均衡采样.
    Balanced(BalancedSampling),
}

impl From<UniformSampling> for Sampling {
    #[inline]
    fn from(s: UniformSampling) -> Self {
        Self::Uniform(s)
    }
}

impl From<BalancedSampling> for Sampling {
    #[inline]
    fn from(s: BalancedSampling) -> Self {
        Self::Balanced(s)
    }
}

impl Sampling {
    /// 为 `images` 中的每个图像采样一组中心, 返回值与 `images` 一一对应.
    ///
    /// 单个图像的中心数量可能因向上取整而略多于请求值,
    /// 但总数最多超出 `images.len() - 1` (均衡采样还要乘上标签数).
    pub fn sample_centers(
        &self,
        images: &[Volume],
        patch_shape: PatchShape,
    ) -> PatchResult<Vec<Vec<Center>>> {
        check_patch_shape(patch_shape)?;
        let centers = match self {
            Self::Uniform(s) => s.sample(images, patch_shape)?,
            Self::Balanced(s) => s.sample(images, patch_shape)?,
        };
        for (i, c) in centers.iter().enumerate() {
            log::debug!("image #{i}: sampled {} centers", c.len());
        }
        Ok(centers)
    }
}

/// patch 每个维度都必须为正.
#[inline]
pub(crate) fn check_patch_shape(patch_shape: PatchShape) -> PatchResult<()> {
    let (x, y, z) = patch_shape;
    if x == 0 || y == 0 || z == 0 {
        Err(PatchError::InvalidPatchShape(patch_shape))
    } else {
        Ok(())
    }
}

/// 将 `items` 重采样为恰好 `count` 个元素. 纯函数, 没有任何随机性.
///
/// - `count <= items.len()`: 取下标 `⌊i * len / count⌋` 的元素, 保持相对顺序,
///   `count == items.len()` 时原样返回;
/// - `count > items.len()`: 循环重复, 第 `i` 个元素为 `items[i % len]`.
///
/// `items` 为空时返回空 `Vec`.
pub fn resample_to_count<T: Clone>(items: &[T], count: usize) -> Vec<T> {
    let len = items.len();
    if len == 0 {
        return vec![];
    }
    if count <= len {
        (0..count).map(|i| items[i * len / count].clone()).collect()
    } else {
        items.iter().cycle().take(count).cloned().collect()
    }
}
