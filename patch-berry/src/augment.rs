//! patch 数据增强.
//!
//! 增强在归一化之后执行, 输入输出均为 (C, X, Y, Z) 的 patch.

use ndarray::{Array4, Axis};

/// patch 增强操作. 必须可在多线程间共享, 且对相同输入给出相同输出.
///
/// 输出形状必须与输入形状相同, 否则提取时返回 [`PatchError::AugmentShape`].
///
/// [`PatchError::AugmentShape`]: crate::PatchError::AugmentShape
pub trait Augment: Send + Sync {
    /// 对 patch 实施增强.
    fn apply(&self, patch: Array4<f32>) -> Array4<f32>;
}

impl<F> Augment for F
where
    F: Fn(Array4<f32>) -> Array4<f32> + Send + Sync,
{
    #[inline]
    fn apply(&self, patch: Array4<f32>) -> Array4<f32> {
        self(patch)
    }
}

/// 空间轴.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpatialAxis {
    /// X 轴.
    X,

    /// Y 轴.
    Y,

    /// Z 轴.
    Z,
}

impl SpatialAxis {
    /// 对应 (C, X, Y, Z) 数组中的轴.
    #[inline]
    const fn array_axis(self) -> Axis {
        match self {
            Self::X => Axis(1),
            Self::Y => Axis(2),
            Self::Z => Axis(3),
        }
    }
}

/// 沿一个空间轴镜像翻转.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flip {
    /// 翻转轴.
    pub axis: SpatialAxis,
}

impl Augment for Flip {
    fn apply(&self, mut patch: Array4<f32>) -> Array4<f32> {
        patch.invert_axis(self.axis.array_axis());
        patch.as_standard_layout().into_owned()
    }
}
