//! 构建期与运行期错误.

use crate::Idx3d;
use std::fmt;

/// 采样、构建 patch 指令或提取 patch 时产生的错误.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    /// 体数据维度不是预期值. 第一个参数为期望维度, 第二个参数为实际维度.
    RankMismatch(usize, usize),

    /// 第 `image` 个图像的空间形状与其标签 (或掩码) 形状不一致.
    ShapeMismatch {
        /// 图像在输入序列中的索引.
        image: usize,
        /// 图像空间形状 (X, Y, Z).
        volume: Idx3d,
        /// 标签形状 (X, Y, Z).
        label: Idx3d,
    },

    /// 两个本应等长的序列长度不一致.
    LenMismatch {
        /// 出错的序列名称.
        what: &'static str,
        /// 期望长度.
        expected: usize,
        /// 实际长度.
        found: usize,
    },

    /// patch 形状中存在为 0 的维度.
    InvalidPatchShape(Idx3d),

    /// 均匀采样步长中存在为 0 的维度.
    InvalidStep(Idx3d),

    /// 第 `image` 个体数据在某个轴上比 patch 还小, 不存在任何合法中心.
    VolumeTooSmall {
        /// 图像在输入序列中的索引.
        image: usize,
        /// 体数据空间形状.
        volume: Idx3d,
        /// patch 形状.
        patch: Idx3d,
    },

    /// 各图像的通道数不一致, 无法组成同一批次.
    ChannelMismatch {
        /// 图像在输入序列中的索引.
        image: usize,
        /// 第一个图像的通道数.
        expected: usize,
        /// 该图像的通道数.
        found: usize,
    },

    /// 中心越界: 以该中心提取的 patch 会超出体数据范围.
    CenterOutOfBounds {
        /// 中心.
        center: Idx3d,
        /// patch 形状.
        patch: Idx3d,
        /// 体数据空间形状.
        volume: Idx3d,
    },

    /// 数据集索引越界. 第一个参数为索引, 第二个参数为数据集大小.
    IndexOutOfRange(usize, usize),

    /// 增强操作改变了 patch 形状 (C, X, Y, Z).
    AugmentShape {
        /// 增强前的形状.
        expected: [usize; 4],
        /// 增强后的形状.
        found: [usize; 4],
    },

    /// 未知的归一化模式字符串.
    UnknownNormalization(String),

    /// 搜索网格参数不是有限值.
    NonFinite {
        /// 参数名称.
        what: &'static str,
        /// 参数值.
        value: f64,
    },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RankMismatch(expected, found) => {
                write!(f, "expected rank {expected}, found rank {found}")
            }
            Self::ShapeMismatch {
                image,
                volume,
                label,
            } => write!(
                f,
                "image #{image}: spatial shape {volume:?} differs from label shape {label:?}"
            ),
            Self::LenMismatch {
                what,
                expected,
                found,
            } => write!(f, "{what}: expected {expected} entries, found {found}"),
            Self::InvalidPatchShape(s) => write!(f, "invalid patch shape {s:?}"),
            Self::InvalidStep(s) => write!(f, "invalid extraction step {s:?}"),
            Self::VolumeTooSmall {
                image,
                volume,
                patch,
            } => write!(
                f,
                "image #{image}: volume {volume:?} is smaller than patch {patch:?}"
            ),
            Self::ChannelMismatch {
                image,
                expected,
                found,
            } => write!(
                f,
                "image #{image}: expected {expected} channels, found {found}"
            ),
            Self::CenterOutOfBounds {
                center,
                patch,
                volume,
            } => write!(
                f,
                "center {center:?} with patch {patch:?} runs out of volume {volume:?}"
            ),
            Self::IndexOutOfRange(i, len) => {
                write!(f, "index {i} out of range for {len} patches")
            }
            Self::AugmentShape { expected, found } => write!(
                f,
                "augmentation changed patch shape from {expected:?} to {found:?}"
            ),
            Self::UnknownNormalization(s) => write!(
                f,
                "unknown normalization `{s}`, expected one of `none`, `patch`, `image`"
            ),
            Self::NonFinite { what, value } => write!(f, "{what} must be finite, found {value}"),
        }
    }
}

impl std::error::Error for PatchError {}

/// 分割指标计算失败.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// 真值与预测形状不一致.
    ShapeMismatch(Idx3d, Idx3d),

    /// 外部指标实现自定义的错误描述.
    Other(String),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch(t, p) => {
                write!(f, "ground truth shape {t:?} differs from prediction {p:?}")
            }
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl std::error::Error for MetricsError {}

/// 读写体数据文件时的错误.
#[derive(Debug)]
pub enum IoError {
    /// 打开 nifti 文件错误.
    Nifti(nifti::NiftiError),

    /// 读取 npy 文件错误.
    ReadNpy(ndarray_npy::ReadNpyError),

    /// 写入 npy 文件错误.
    WriteNpy(ndarray_npy::WriteNpyError),

    /// 数据内容不符合预期 (例如维度或形状).
    Patch(PatchError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nifti(e) => write!(f, "nifti: {e}"),
            Self::ReadNpy(e) => write!(f, "read npy: {e}"),
            Self::WriteNpy(e) => write!(f, "write npy: {e}"),
            Self::Patch(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for IoError {}

impl From<nifti::NiftiError> for IoError {
    #[inline]
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

impl From<ndarray_npy::ReadNpyError> for IoError {
    #[inline]
    fn from(e: ndarray_npy::ReadNpyError) -> Self {
        Self::ReadNpy(e)
    }
}

impl From<ndarray_npy::WriteNpyError> for IoError {
    #[inline]
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        Self::WriteNpy(e)
    }
}

impl From<PatchError> for IoError {
    #[inline]
    fn from(e: PatchError) -> Self {
        Self::Patch(e)
    }
}

impl From<std::io::Error> for IoError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
