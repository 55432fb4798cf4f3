//! patch 提取指令.
//!
//! 每条指令描述了 "从哪个图像、以哪个中心、按何种方式归一化" 提取一个 patch.
//! 指令在数据集构建时一次性生成, 之后只读.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{s, Array4};

use crate::augment::Augment;
use crate::volume::is_valid_center;
use crate::{Center, ChannelStats, PatchError, PatchResult, PatchShape, Volume};

/// patch 在中心两侧的跨度 `(ceil(d/2), floor(d/2))`.
///
/// 奇数维度时低侧多占一个体素. 重建时按相同规则对齐 patch 才能还原原图.
#[inline]
pub const fn span(d: usize) -> (usize, usize) {
    (d.div_ceil(2), d / 2)
}

/// 以 `center` 为中心、形状为 `shape` 的 patch 在三个空间轴上的半开区间
/// `[c - ceil(d/2), c + floor(d/2))`. 低侧越界 (下溢) 时返回 `None`.
pub fn patch_slice(center: Center, shape: PatchShape) -> Option<[Range<usize>; 3]> {
    #[inline]
    fn axis(c: usize, d: usize) -> Option<Range<usize>> {
        let (lo, hi) = span(d);
        Some(c.checked_sub(lo)?..c + hi)
    }
    Some([
        axis(center.0, shape.0)?,
        axis(center.1, shape.1)?,
        axis(center.2, shape.2)?,
    ])
}

/// 从 `volume` 中复制出以 `center` 为中心的 (C, x, y, z) patch.
///
/// 只复制子区域, 不复制整个体数据. 越界时返回 `Err`, 不做任何裁剪.
pub fn extract_patch(volume: &Volume, center: Center, shape: PatchShape) -> PatchResult<Array4<f32>> {
    let out_of_bounds = || PatchError::CenterOutOfBounds {
        center,
        patch: shape,
        volume: volume.spatial_shape(),
    };
    if !is_valid_center(center, shape, volume.spatial_shape()) {
        return Err(out_of_bounds());
    }
    let [rx, ry, rz] = patch_slice(center, shape).ok_or_else(out_of_bounds)?;
    Ok(volume.data().slice(s![.., rx, ry, rz]).to_owned())
}

/// 归一化模式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Normalization {
    /// 不做归一化.
    #[default]
    None,

    /// 用 patch 自身各通道的均值和标准差归一化.
    Patch,

    /// 用 patch 所属图像各通道的均值和标准差归一化.
    Image,
}

impl FromStr for Normalization {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "patch" => Ok(Self::Patch),
            "image" => Ok(Self::Image),
            _ => Err(PatchError::UnknownNormalization(s.to_string())),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Patch => "patch",
            Self::Image => "image",
        })
    }
}

/// 单条指令携带的归一化记录.
///
/// 按图像归一化的统计量在构建时算好, 以 `Arc` 按值放进指令,
/// 同一图像的所有指令共享同一份只读统计量.
#[derive(Clone, Debug, PartialEq)]
pub enum Normalizer {
    /// 恒等.
    Identity,

    /// 提取时由 patch 自身计算统计量.
    PerPatch,

    /// 使用所属图像预先计算的统计量.
    PerImage(Arc<ChannelStats>),
}

impl Normalizer {
    /// 就地归一化 `patch`.
    pub fn apply(&self, patch: &mut Array4<f32>) {
        match self {
            Self::Identity => {}
            Self::PerPatch => ChannelStats::from_view(patch.view()).apply(patch),
            Self::PerImage(stats) => stats.apply(patch),
        }
    }

    /// 对应的归一化模式.
    #[inline]
    pub fn mode(&self) -> Normalization {
        match self {
            Self::Identity => Normalization::None,
            Self::PerPatch => Normalization::Patch,
            Self::PerImage(_) => Normalization::Image,
        }
    }
}

/// patch 提取指令. 一条指令对应恰好一个 patch.
#[derive(Clone)]
pub struct PatchInstruction {
    image: usize,
    center: Center,
    shape: PatchShape,
    normalizer: Normalizer,
    augment: Option<Arc<dyn Augment>>,
}

impl fmt::Debug for PatchInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchInstruction")
            .field("image", &self.image)
            .field("center", &self.center)
            .field("shape", &self.shape)
            .field("normalizer", &self.normalizer)
            .field("augment", &self.augment.is_some())
            .finish()
    }
}

impl PatchInstruction {
    /// 源图像在数据集图像序列中的索引.
    #[inline]
    pub fn image(&self) -> usize {
        self.image
    }

    /// patch 中心.
    #[inline]
    pub fn center(&self) -> Center {
        self.center
    }

    /// patch 形状.
    #[inline]
    pub fn shape(&self) -> PatchShape {
        self.shape
    }

    /// 归一化记录.
    #[inline]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// 替换增强操作.
    #[inline]
    pub fn with_augment(mut self, augment: Option<Arc<dyn Augment>>) -> Self {
        self.augment = augment;
        self
    }

    /// 按 "提取 -> 归一化 -> 增强" 的顺序生成 patch.
    ///
    /// `images` 必须是构建该指令时使用的图像序列.
    /// 增强改变 patch 形状时返回 `PatchError::AugmentShape`.
    pub fn materialize(&self, images: &[Volume]) -> PatchResult<Array4<f32>> {
        let mut patch = extract_patch(&images[self.image], self.center, self.shape)?;
        self.normalizer.apply(&mut patch);
        let Some(aug) = &self.augment else {
            return Ok(patch);
        };
        let expected = dim4(&patch);
        let patch = aug.apply(patch);
        match dim4(&patch) {
            found if found == expected => Ok(patch),
            found => Err(PatchError::AugmentShape { expected, found }),
        }
    }
}

#[inline]
fn dim4(a: &Array4<f32>) -> [usize; 4] {
    let (c, x, y, z) = a.dim();
    [c, x, y, z]
}

/// 为每个 (图像, 中心) 生成一条指令, 顺序为图像优先, 图像内按中心顺序.
///
/// `centers` 必须与 `images` 一一对应. 按图像归一化时,
/// 每个有中心的图像只统计一次均值和标准差.
pub fn build_instructions(
    images: &[Volume],
    centers: &[Vec<Center>],
    shape: PatchShape,
    normalization: Normalization,
    augment: Option<Arc<dyn Augment>>,
) -> PatchResult<Vec<PatchInstruction>> {
    crate::sampling::check_patch_shape(shape)?;
    if centers.len() != images.len() {
        return Err(PatchError::LenMismatch {
            what: "centers",
            expected: images.len(),
            found: centers.len(),
        });
    }

    let total = centers.iter().map(Vec::len).sum();
    let mut ans = Vec::with_capacity(total);
    for (image, (img, img_centers)) in images.iter().zip(centers).enumerate() {
        if img_centers.is_empty() {
            continue;
        }
        let normalizer = match normalization {
            Normalization::None => Normalizer::Identity,
            Normalization::Patch => Normalizer::PerPatch,
            Normalization::Image => Normalizer::PerImage(Arc::new(img.channel_stats())),
        };
        ans.extend(img_centers.iter().map(|&center| PatchInstruction {
            image,
            center,
            shape,
            normalizer: normalizer.clone(),
            augment: augment.clone(),
        }));
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp_volume() -> Volume {
        Volume::new(Array::from_shape_fn((2, 10, 10, 10), |(c, x, y, z)| {
            (c * 1000 + x * 100 + y * 10 + z) as f32
        }))
    }

    #[test]
    fn test_span() {
        assert_eq!(span(3), (2, 1));
        assert_eq!(span(4), (2, 2));
        assert_eq!(span(1), (1, 0));
    }

    #[test]
    fn test_extracted_patch_shape_and_spans() {
        let v = ramp_volume();
        for shape in [(3, 3, 3), (4, 5, 2), (1, 1, 1), (10, 10, 10)] {
            let center = (span(shape.0).0, 9 - span(shape.1).1, 5);
            let center = (center.0, center.1.max(span(shape.1).0), center.2);
            let patch = extract_patch(&v, center, shape).unwrap();
            assert_eq!(patch.dim(), (2, shape.0, shape.1, shape.2));
            // 低侧起点为 c - ceil(d/2)
            let (lx, ly, lz) = (
                center.0 - span(shape.0).0,
                center.1 - span(shape.1).0,
                center.2 - span(shape.2).0,
            );
            assert_eq!(patch[(0, 0, 0, 0)], v[(0, lx, ly, lz)]);
            // 高侧终点为 c + floor(d/2) - 1
            let (hx, hy, hz) = (
                center.0 + span(shape.0).1 - 1,
                center.1 + span(shape.1).1 - 1,
                center.2 + span(shape.2).1 - 1,
            );
            if shape.0 > 1 && shape.1 > 1 && shape.2 > 1 {
                assert_eq!(
                    patch[(1, shape.0 - 1, shape.1 - 1, shape.2 - 1)],
                    v[(1, hx, hy, hz)]
                );
            }
        }
    }

    #[test]
    fn test_extract_out_of_bounds() {
        let v = ramp_volume();
        assert!(matches!(
            extract_patch(&v, (1, 5, 5), (3, 3, 3)),
            Err(PatchError::CenterOutOfBounds { .. })
        ));
        assert!(matches!(
            extract_patch(&v, (5, 5, 10), (3, 3, 3)),
            Err(PatchError::CenterOutOfBounds { .. })
        ));
        assert!(extract_patch(&v, (9, 9, 9), (3, 3, 3)).is_ok());
        assert!(patch_slice((0, 1, 1), (2, 2, 2)).is_none());
    }

    #[test]
    fn test_normalization_parse() {
        assert_eq!("none".parse::<Normalization>(), Ok(Normalization::None));
        assert_eq!("patch".parse::<Normalization>(), Ok(Normalization::Patch));
        assert_eq!("image".parse::<Normalization>(), Ok(Normalization::Image));
        assert_eq!(
            "zscore".parse::<Normalization>(),
            Err(PatchError::UnknownNormalization("zscore".to_string()))
        );
        assert_eq!(Normalization::Image.to_string(), "image");
    }

    #[test]
    fn test_build_order_and_shared_stats() {
        let a = ramp_volume();
        let b = Volume::new(Array4::from_elem((2, 10, 10, 10), 1.0));
        let centers = vec![vec![(5, 5, 5), (2, 2, 2)], vec![], vec![(3, 3, 3)]];
        let images = vec![a, b.clone(), b];
        let ins =
            build_instructions(&images, &centers, (3, 3, 3), Normalization::Image, None).unwrap();
        assert_eq!(ins.len(), 3);
        let order: Vec<_> = ins.iter().map(|i| (i.image(), i.center())).collect();
        assert_eq!(order, vec![(0, (5, 5, 5)), (0, (2, 2, 2)), (2, (3, 3, 3))]);

        let (Normalizer::PerImage(s0), Normalizer::PerImage(s1)) =
            (ins[0].normalizer(), ins[1].normalizer())
        else {
            panic!("expected per-image normalizer");
        };
        assert!(Arc::ptr_eq(s0, s1));
        assert_ne!(ins[0].normalizer(), ins[2].normalizer());
        assert_eq!(ins[2].normalizer().mode(), Normalization::Image);
    }

    #[test]
    fn test_build_errors() {
        let images = vec![ramp_volume()];
        assert!(matches!(
            build_instructions(&images, &[], (3, 3, 3), Normalization::None, None),
            Err(PatchError::LenMismatch { what: "centers", .. })
        ));
        assert_eq!(
            build_instructions(&images, &[vec![]], (0, 3, 3), Normalization::None, None)
                .unwrap_err(),
            PatchError::InvalidPatchShape((0, 3, 3))
        );
    }
}
