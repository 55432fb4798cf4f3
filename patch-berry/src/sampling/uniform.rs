use itertools::iproduct;

use super::resample_to_count;
use crate::instruction::span;
use crate::{Center, Idx3d, LabelVolume, PatchError, PatchResult, PatchShape, Volume};

/// 规则网格采样参数.
///
/// 在每个轴上从 `ceil(d/2)` 开始, 每隔 `step` 取一个位置,
/// 直到 `extent - floor(d/2)` (不含). 中心集合为三个轴位置的笛卡尔积.
#[derive(Debug, Clone)]
pub struct UniformSampling {
    step: Idx3d,
    num_patches: Option<usize>,
    masks: Option<Vec<LabelVolume>>,
}

impl UniformSampling {
    /// 以步长 `step` 构建. 任一维度为 0 时返回 `Err`.
    pub fn new(step: Idx3d) -> PatchResult<Self> {
        let (x, y, z) = step;
        if x == 0 || y == 0 || z == 0 {
            return Err(PatchError::InvalidStep(step));
        }
        Ok(Self {
            step,
            num_patches: None,
            masks: None,
        })
    }

    /// 指定期望的 patch 总数. 每个图像的网格中心会被重采样为
    /// `ceil(num_patches / 图像个数)` 个.
    #[inline]
    pub fn with_num_patches(mut self, num_patches: usize) -> Self {
        self.num_patches = Some(num_patches);
        self
    }

    /// 指定每个图像的前景掩码. 掩码值为 0 的网格中心会被丢弃.
    #[inline]
    pub fn with_masks(mut self, masks: Vec<LabelVolume>) -> Self {
        self.masks = Some(masks);
        self
    }

    pub(super) fn sample(
        &self,
        images: &[Volume],
        patch_shape: PatchShape,
    ) -> PatchResult<Vec<Vec<Center>>> {
        let per_image = self
            .num_patches
            .map(|n| n.div_ceil(images.len().max(1)));

        match self.masks.as_deref() {
            Some(masks) => {
                if masks.len() != images.len() {
                    return Err(PatchError::LenMismatch {
                        what: "masks",
                        expected: images.len(),
                        found: masks.len(),
                    });
                }
                images
                    .iter()
                    .zip(masks)
                    .enumerate()
                    .map(|(i, (img, mask))| {
                        let volume = img.spatial_shape();
                        if mask.shape() != volume {
                            return Err(PatchError::ShapeMismatch {
                                image: i,
                                volume,
                                label: mask.shape(),
                            });
                        }
                        Ok(sample_centers_uniform(
                            volume,
                            patch_shape,
                            self.step,
                            per_image,
                            Some(mask),
                        ))
                    })
                    .collect()
            }
            None => Ok(images
                .iter()
                .map(|img| {
                    sample_centers_uniform(
                        img.spatial_shape(),
                        patch_shape,
                        self.step,
                        per_image,
                        None,
                    )
                })
                .collect()),
        }
    }
}

/// 在形状为 `volume` 的体数据上按步长 `step` 取规则网格中心.
///
/// 如果给出 `mask`, 掩码值为 0 的中心会被丢弃; 如果给出 `max_centers`,
/// 结果会被重采样为恰好 `max_centers` 个 (网格为空时仍为空).
/// 任一轴放不下一个 patch 时返回空 `Vec`.
///
/// # 注意
///
/// `mask` 的形状必须与 `volume` 一致, 否则程序 panic.
pub fn sample_centers_uniform(
    volume: Idx3d,
    patch_shape: PatchShape,
    step: Idx3d,
    max_centers: Option<usize>,
    mask: Option<&LabelVolume>,
) -> Vec<Center> {
    #[inline]
    fn axis_positions(extent: usize, d: usize, step: usize) -> impl Iterator<Item = usize> + Clone {
        let (lo, hi) = span(d);
        (lo..extent.saturating_sub(hi)).step_by(step)
    }

    let (ex, ey, ez) = volume;
    let (px, py, pz) = patch_shape;
    let (sx, sy, sz) = step;

    let grid = iproduct!(
        axis_positions(ex, px, sx),
        axis_positions(ey, py, sy),
        axis_positions(ez, pz, sz)
    );
    let centers: Vec<Center> = match mask {
        Some(m) => {
            assert_eq!(m.shape(), volume, "掩码与体数据形状不一致");
            grid.filter(|&c| m.is_foreground(c)).collect()
        }
        None => grid.collect(),
    };

    match max_centers {
        Some(n) => resample_to_count(&centers, n),
        None => centers,
    }
}
