use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::resample_to_count;
use crate::consts::{DEFAULT_OFFSET_SEED, DEFAULT_WORKERS};
use crate::instruction::span;
use crate::{Center, Idx3d, LabelVolume, PatchError, PatchResult, PatchShape, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 按标签均衡采样参数.
///
/// 每个图像配对一个标签体数据. 每个出现过的标签值 (除去 `exclude`)
/// 分得相同数量的中心, 从该标签的体素坐标中重采样得到.
#[derive(Debug, Clone)]
pub struct BalancedSampling {
    labels: Vec<LabelVolume>,
    num_patches: usize,
    add_rand_offset: bool,
    exclude: Vec<u8>,
    seed: u64,
    workers: usize,
}

impl BalancedSampling {
    /// 以配对标签 `labels` 和期望 patch 总数 `num_patches` 构建.
    pub fn new(labels: Vec<LabelVolume>, num_patches: usize) -> Self {
        Self {
            labels,
            num_patches,
            add_rand_offset: false,
            exclude: vec![],
            seed: DEFAULT_OFFSET_SEED,
            workers: DEFAULT_WORKERS,
        }
    }

    /// 是否给每个中心加上至多半个 patch 大小的确定性随机偏移.
    #[inline]
    pub fn with_rand_offset(mut self, add_rand_offset: bool) -> Self {
        self.add_rand_offset = add_rand_offset;
        self
    }

    /// 不参与采样的标签值, 例如背景.
    #[inline]
    pub fn with_exclude<I: IntoIterator<Item = u8>>(mut self, exclude: I) -> Self {
        self.exclude = exclude.into_iter().collect();
        self
    }

    /// 随机偏移的种子. 每个标签都从以该种子新建的生成器开始抽取.
    #[inline]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 并行工作线程上限, 最少为 1.
    #[inline]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 配对的标签体数据.
    #[inline]
    pub fn labels(&self) -> &[LabelVolume] {
        &self.labels
    }

    pub(super) fn sample(
        &self,
        images: &[Volume],
        patch_shape: PatchShape,
    ) -> PatchResult<Vec<Vec<Center>>> {
        if images.len() != self.labels.len() {
            return Err(PatchError::LenMismatch {
                what: "labels",
                expected: images.len(),
                found: self.labels.len(),
            });
        }
        for (i, (img, lbl)) in images.iter().zip(self.labels.iter()).enumerate() {
            let volume = img.spatial_shape();
            if volume != lbl.shape() {
                return Err(PatchError::ShapeMismatch {
                    image: i,
                    volume,
                    label: lbl.shape(),
                });
            }
            if !fits(volume, patch_shape) {
                return Err(PatchError::VolumeTooSmall {
                    image: i,
                    volume,
                    patch: patch_shape,
                });
            }
        }
        if images.is_empty() {
            return Ok(vec![]);
        }

        let per_image = self.num_patches.div_ceil(images.len());
        let job = |label: &LabelVolume| {
            sample_centers_balanced(
                label,
                patch_shape,
                per_image,
                self.add_rand_offset,
                &self.exclude,
                self.seed,
            )
        };

        Ok(self.map_labels(job))
    }

    /// 各标签体数据互相独立; `collect` 保持输入顺序, 结果与调度无关.
    #[cfg(feature = "rayon")]
    fn map_labels<F>(&self, job: F) -> Vec<Vec<Center>>
    where
        F: Fn(&LabelVolume) -> Vec<Center> + Sync + Send,
    {
        match rayon::ThreadPoolBuilder::new().num_threads(self.workers).build() {
            Ok(pool) => pool.install(|| self.labels.par_iter().map(job).collect()),
            Err(e) => {
                log::warn!("failed to build sampling pool ({e}), sampling sequentially");
                self.labels.iter().map(job).collect()
            }
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn map_labels<F>(&self, job: F) -> Vec<Vec<Center>>
    where
        F: Fn(&LabelVolume) -> Vec<Center>,
    {
        self.labels.iter().map(job).collect()
    }
}

/// 体数据每个轴都不比 patch 小.
#[inline]
fn fits((ex, ey, ez): Idx3d, (px, py, pz): PatchShape) -> bool {
    ex >= px && ey >= py && ez >= pz
}

/// 采样阶段的中心取值范围 `[ceil(d/2), extent - floor(d/2) - 1]`.
///
/// 上界与均匀网格的上界一致. 当 `extent == d` 时上下界重合, 唯一的合法中心即 `ceil(d/2)`.
#[inline]
fn clamp_range(extent: usize, d: usize) -> (usize, usize) {
    let (lo, hi) = span(d);
    (lo, (extent - hi).saturating_sub(1).max(lo))
}

/// 从标签体数据 `label` 中均衡采样 `num_centers` 个中心.
///
/// 1. 统计升序排列的所有标签值, 去除 `exclude` 中的值;
/// 2. 每个标签值按行优先序收集体素坐标, 重采样为 `ceil(num_centers / 标签数)` 个;
/// 3. 若 `add_rand_offset` 为 `true`, 每个标签以种子 `seed` 新建随机数生成器,
///   给每个坐标的每个轴加上 `floor(d/2) * U(-1, 1)` 的偏移;
/// 4. 将所有坐标裁剪到采样范围内, 按标签值顺序拼接.
///
/// 所有标签都被排除时返回空 `Vec`.
///
/// # 注意
///
/// `label` 的每个轴都不能比 `patch_shape` 小, 否则程序 panic.
pub fn sample_centers_balanced(
    label: &LabelVolume,
    patch_shape: PatchShape,
    num_centers: usize,
    add_rand_offset: bool,
    exclude: &[u8],
    seed: u64,
) -> Vec<Center> {
    let (ex, ey, ez) = label.shape();
    let (px, py, pz) = patch_shape;
    assert!(fits((ex, ey, ez), patch_shape), "体数据小于 patch");

    let label_ids: Vec<u8> = label
        .unique_labels()
        .into_iter()
        .filter(|l| !exclude.contains(l))
        .collect();
    if label_ids.is_empty() {
        return vec![];
    }
    let per_label = num_centers.div_ceil(label_ids.len());

    let ranges = [
        clamp_range(ex, px),
        clamp_range(ey, py),
        clamp_range(ez, pz),
    ];
    let half = [(px / 2) as f64, (py / 2) as f64, (pz / 2) as f64];

    let mut ans = Vec::with_capacity(per_label * label_ids.len());
    for &l in label_ids.iter() {
        let picked = resample_to_count(&label.label_pos(l), per_label);
        if add_rand_offset {
            // 每个标签重新播种, 保证可复现.
            let mut rng = StdRng::seed_from_u64(seed);
            ans.extend(picked.into_iter().map(|(x, y, z)| {
                let mut c = [x as f64, y as f64, z as f64];
                for (v, h) in c.iter_mut().zip(half.iter()) {
                    *v += h * (2.0 * rng.gen::<f64>() - 1.0);
                }
                clamp_f64(c, &ranges)
            }));
        } else {
            ans.extend(picked.into_iter().map(|(x, y, z)| {
                let [(x0, x1), (y0, y1), (z0, z1)] = ranges;
                (x.clamp(x0, x1), y.clamp(y0, y1), z.clamp(z0, z1))
            }));
        }
    }
    ans
}

/// 浮点坐标裁剪后向下取整.
#[inline]
fn clamp_f64(c: [f64; 3], ranges: &[(usize, usize); 3]) -> Center {
    let [x, y, z] = [0, 1, 2].map(|i| {
        let (lo, hi) = ranges[i];
        c[i].clamp(lo as f64, hi as f64) as usize
    });
    (x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::Sampling;
    use crate::volume::is_valid_center;
    use ndarray::{s, Array3, Array4};

    /// 10x10x10, 全为 1, 角落 2x2x2 为 2.
    fn corner_label() -> LabelVolume {
        let mut data = Array3::<u8>::ones((10, 10, 10));
        data.slice_mut(s![0..2, 0..2, 0..2]).fill(2);
        LabelVolume::new(data)
    }

    fn in_range(c: Center, lo: usize, hi: usize) -> bool {
        [c.0, c.1, c.2].iter().all(|v| (lo..=hi).contains(v))
    }

    #[test]
    fn test_balanced_example() {
        let label = corner_label();
        let img = Volume::new(Array4::zeros((1, 10, 10, 10)));
        let s = Sampling::from(BalancedSampling::new(vec![label.clone()], 4));
        let centers = s.sample_centers(&[img], (3, 3, 3)).unwrap();
        assert_eq!(centers.len(), 1);
        let centers = &centers[0];
        assert_eq!(centers.len(), 4);
        assert!(centers.iter().all(|&c| in_range(c, 2, 8)));

        // 按标签顺序拼接: 前两个来自标签 1, 后两个来自标签 2 (角落被裁剪到 2).
        let from_one = &label.label_pos(1);
        assert_eq!(centers[0], (2, 2, 2)); // (0, 0, 2) 裁剪后
        let (x, y, z) = from_one[from_one.len() / 2];
        assert_eq!(centers[1], (x.clamp(2, 8), y.clamp(2, 8), z.clamp(2, 8)));
        assert_eq!(&centers[2..], &[(2, 2, 2), (2, 2, 2)]);
    }

    #[test]
    fn test_balanced_exclude() {
        let label = corner_label();
        let centers = sample_centers_balanced(&label, (3, 3, 3), 6, false, &[1], 0);
        assert_eq!(centers.len(), 6);
        let centers = sample_centers_balanced(&label, (3, 3, 3), 6, false, &[1, 2], 0);
        assert!(centers.is_empty());
    }

    #[test]
    fn test_balanced_bounds_with_extreme_offsets() {
        let mut data = Array3::<u8>::zeros((9, 12, 7));
        data[(0, 0, 0)] = 1;
        data[(8, 11, 6)] = 2;
        data[(4, 0, 6)] = 3;
        let label = LabelVolume::new(data);
        for patch in [(9, 12, 7), (8, 11, 6), (5, 5, 5), (1, 1, 1), (2, 9, 3)] {
            for seed in 0..8 {
                let centers = sample_centers_balanced(&label, patch, 200, true, &[], seed);
                assert_eq!(centers.len(), 200);
                assert!(centers
                    .iter()
                    .all(|&c| is_valid_center(c, patch, label.shape())));
            }
        }
    }

    #[test]
    fn test_balanced_offset_is_reproducible() {
        let label = corner_label();
        let a = sample_centers_balanced(&label, (5, 5, 5), 40, true, &[], 7);
        let b = sample_centers_balanced(&label, (5, 5, 5), 40, true, &[], 7);
        assert_eq!(a, b);
        let without = sample_centers_balanced(&label, (5, 5, 5), 40, false, &[], 7);
        assert_ne!(a, without);
    }

    #[test]
    fn test_balanced_parallel_matches_sequential() {
        let labels: Vec<LabelVolume> = (0..5u8)
            .map(|k| {
                let mut data = Array3::<u8>::zeros((8, 8, 8));
                data.slice_mut(s![k as usize..k as usize + 3, .., 0..4]).fill(k + 1);
                LabelVolume::new(data)
            })
            .collect();
        let images: Vec<Volume> = (0..5)
            .map(|_| Volume::new(Array4::zeros((2, 8, 8, 8))))
            .collect();

        let expected: Vec<Vec<Center>> = labels
            .iter()
            .map(|l| sample_centers_balanced(l, (3, 3, 3), 7, true, &[0], 3))
            .collect();
        for workers in [1, 2, 12] {
            let s = Sampling::from(
                BalancedSampling::new(labels.clone(), 33)
                    .with_rand_offset(true)
                    .with_exclude([0])
                    .with_seed(3)
                    .with_workers(workers),
            );
            assert_eq!(s.sample_centers(&images, (3, 3, 3)).unwrap(), expected);
        }
    }

    #[test]
    fn test_balanced_errors() {
        let img = Volume::new(Array4::zeros((1, 10, 10, 10)));
        let s = Sampling::from(BalancedSampling::new(vec![], 4));
        assert!(matches!(
            s.sample_centers(&[img.clone()], (3, 3, 3)),
            Err(PatchError::LenMismatch { what: "labels", .. })
        ));

        let s = Sampling::from(BalancedSampling::new(
            vec![LabelVolume::new(Array3::zeros((10, 9, 10)))],
            4,
        ));
        assert_eq!(
            s.sample_centers(&[img.clone()], (3, 3, 3)).unwrap_err(),
            PatchError::ShapeMismatch {
                image: 0,
                volume: (10, 10, 10),
                label: (10, 9, 10),
            }
        );

        let s = Sampling::from(BalancedSampling::new(vec![corner_label()], 4));
        assert!(matches!(
            s.sample_centers(&[img], (11, 3, 3)),
            Err(PatchError::VolumeTooSmall { image: 0, .. })
        ));
    }
}
