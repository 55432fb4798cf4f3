//! 概率图二值化与连通域过滤.
//!
//! 体素概率 `> threshold` 视为前景, 随后按连通域计算病灶质量,
//! 质量小于 `min_lesion_size` 的病灶被整体置为背景.

mod search;

pub use search::{thresh_size_search, GroundTruth, LabeledSample, SearchGrid, SearchResult, Strategy};

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3, Zip};
use once_cell::sync::Lazy;

use crate::Idx3d;

/// 三维偏移.
type Offset3d = (isize, isize, isize);

/// 面相邻的 6 个偏移.
static FACE_OFFSETS: Lazy<Vec<Offset3d>> = Lazy::new(|| {
    neighbour_offsets()
        .filter(|&(x, y, z)| x.abs() + y.abs() + z.abs() == 1)
        .collect()
});

/// 面、棱、角相邻的 26 个偏移.
static FULL_OFFSETS: Lazy<Vec<Offset3d>> = Lazy::new(|| neighbour_offsets().collect());

fn neighbour_offsets() -> impl Iterator<Item = Offset3d> {
    itertools::iproduct!(-1..=1, -1..=1, -1..=1).filter(|&o| o != (0, 0, 0))
}

/// 三维连通性.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Connectivity {
    /// 6 邻域 (仅共面). 与三维十字形结构元一致.
    #[default]
    Six,

    /// 26 邻域 (共面、共棱或共顶点).
    TwentySix,
}

impl Connectivity {
    #[inline]
    fn offsets(self) -> &'static [Offset3d] {
        match self {
            Self::Six => &FACE_OFFSETS,
            Self::TwentySix => &FULL_OFFSETS,
        }
    }
}

/// 病灶 (连通域) 质量的计算方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LesionMass {
    /// 连通域内原始概率之和.
    #[default]
    ProbabilitySum,

    /// 连通域体素个数.
    VoxelCount,
}

/// 标记 `mask` 的连通域.
///
/// 返回 `(labels, n)`: 背景为 0, 连通域按行优先的发现顺序依次编号为 `1..=n`.
pub fn label_components(mask: ArrayView3<bool>, connectivity: Connectivity) -> (Array3<u32>, usize) {
    let dim = mask.dim();
    let offsets = connectivity.offsets();
    let mut labels = Array3::<u32>::zeros(dim);
    let mut bfs_q: VecDeque<Idx3d> = VecDeque::with_capacity(64);
    let mut n = 0u32;

    for (pos, &fg) in mask.indexed_iter() {
        if !fg || labels[pos] != 0 {
            continue;
        }
        n += 1;
        labels[pos] = n;
        bfs_q.push_back(pos);
        while let Some(cur) = bfs_q.pop_front() {
            for &off in offsets {
                let Some(nb) = shift(cur, off, dim) else {
                    continue;
                };
                if mask[nb] && labels[nb] == 0 {
                    labels[nb] = n;
                    bfs_q.push_back(nb);
                }
            }
        }
    }
    (labels, n as usize)
}

/// 把 `pos` 移动 `off`. 越界时返回 `None`.
#[inline]
fn shift((x, y, z): Idx3d, (dx, dy, dz): Offset3d, (ex, ey, ez): Idx3d) -> Option<Idx3d> {
    #[inline]
    fn axis(c: usize, d: isize, e: usize) -> Option<usize> {
        c.checked_add_signed(d).filter(|&v| v < e)
    }
    Some((axis(x, dx, ex)?, axis(y, dy, ey)?, axis(z, dz, ez)?))
}

/// 计算每个连通域的质量. 返回值长度为 `n + 1`, 下标 0 (背景) 恒为 0.
///
/// # 注意
///
/// `labels` 与 `probs` 形状必须一致, 否则程序 panic.
pub fn component_masses(
    labels: ArrayView3<u32>,
    n: usize,
    probs: ArrayView3<f32>,
    mass: LesionMass,
) -> Vec<f64> {
    let mut ans = vec![0.0; n + 1];
    Zip::from(labels).and(probs).for_each(|&l, &p| {
        if l != 0 {
            ans[l as usize] += match mass {
                LesionMass::ProbabilitySum => p as f64,
                LesionMass::VoxelCount => 1.0,
            };
        }
    });
    ans[0] = 0.0;
    ans
}

/// 只保留质量不小于 `min_lesion_size` 的连通域, 得到二值结果 (0/1).
pub fn filter_components(labels: ArrayView3<u32>, masses: &[f64], min_lesion_size: f64) -> Array3<u8> {
    let keep: Vec<bool> = masses
        .iter()
        .enumerate()
        .map(|(l, &m)| l != 0 && m >= min_lesion_size)
        .collect();
    labels.mapv(|l| u8::from(keep[l as usize]))
}

/// 阈值 + 最小病灶尺寸二值化器.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreshSizeBinarizer {
    /// 概率阈值, 严格大于该值才视为前景.
    pub threshold: f32,

    /// 最小病灶质量.
    pub min_lesion_size: f64,

    /// 连通性.
    pub connectivity: Connectivity,

    /// 病灶质量计算方式.
    pub mass: LesionMass,
}

impl ThreshSizeBinarizer {
    /// 使用默认连通性与质量计算方式创建.
    #[inline]
    pub fn new(threshold: f32, min_lesion_size: f64) -> Self {
        Self {
            threshold,
            min_lesion_size,
            connectivity: Connectivity::default(),
            mass: LesionMass::default(),
        }
    }

    /// 指定连通性.
    #[inline]
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// 指定病灶质量计算方式.
    #[inline]
    pub fn with_mass(mut self, mass: LesionMass) -> Self {
        self.mass = mass;
        self
    }

    /// 二值化概率图. 没有任何连通域时返回同形状的全 0 结果.
    pub fn binarize(&self, probs: ArrayView3<f32>) -> Array3<u8> {
        let fg = probs.mapv(|p| p > self.threshold);
        let (labels, n) = label_components(fg.view(), self.connectivity);
        if n == 0 {
            return Array3::zeros(probs.dim());
        }
        let masses = component_masses(labels.view(), n, probs, self.mass);
        filter_components(labels.view(), &masses, self.min_lesion_size)
    }
}
