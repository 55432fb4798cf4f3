use std::ops::Index;
use std::sync::Arc;

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};

use crate::consts::BACKGROUND;
use crate::{Center, Idx3d, PatchShape};

/// 多通道三维图像, 按 (C, X, Y, Z) 组织, 体素值以 `f32` 保存.
///
/// 底层数据由 `Arc` 共享. 克隆该结构不会复制体素, 多个数据集或工作线程可以
/// 同时持有同一份图像. 构建后只读.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Arc<Array4<f32>>,
}

impl Index<(usize, usize, usize, usize)> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: (usize, usize, usize, usize)) -> &Self::Output {
        &self.data[index]
    }
}

impl From<Array4<f32>> for Volume {
    #[inline]
    fn from(data: Array4<f32>) -> Self {
        Self::new(data)
    }
}

impl Volume {
    /// 直接以 (C, X, Y, Z) 数据创建.
    #[inline]
    pub fn new(data: Array4<f32>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// 以单通道 (X, Y, Z) 数据创建, 通道维被补在最前面.
    #[inline]
    pub fn from_channel(data: Array3<f32>) -> Self {
        Self::new(data.insert_axis(Axis(0)))
    }

    /// 由若干形状相同的单通道数据堆叠创建. 形状不一致或 `channels` 为空时返回 `None`.
    pub fn from_channels(channels: &[ArrayView3<f32>]) -> Option<Self> {
        ndarray::stack(Axis(0), channels).ok().map(Self::new)
    }

    /// 获取共享的底层数据句柄.
    #[inline]
    pub fn shared(&self) -> &Arc<Array4<f32>> {
        &self.data
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// 获取第 `c` 个通道. 越界时 panic.
    #[inline]
    pub fn channel(&self, c: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), c)
    }

    /// 通道数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 空间形状 (X, Y, Z).
    #[inline]
    pub fn spatial_shape(&self) -> Idx3d {
        let &[_, x, y, z] = self.data.shape() else {
            unreachable!()
        };
        (x, y, z)
    }

    /// 计算每个通道的均值与 (总体) 标准差.
    #[inline]
    pub fn channel_stats(&self) -> ChannelStats {
        ChannelStats::from_view(self.data())
    }
}

/// 判断中心是否满足 `ceil(d/2) <= c <= e - floor(d/2)`.
#[inline]
pub(crate) fn is_valid_center(
    (cx, cy, cz): Center,
    (px, py, pz): PatchShape,
    (ex, ey, ez): Idx3d,
) -> bool {
    #[inline]
    fn axis(c: usize, d: usize, e: usize) -> bool {
        c >= d.div_ceil(2) && c + d / 2 <= e
    }
    axis(cx, px, ex) && axis(cy, py, ey) && axis(cz, pz, ez)
}

/// 按通道统计的均值与标准差, 以 `f64` 计算和保存.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelStats {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl ChannelStats {
    /// 统计 (C, X, Y, Z) 数据每个通道的均值与总体标准差.
    pub fn from_view(data: ArrayView4<f32>) -> Self {
        let channels = data.len_of(Axis(0));
        let mut mean = Vec::with_capacity(channels);
        let mut std = Vec::with_capacity(channels);
        for ch in data.axis_iter(Axis(0)) {
            let n = ch.len().max(1) as f64;
            let m = ch.iter().map(|&v| v as f64).sum::<f64>() / n;
            let var = ch.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / n;
            mean.push(m);
            std.push(var.sqrt());
        }
        Self { mean, std }
    }

    /// 各通道均值.
    #[inline]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// 各通道标准差.
    #[inline]
    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// 就地执行 `(x - mean) / std`.
    ///
    /// 标准差为 0 (常数通道) 时只减去均值, 避免产生 NaN.
    /// 如果 `patch` 通道数与统计量不符, 则程序 panic.
    pub fn apply(&self, patch: &mut Array4<f32>) {
        assert_eq!(patch.len_of(Axis(0)), self.mean.len(), "通道数不符");
        for ((mut ch, &m), &s) in patch
            .axis_iter_mut(Axis(0))
            .zip(self.mean.iter())
            .zip(self.std.iter())
        {
            let s = if s > 0.0 { s } else { 1.0 };
            ch.mapv_inplace(|v| ((v as f64 - m) / s) as f32);
        }
    }
}

/// 三维标签 (或前景掩码), 按 (X, Y, Z) 组织, 标签值以 `u8` 保存.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVolume {
    data: Array3<u8>,
}

impl Index<Idx3d> for LabelVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl From<Array3<u8>> for LabelVolume {
    #[inline]
    fn from(data: Array3<u8>) -> Self {
        Self::new(data)
    }
}

impl LabelVolume {
    /// 直接以 (X, Y, Z) 数据创建.
    #[inline]
    pub fn new(data: Array3<u8>) -> Self {
        Self { data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// 形状 (X, Y, Z).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 升序返回出现过的所有标签值.
    pub fn unique_labels(&self) -> Vec<u8> {
        let mut seen = [false; 256];
        self.data.iter().for_each(|&p| seen[p as usize] = true);
        (0..=u8::MAX).filter(|&l| seen[l as usize]).collect()
    }

    /// 收集满足谓词 `pred` 的所有体素对应的下标, 结果按行优先存储.
    pub fn filter_pos<P: Fn(u8) -> bool>(&self, pred: P) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, &v)| pred(v).then_some(pos))
            .collect()
    }

    /// 收集所有值为 `label` 的体素下标, 结果按行优先存储.
    #[inline]
    pub fn label_pos(&self, label: u8) -> Vec<Idx3d> {
        self.filter_pos(|p| p == label)
    }

    /// 该位置是否为前景 (非背景). 越界时 panic.
    #[inline]
    pub fn is_foreground(&self, pos: Idx3d) -> bool {
        self[pos] != BACKGROUND
    }
}
