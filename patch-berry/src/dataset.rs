//! 按需提取 patch 的数据集.
//!
//! [`PatchSet`] 在构建时一次性生成所有指令, 之后 `get` 只读共享的图像数据和
//! 指令本身, 因此可以在多个线程中对不同 (或相同) 的下标并发调用, 不需要任何锁,
//! 也不做缓存.

use std::sync::Arc;

use either::Either;
use ndarray::{Array4, Array5, Axis};
use num::Float;

use crate::augment::Augment;
use crate::instruction::{build_instructions, Normalization, PatchInstruction};
use crate::sampling::{check_patch_shape, Sampling};
use crate::{Center, PatchError, PatchResult, PatchShape, Volume};

/// patch 数据集. 下标顺序为图像优先, 图像内按中心顺序.
#[derive(Debug, Clone)]
pub struct PatchSet {
    images: Vec<Volume>,
    shape: PatchShape,
    instructions: Vec<PatchInstruction>,
}

impl PatchSet {
    /// 构建数据集.
    ///
    /// `source` 为 `Left(sampling)` 时由采样策略生成中心;
    /// 为 `Right(centers)` 时直接使用给定中心 (必须与 `images` 一一对应), 完全忽略采样.
    ///
    /// 所有图像的通道数必须一致, 否则返回 `Err`.
    pub fn new(
        images: Vec<Volume>,
        shape: PatchShape,
        source: Either<Sampling, Vec<Vec<Center>>>,
        normalization: Normalization,
    ) -> PatchResult<Self> {
        check_patch_shape(shape)?;
        if let Some(first) = images.first() {
            let expected = first.channels();
            if let Some((image, img)) = images
                .iter()
                .enumerate()
                .find(|(_, img)| img.channels() != expected)
            {
                return Err(PatchError::ChannelMismatch {
                    image,
                    expected,
                    found: img.channels(),
                });
            }
        }

        let centers = match source {
            Either::Left(sampling) => sampling.sample_centers(&images, shape)?,
            Either::Right(centers) => centers,
        };
        let instructions = build_instructions(&images, &centers, shape, normalization, None)?;
        log::info!("created PatchSet with {} patches", instructions.len());

        Ok(Self {
            images,
            shape,
            instructions,
        })
    }

    /// 为所有 patch 附加增强操作. 已有的增强会被替换.
    pub fn with_augment(mut self, augment: Arc<dyn Augment>) -> Self {
        self.instructions = self
            .instructions
            .into_iter()
            .map(|ins| ins.with_augment(Some(Arc::clone(&augment))))
            .collect();
        self
    }

    /// patch 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// 是否不含任何 patch.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// patch 形状.
    #[inline]
    pub fn patch_shape(&self) -> PatchShape {
        self.shape
    }

    /// 每个 patch 的通道数. 数据集不含图像时为 0.
    #[inline]
    pub fn channels(&self) -> usize {
        self.images.first().map_or(0, Volume::channels)
    }

    /// 源图像.
    #[inline]
    pub fn images(&self) -> &[Volume] {
        &self.images
    }

    /// 全部指令.
    #[inline]
    pub fn instructions(&self) -> &[PatchInstruction] {
        &self.instructions
    }

    /// 获取第 `index` 个 patch, 形状为 (C, x, y, z).
    ///
    /// # 注意
    ///
    /// `index` 越界或指令中心会导致越界提取时, 程序 panic.
    /// 需要错误值时使用 [`PatchSet::try_get`].
    pub fn get<T: Float>(&self, index: usize) -> Array4<T> {
        match self.try_get(index) {
            Ok(patch) => patch,
            Err(e) => panic!("无法提取第 {index} 个 patch: {e}"),
        }
    }

    /// 与 [`PatchSet::get`] 相同, 但以 `Err` 代替 panic.
    pub fn try_get<T: Float>(&self, index: usize) -> PatchResult<Array4<T>> {
        let ins = self
            .instructions
            .get(index)
            .ok_or(PatchError::IndexOutOfRange(index, self.len()))?;
        let patch = ins.materialize(&self.images)?;
        Ok(patch.mapv(|v| num::cast::<f32, T>(v).unwrap_or_else(T::nan)))
    }

    /// 将 `indices` 对应的 patch 堆叠为 (N, C, x, y, z) 批次.
    pub fn get_batch(&self, indices: &[usize]) -> Array5<f32> {
        let mut out = self.alloc_batch(indices.len());
        for (mut slot, &i) in out.axis_iter_mut(Axis(0)).zip(indices) {
            slot.assign(&self.get::<f32>(i));
        }
        out
    }

    /// 按下标顺序每 `batch_size` 个 patch 组成一个批次, 最后一批可能不足.
    ///
    /// `batch_size` 为 0 时程序 panic.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Array5<f32>> + '_ {
        assert!(batch_size > 0, "batch_size 必须为正");
        (0..self.len()).step_by(batch_size).map(move |start| {
            let indices: Vec<usize> = (start..(start + batch_size).min(self.len())).collect();
            self.get_batch(&indices)
        })
    }

    #[inline]
    fn alloc_batch(&self, n: usize) -> Array5<f32> {
        let (x, y, z) = self.shape;
        Array5::zeros((n, self.channels(), x, y, z))
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        impl PatchSet {
            /// [`PatchSet::get_batch`] 的多线程版本, 结果完全一致.
            pub fn par_get_batch(&self, indices: &[usize]) -> Array5<f32> {
                let mut out = self.alloc_batch(indices.len());
                out.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .zip(indices.par_iter())
                    .for_each(|(mut slot, &i)| slot.assign(&self.get::<f32>(i)));
                out
            }
        }
    }
}
