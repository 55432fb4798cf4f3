//! 交叉验证折划分、训练器接口以及训练产物路径.

use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView3};

use crate::consts::{CHECKPOINT_EXT, LOG_EXT, PROBS_EXT};
use crate::dataset::PatchSet;
use crate::{io, IoError, Volume};

/// 第 `fold` 折 (共 `folds` 折) 的验证集下标区间 `[fold*n/folds, (fold+1)*n/folds)`.
///
/// 所有折的验证区间恰好覆盖 `0..n` 且互不相交.
///
/// # 注意
///
/// `fold >= folds` 时程序 panic.
pub fn crossval_indexes(n: usize, fold: usize, folds: usize) -> Range<usize> {
    assert!(fold < folds, "fold {fold} out of {folds} folds");
    fold * n / folds..(fold + 1) * n / folds
}

/// 按比例 `split_ratio` 划分验证集: 验证集为末尾的 `round(n * split_ratio)` 个样本.
///
/// `split_ratio` 会被截断到 `[0, 1]`.
pub fn val_split_indexes(n: usize, split_ratio: f64) -> Range<usize> {
    let val = (n as f64 * split_ratio.clamp(0.0, 1.0)).round() as usize;
    n - val.min(n)..n
}

/// 把 `items` 拆分为 (训练集, 验证集), 验证集为 `val` 区间内的元素.
pub fn split_fold<T: Clone>(items: &[T], val: Range<usize>) -> (Vec<T>, Vec<T>) {
    let train = items[..val.start]
        .iter()
        .chain(&items[val.end..])
        .cloned()
        .collect();
    (train, items[val].to_vec())
}

/// 训练产物路径.
///
/// - checkpoint: `<base>_<start>_to_<stop>.pt`
/// - 训练日志: `<base>_<start>_to_<stop>.csv`
/// - 概率图: `<results_dir>/<id>_probs.npy`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    checkpoint_base: PathBuf,
    log_base: PathBuf,
    results_dir: PathBuf,
}

/// 如果 `path` 以 `.{ext}` 结尾, 则去掉该后缀.
fn strip_ext(path: &Path, ext: &str) -> PathBuf {
    match path.extension() {
        Some(e) if e == ext => path.with_extension(""),
        _ => path.to_owned(),
    }
}

/// 在 `base` 的文件名后追加 `suffix`.
fn append(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl ArtifactPaths {
    /// 创建. `checkpoint` 与 `log` 已有的 `.pt` / `.csv` 后缀会被去掉.
    pub fn new(
        checkpoint: impl AsRef<Path>,
        log: impl AsRef<Path>,
        results_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            checkpoint_base: strip_ext(checkpoint.as_ref(), CHECKPOINT_EXT),
            log_base: strip_ext(log.as_ref(), LOG_EXT),
            results_dir: results_dir.as_ref().to_owned(),
        }
    }

    /// 验证区间 `val` 对应的 checkpoint 路径.
    #[inline]
    pub fn checkpoint(&self, val: &Range<usize>) -> PathBuf {
        append(
            &self.checkpoint_base,
            &format!("_{}_to_{}.{CHECKPOINT_EXT}", val.start, val.end),
        )
    }

    /// 验证区间 `val` 对应的训练日志路径.
    #[inline]
    pub fn log(&self, val: &Range<usize>) -> PathBuf {
        append(
            &self.log_base,
            &format!("_{}_to_{}.{LOG_EXT}", val.start, val.end),
        )
    }

    /// 样本 `id` 的概率图路径.
    #[inline]
    pub fn probs(&self, id: &str) -> PathBuf {
        self.results_dir.join(format!("{id}_probs.{PROBS_EXT}"))
    }

    /// 结果目录.
    #[inline]
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }
}

/// 训练器. 训练循环、早停和 checkpoint 策略均由实现方负责,
/// 批大小也由实现方决定, 数据集只提供长度和按下标访问.
pub trait Trainer<M> {
    /// 训练失败时的错误.
    type Error;

    /// 在 `train` 上训练 `model`, 以 `val` 验证, 产物写入 `checkpoint` 与 `log`.
    fn train(
        &mut self,
        model: &mut M,
        train: &PatchSet,
        val: &PatchSet,
        checkpoint: &Path,
        log: &Path,
    ) -> Result<(), Self::Error>;
}

/// 概率预测器. 输出与输入图像空间形状相同的前景概率图.
pub trait Predictor<M> {
    /// 预测单个图像.
    fn predict(&self, model: &M, image: &Volume) -> Array3<f32>;
}

/// 以验证区间 `val` 推导产物路径, 并调用 `trainer` 训练一折.
///
/// 返回 (checkpoint 路径, 日志路径).
pub fn train_fold<M, T: Trainer<M>>(
    trainer: &mut T,
    model: &mut M,
    train: &PatchSet,
    val_set: &PatchSet,
    paths: &ArtifactPaths,
    val: Range<usize>,
) -> Result<(PathBuf, PathBuf), T::Error> {
    let checkpoint = paths.checkpoint(&val);
    let log = paths.log(&val);
    log::info!(
        "running fold: val images {} to {}, {} training and {} validation patches",
        val.start,
        val.end,
        train.len(),
        val_set.len()
    );
    trainer.train(model, train, val_set, &checkpoint, &log)?;
    Ok((checkpoint, log))
}

/// 对 `(id, 图像)` 逐个预测, 并把概率图保存到 [`ArtifactPaths::probs`].
pub fn predict_and_save<'a, M, P, I>(
    predictor: &P,
    model: &M,
    samples: I,
    paths: &ArtifactPaths,
) -> Result<usize, IoError>
where
    P: Predictor<M>,
    I: IntoIterator<Item = (&'a str, &'a Volume)>,
{
    let mut n = 0;
    for (id, image) in samples {
        let probs = predictor.predict(model, image);
        save(paths, id, probs.view())?;
        n += 1;
    }
    Ok(n)
}

#[inline]
fn save(paths: &ArtifactPaths, id: &str, probs: ArrayView3<f32>) -> Result<(), IoError> {
    let path = paths.probs(id);
    log::debug!("saving probabilities to {}", path.display());
    io::save_probs(path, probs)
}
