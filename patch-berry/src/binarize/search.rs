//! 阈值 × 最小病灶尺寸网格搜索.
//!
//! 网格按阈值在外、病灶尺寸在内的顺序展开, 每个格子对应标签 `th={t}_ls={s}`.
//! 两种策略对相同输入给出逐位相同的结果:
//!
//! 1. [`Strategy::Naive`]: 每个格子都重新二值化并标记连通域;
//! 2. [`Strategy::Optimized`]: 每个阈值只标记一次连通域, 各病灶尺寸复用连通域质量.
//!
//! # 跳过策略
//!
//! 1. `results` 中没有的样本直接跳过, 不视为错误;
//! 2. 概率图与真值形状不一致, 或指标计算失败的样本, 以 `log::warn!` 记录后
//!   从所有格子中剔除, 不会中断整个搜索.

use std::collections::HashMap;

use ndarray::{Array3, ArrayView3};
use ordered_float::OrderedFloat;

use super::{component_masses, filter_components, label_components};
use super::{Connectivity, LesionMass, ThreshSizeBinarizer};
use crate::metrics::{AvgStdMetrics, MetricsRecord, SegmentationMetrics};
use crate::progress::{Progress, Ticker};
use crate::{LabelVolume, PatchError, PatchResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 带真值的样本.
pub trait LabeledSample: Sync {
    /// 样本 id, 与概率图映射的键对应.
    fn id(&self) -> &str;

    /// 真值标签, 非 0 为前景.
    fn ground_truth(&self) -> ArrayView3<'_, u8>;
}

/// 最简单的带真值样本.
#[derive(Debug, Clone)]
pub struct GroundTruth {
    /// 样本 id.
    pub id: String,

    /// 真值标签.
    pub label: LabelVolume,
}

impl LabeledSample for GroundTruth {
    #[inline]
    fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    fn ground_truth(&self) -> ArrayView3<'_, u8> {
        self.label.data()
    }
}

/// 搜索策略.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Strategy {
    /// 逐格子重新计算.
    Naive,

    /// 每个阈值只标记一次连通域.
    #[default]
    Optimized,
}

/// 搜索网格及二值化设置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchGrid {
    thresholds: Vec<f32>,
    lesion_sizes: Vec<f64>,
    connectivity: Connectivity,
    mass: LesionMass,
    lesion_metrics: bool,
}

impl SearchGrid {
    /// 创建网格. 任一参数不是有限值时返回 `Err`.
    pub fn new(thresholds: Vec<f32>, lesion_sizes: Vec<f64>) -> PatchResult<Self> {
        if let Some(&t) = thresholds.iter().find(|t| !t.is_finite()) {
            return Err(PatchError::NonFinite {
                what: "threshold",
                value: t as f64,
            });
        }
        if let Some(&s) = lesion_sizes.iter().find(|s| !s.is_finite()) {
            return Err(PatchError::NonFinite {
                what: "lesion size",
                value: s,
            });
        }
        Ok(Self {
            thresholds,
            lesion_sizes,
            connectivity: Connectivity::default(),
            mass: LesionMass::default(),
            lesion_metrics: false,
        })
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

    /// 是否要求指标实现计算病灶级指标.
    #[inline]
    pub fn with_lesion_metrics(mut self, lesion_metrics: bool) -> Self {
        self.lesion_metrics = lesion_metrics;
        self
    }

    /// 阈值.
    #[inline]
    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    /// 最小病灶尺寸.
    #[inline]
    pub fn lesion_sizes(&self) -> &[f64] {
        &self.lesion_sizes
    }

    /// 格子个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.thresholds.len() * self.lesion_sizes.len()
    }

    /// 网格是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按阈值在外、尺寸在内的顺序迭代所有格子.
    pub fn cells(&self) -> impl Iterator<Item = (f32, f64)> + '_ {
        itertools::iproduct!(
            self.thresholds.iter().copied(),
            self.lesion_sizes.iter().copied()
        )
    }

    /// 格子标签.
    #[inline]
    pub fn cell_label(threshold: f32, lesion_size: f64) -> String {
        format!("th={threshold}_ls={lesion_size}")
    }

    #[inline]
    fn binarizer(&self, threshold: f32, lesion_size: f64) -> ThreshSizeBinarizer {
        ThreshSizeBinarizer::new(threshold, lesion_size)
            .with_connectivity(self.connectivity)
            .with_mass(self.mass)
    }
}

/// 搜索结果. 每个格子一项 `(汇总指标, 标签)`, 顺序与 [`SearchGrid::cells`] 一致.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchResult {
    entries: Vec<(AvgStdMetrics, String)>,
}

impl SearchResult {
    /// 全部格子.
    #[inline]
    pub fn entries(&self) -> &[(AvgStdMetrics, String)] {
        &self.entries
    }

    /// 格子个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 拆分为 (指标列表, 标签列表).
    pub fn into_lists(self) -> (Vec<AvgStdMetrics>, Vec<String>) {
        self.entries.into_iter().unzip()
    }

    /// 按指标 `metric` 的均值降序排列. 均值相同的格子保持网格顺序,
    /// 缺少该指标或均值为 NaN 的格子排在最后.
    pub fn ranked(&self, metric: &str) -> Vec<&(AvgStdMetrics, String)> {
        let mut ans: Vec<_> = self.entries.iter().collect();
        ans.sort_by_key(|(m, _)| {
            let mean = m.mean(metric).filter(|v| !v.is_nan());
            std::cmp::Reverse(OrderedFloat(mean.unwrap_or(f64::NEG_INFINITY)))
        });
        ans
    }

    /// 指标 `metric` 均值最大的格子.
    #[inline]
    pub fn best(&self, metric: &str) -> Option<&(AvgStdMetrics, String)> {
        self.ranked(metric).into_iter().next()
    }
}

/// 对所有格子计算汇总指标.
///
/// `results` 为样本 id 到概率图的映射. 只有 id 出现在 `results` 中的样本参与计算.
/// 开启 `rayon` feature 时各样本并行计算, 汇总始终按样本顺序进行.
pub fn thresh_size_search<S, M, P>(
    results: &HashMap<String, Array3<f32>>,
    samples: &[S],
    grid: &SearchGrid,
    metrics: &M,
    progress: &P,
    strategy: Strategy,
) -> SearchResult
where
    S: LabeledSample,
    M: SegmentationMetrics + ?Sized,
    P: Progress + ?Sized,
{
    let present: Vec<(&S, &Array3<f32>)> = samples
        .iter()
        .filter_map(|s| results.get(s.id()).map(|probs| (s, probs)))
        .collect();
    log::debug!(
        "evaluating {} of {} samples on {} grid cells ({strategy:?})",
        present.len(),
        samples.len(),
        grid.len()
    );

    let ticker = Ticker::new(progress, present.len(), " samples processed");
    let job = |&(sample, probs): &(&S, &Array3<f32>)| {
        let ans = evaluate_sample(sample, probs.view(), grid, metrics, strategy);
        ticker.tick();
        ans
    };

    #[cfg(feature = "rayon")]
    let per_sample: Vec<Option<Vec<MetricsRecord>>> = present.par_iter().map(job).collect();
    #[cfg(not(feature = "rayon"))]
    let per_sample: Vec<Option<Vec<MetricsRecord>>> = present.iter().map(job).collect();

    let evaluated: Vec<&Vec<MetricsRecord>> = per_sample.iter().flatten().collect();
    let entries = grid
        .cells()
        .enumerate()
        .map(|(k, (t, s))| {
            let records: Vec<MetricsRecord> = evaluated.iter().map(|r| r[k].clone()).collect();
            (metrics.avg_std(&records), SearchGrid::cell_label(t, s))
        })
        .collect();
    SearchResult { entries }
}

/// 计算单个样本在所有格子上的指标, 顺序与 [`SearchGrid::cells`] 一致.
/// 样本需要被跳过时返回 `None`.
fn evaluate_sample<S, M>(
    sample: &S,
    probs: ArrayView3<f32>,
    grid: &SearchGrid,
    metrics: &M,
    strategy: Strategy,
) -> Option<Vec<MetricsRecord>>
where
    S: LabeledSample,
    M: SegmentationMetrics + ?Sized,
{
    let truth = sample.ground_truth();
    if truth.dim() != probs.dim() {
        log::warn!(
            "skip sample `{}`: probability shape {:?} differs from ground truth {:?}",
            sample.id(),
            probs.dim(),
            truth.dim()
        );
        return None;
    }

    let score = |rec: Array3<u8>| match metrics.compute(truth, rec.view(), grid.lesion_metrics) {
        Ok(r) => Some(r),
        Err(e) => {
            log::warn!("skip sample `{}`: {e}", sample.id());
            None
        }
    };

    let mut ans = Vec::with_capacity(grid.len());
    match strategy {
        Strategy::Naive => {
            for (t, s) in grid.cells() {
                ans.push(score(grid.binarizer(t, s).binarize(probs))?);
            }
        }
        Strategy::Optimized => {
            for &t in grid.thresholds() {
                let fg = probs.mapv(|p| p > t);
                let (labels, n) = label_components(fg.view(), grid.connectivity);
                let masses = component_masses(labels.view(), n, probs, grid.mass);
                for &s in grid.lesion_sizes() {
                    let rec = if n == 0 {
                        Array3::zeros(probs.dim())
                    } else {
                        filter_components(labels.view(), &masses, s)
                    };
                    ans.push(score(rec)?);
                }
            }
        }
    }
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::OverlapMetrics;
    use crate::progress::NoProgress;
    use crate::MetricsError;
    use ndarray::s;

    /// 三个样本, 每个包含若干概率不同、大小不同的病灶.
    fn synthetic() -> (HashMap<String, Array3<f32>>, Vec<GroundTruth>) {
        let mut results = HashMap::new();
        let mut samples = vec![];
        for k in 0..3usize {
            let mut probs = Array3::<f32>::zeros((8, 8, 8));
            let mut truth = Array3::<u8>::zeros((8, 8, 8));

            probs.slice_mut(s![0..3, 0..3, 0..2]).fill(0.7 - 0.1 * k as f32);
            truth.slice_mut(s![0..3, 0..2, 0..2]).fill(1);

            probs[(6, 6, 6)] = 0.9;
            probs[(6, 6, 5)] = 0.45;
            probs.slice_mut(s![4..6, 0..1, 6..8]).fill(0.35);
            truth[(6, 6, 6)] = 1;
            truth[(7, 0, 0)] = 1;
            // 26 邻域下与 (6, 6, 6) 相连
            probs[(7, 7, 7)] = 0.5 + 0.1 * k as f32;

            results.insert(format!("s{k}"), probs);
            samples.push(GroundTruth {
                id: format!("s{k}"),
                label: LabelVolume::new(truth),
            });
        }
        (results, samples)
    }

    fn both(
        results: &HashMap<String, Array3<f32>>,
        samples: &[GroundTruth],
        grid: &SearchGrid,
    ) -> (SearchResult, SearchResult) {
        let m = OverlapMetrics::default();
        (
            thresh_size_search(results, samples, grid, &m, &NoProgress, Strategy::Naive),
            thresh_size_search(results, samples, grid, &m, &NoProgress, Strategy::Optimized),
        )
    }

    #[test]
    fn test_naive_equals_optimized() {
        let (results, samples) = synthetic();
        let grid = SearchGrid::new(vec![0.3, 0.6], vec![1.0, 3.0]).unwrap();
        let (naive, opt) = both(&results, &samples, &grid);
        assert_eq!(naive, opt);

        let names: Vec<&str> = opt.entries().iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["th=0.3_ls=1", "th=0.3_ls=3", "th=0.6_ls=1", "th=0.6_ls=3"]);
        assert!(opt.entries().iter().all(|(m, _)| m.count() == 3));
        // 阈值 0.6 时只有第一个样本的大病灶保留
        assert_ne!(opt.entries()[0].0, opt.entries()[2].0);
    }

    #[test]
    fn test_equivalence_other_settings() {
        let (results, samples) = synthetic();
        for (conn, mass) in [
            (Connectivity::TwentySix, LesionMass::ProbabilitySum),
            (Connectivity::Six, LesionMass::VoxelCount),
            (Connectivity::TwentySix, LesionMass::VoxelCount),
        ] {
            let grid = SearchGrid::new(vec![0.0, 0.4, 0.65, 0.95], vec![0.0, 1.0, 2.5, 10.0])
                .unwrap()
                .with_connectivity(conn)
                .with_mass(mass)
                .with_lesion_metrics(true);
            let (naive, opt) = both(&results, &samples, &grid);
            assert_eq!(naive, opt);
            assert_eq!(opt.len(), 16);
        }
    }

    #[test]
    fn test_missing_and_mismatched_samples_are_skipped() {
        let (mut results, mut samples) = synthetic();
        results.remove("s1");
        samples.push(GroundTruth {
            id: "bad".to_string(),
            label: LabelVolume::new(Array3::zeros((8, 8, 7))),
        });
        results.insert("bad".to_string(), Array3::zeros((8, 8, 8)));

        let grid = SearchGrid::new(vec![0.5], vec![1.0]).unwrap();
        let (naive, opt) = both(&results, &samples, &grid);
        assert_eq!(naive, opt);
        assert_eq!(opt.entries()[0].0.count(), 2);
    }

    #[test]
    fn test_failed_metrics_are_skipped() {
        struct FailOn(&'static str);
        impl SegmentationMetrics for FailOn {
            fn compute(
                &self,
                truth: ArrayView3<u8>,
                pred: ArrayView3<u8>,
                _: bool,
            ) -> Result<MetricsRecord, MetricsError> {
                let n = pred.iter().filter(|&&v| v != 0).count();
                if self.0 == "empty" && n == 0 {
                    return Err(MetricsError::Other("empty prediction".to_string()));
                }
                Ok(MetricsRecord::from([(
                    "n".to_string(),
                    (n + truth.len()) as f64,
                )]))
            }
        }

        let (results, samples) = synthetic();
        let grid = SearchGrid::new(vec![0.0, 0.99], vec![0.0]).unwrap();
        let m = FailOn("empty");
        let naive = thresh_size_search(&results, &samples, &grid, &m, &NoProgress, Strategy::Naive);
        let opt = thresh_size_search(&results, &samples, &grid, &m, &NoProgress, Strategy::Optimized);
        assert_eq!(naive, opt);
        // 阈值 0.99 时所有样本预测为空, 于是每个样本都被整体剔除
        assert!(opt.entries().iter().all(|(m, _)| m.count() == 0));
    }

    #[test]
    fn test_zero_components_grid() {
        let (results, samples) = synthetic();
        let grid = SearchGrid::new(vec![0.95], vec![0.0, 5.0]).unwrap();
        let (naive, opt) = both(&results, &samples, &grid);
        assert_eq!(naive, opt);
        for (m, _) in opt.entries() {
            assert_eq!(m.mean("pred_vol"), Some(0.0));
            assert_eq!(m.count(), 3);
        }
    }

    #[test]
    fn test_ranked() {
        let (results, samples) = synthetic();
        let grid = SearchGrid::new(vec![0.3, 0.6, 0.95], vec![0.0]).unwrap();
        let res = thresh_size_search(
            &results,
            &samples,
            &grid,
            &OverlapMetrics::default(),
            &NoProgress,
            Strategy::Optimized,
        );
        let ranked = res.ranked("dsc");
        assert_eq!(ranked.len(), 3);
        assert!(ranked
            .windows(2)
            .all(|w| w[0].0.mean("dsc").unwrap() >= w[1].0.mean("dsc").unwrap()));
        assert_eq!(res.best("dsc"), ranked.first().copied());
        assert_eq!(res.best("no_such_metric").map(|e| e.1.as_str()), Some("th=0.3_ls=0"));
    }

    #[test]
    fn test_ranked_nan_last() {
        let cell = |dsc: f64| {
            let r: MetricsRecord = [("dsc".to_string(), dsc)].into_iter().collect();
            AvgStdMetrics::from_records(&[r])
        };
        let res = SearchResult {
            entries: vec![
                (cell(f64::NAN), "nan".to_string()),
                (cell(0.2), "low".to_string()),
                (cell(0.8), "high".to_string()),
            ],
        };
        let labels: Vec<&str> = res.ranked("dsc").iter().map(|e| e.1.as_str()).collect();
        assert_eq!(labels, vec!["high", "low", "nan"]);
        assert_eq!(res.best("dsc").map(|e| e.1.as_str()), Some("high"));
    }

    #[test]
    fn test_into_lists() {
        let (results, samples) = synthetic();
        let grid = SearchGrid::new(vec![0.3, 0.6], vec![1.0, 10.0]).unwrap();
        let res = thresh_size_search(
            &results,
            &samples,
            &grid,
            &OverlapMetrics::default(),
            &NoProgress,
            Strategy::Naive,
        );
        let entries = res.entries().to_vec();
        let (metrics, labels) = res.into_lists();
        assert_eq!(
            labels,
            vec!["th=0.3_ls=1", "th=0.3_ls=10", "th=0.6_ls=1", "th=0.6_ls=10"]
        );
        assert_eq!(metrics.len(), labels.len());
        for ((m, l), (em, el)) in metrics.iter().zip(&labels).zip(&entries) {
            assert_eq!((m, l), (em, el));
        }
    }

    #[test]
    fn test_grid_validation() {
        assert!(matches!(
            SearchGrid::new(vec![f32::NAN], vec![1.0]),
            Err(PatchError::NonFinite { what: "threshold", .. })
        ));
        assert!(matches!(
            SearchGrid::new(vec![0.5], vec![f64::INFINITY]),
            Err(PatchError::NonFinite { what: "lesion size", .. })
        ));
        let g = SearchGrid::new(vec![], vec![1.0]).unwrap();
        assert!(g.is_empty());
        let (results, samples) = synthetic();
        let (naive, opt) = both(&results, &samples, &g);
        assert!(naive.is_empty() && opt.is_empty());
    }
}
