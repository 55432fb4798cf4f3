//! 分割指标.
//!
//! 指标的具体定义由外部实现 [`SegmentationMetrics`] 提供, 本模块只规定接口,
//! 并附带一个基于重叠率的参考实现 [`OverlapMetrics`].

use std::collections::BTreeMap;

use ndarray::{ArrayView3, Zip};

use crate::binarize::{label_components, Connectivity};
use crate::MetricsError;

/// 单个样本的指标记录, 指标名 -> 数值.
pub type MetricsRecord = BTreeMap<String, f64>;

/// 分割指标计算器.
///
/// 真值与预测均按 (X, Y, Z) 组织, 非 0 体素视为前景.
pub trait SegmentationMetrics: Sync {
    /// 计算单个样本的指标. `lesion_metrics` 为 `true` 时额外计算病灶级指标.
    fn compute(
        &self,
        truth: ArrayView3<u8>,
        pred: ArrayView3<u8>,
        lesion_metrics: bool,
    ) -> Result<MetricsRecord, MetricsError>;

    /// 汇总多个样本的指标.
    #[inline]
    fn avg_std(&self, records: &[MetricsRecord]) -> AvgStdMetrics {
        AvgStdMetrics::from_records(records)
    }
}

/// 一组样本指标的均值与 (总体) 标准差.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AvgStdMetrics {
    values: BTreeMap<String, (f64, f64)>,
    count: usize,
}

impl AvgStdMetrics {
    /// 逐指标统计. 某个记录缺少某项指标时, 该项只统计出现过的记录.
    pub fn from_records(records: &[MetricsRecord]) -> Self {
        let mut columns: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for r in records {
            for (k, &v) in r {
                columns.entry(k.as_str()).or_default().push(v);
            }
        }
        let values = columns
            .into_iter()
            .map(|(k, col)| {
                let n = col.len() as f64;
                let mean = col.iter().sum::<f64>() / n;
                let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (k.to_string(), (mean, var.sqrt()))
            })
            .collect();
        Self {
            values,
            count: records.len(),
        }
    }

    /// 参与统计的样本数.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// 指标 `name` 的均值.
    #[inline]
    pub fn mean(&self, name: &str) -> Option<f64> {
        self.values.get(name).map(|&(m, _)| m)
    }

    /// 指标 `name` 的标准差.
    #[inline]
    pub fn std(&self, name: &str) -> Option<f64> {
        self.values.get(name).map(|&(_, s)| s)
    }

    /// 按指标名升序迭代 `(名称, 均值, 标准差)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64, f64)> + '_ {
        self.values.iter().map(|(k, &(m, s))| (k.as_str(), m, s))
    }
}

/// 基于体素重叠的参考指标实现.
///
/// 体素级: `dsc`, `ppv`, `tpr`, `true_vol`, `pred_vol`.
/// 病灶级: `true_lesions`, `pred_lesions`, `lesion_tpr`, `lesion_ppv`,
/// 病灶为连通域, 与对方前景有任一体素重叠即视为命中.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapMetrics {
    /// 计算病灶级指标时使用的连通性.
    pub connectivity: Connectivity,
}

/// 分母为 0 时: 分子也为 0 则视为完全一致.
#[inline]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        if num == 0 {
            1.0
        } else {
            0.0
        }
    } else {
        num as f64 / den as f64
    }
}

impl OverlapMetrics {
    /// `a` 的连通域中与 `b` 的前景有重叠的个数, 以及连通域总数.
    fn lesion_hits(&self, a: ArrayView3<u8>, b: ArrayView3<u8>) -> (usize, usize) {
        let (labels, n) = label_components(a.mapv(|v| v != 0).view(), self.connectivity);
        let mut hit = vec![false; n + 1];
        Zip::from(&labels).and(b).for_each(|&l, &p| {
            if l != 0 && p != 0 {
                hit[l as usize] = true;
            }
        });
        (hit.iter().filter(|&&h| h).count(), n)
    }
}

impl SegmentationMetrics for OverlapMetrics {
    fn compute(
        &self,
        truth: ArrayView3<u8>,
        pred: ArrayView3<u8>,
        lesion_metrics: bool,
    ) -> Result<MetricsRecord, MetricsError> {
        if truth.dim() != pred.dim() {
            return Err(MetricsError::ShapeMismatch(truth.dim(), pred.dim()));
        }

        let (mut tp, mut t, mut p) = (0usize, 0usize, 0usize);
        Zip::from(truth).and(pred).for_each(|&a, &b| {
            let (a, b) = (a != 0, b != 0);
            t += a as usize;
            p += b as usize;
            tp += (a && b) as usize;
        });

        let mut ans = MetricsRecord::new();
        ans.insert("dsc".to_string(), ratio(2 * tp, t + p));
        ans.insert("ppv".to_string(), ratio(tp, p));
        ans.insert("tpr".to_string(), ratio(tp, t));
        ans.insert("true_vol".to_string(), t as f64);
        ans.insert("pred_vol".to_string(), p as f64);

        if lesion_metrics {
            let (detected, n_true) = self.lesion_hits(truth, pred);
            let (correct, n_pred) = self.lesion_hits(pred, truth);
            ans.insert("true_lesions".to_string(), n_true as f64);
            ans.insert("pred_lesions".to_string(), n_pred as f64);
            ans.insert("lesion_tpr".to_string(), ratio(detected, n_true));
            ans.insert("lesion_ppv".to_string(), ratio(correct, n_pred));
        }
        Ok(ans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn test_overlap_metrics() {
        let mut truth = Array3::<u8>::zeros((4, 4, 4));
        let mut pred = Array3::<u8>::zeros((4, 4, 4));
        truth[(0, 0, 0)] = 1;
        truth[(0, 0, 1)] = 1;
        truth[(3, 3, 3)] = 1;
        pred[(0, 0, 1)] = 1;
        pred[(2, 0, 0)] = 1;

        let m = OverlapMetrics::default()
            .compute(truth.view(), pred.view(), true)
            .unwrap();
        assert!(f64_eq(m["dsc"], 2.0 / 5.0));
        assert!(f64_eq(m["ppv"], 0.5));
        assert!(f64_eq(m["tpr"], 1.0 / 3.0));
        assert_eq!(m["true_lesions"], 2.0);
        assert_eq!(m["pred_lesions"], 2.0);
        assert!(f64_eq(m["lesion_tpr"], 0.5));
        assert!(f64_eq(m["lesion_ppv"], 0.5));

        let m = OverlapMetrics::default()
            .compute(truth.view(), pred.view(), false)
            .unwrap();
        assert!(!m.contains_key("lesion_tpr"));
    }

    #[test]
    fn test_empty_prediction() {
        let z = Array3::<u8>::zeros((2, 2, 2));
        let m = OverlapMetrics::default()
            .compute(z.view(), z.view(), true)
            .unwrap();
        assert_eq!(m["dsc"], 1.0);
        assert_eq!(m["lesion_tpr"], 1.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Array3::<u8>::zeros((2, 2, 2));
        let b = Array3::<u8>::zeros((2, 2, 3));
        assert_eq!(
            OverlapMetrics::default().compute(a.view(), b.view(), false),
            Err(MetricsError::ShapeMismatch((2, 2, 2), (2, 2, 3)))
        );
    }

    #[test]
    fn test_avg_std() {
        let rec = |d: f64| MetricsRecord::from([("dsc".to_string(), d)]);
        let agg = OverlapMetrics::default().avg_std(&[rec(0.2), rec(0.4), rec(0.6)]);
        assert_eq!(agg.count(), 3);
        assert!(f64_eq(agg.mean("dsc").unwrap(), 0.4));
        assert!(f64_eq(agg.std("dsc").unwrap(), (0.08f64 / 3.0).sqrt()));
        assert_eq!(agg.mean("ppv"), None);
        assert_eq!(AvgStdMetrics::from_records(&[]).count(), 0);
    }
}
