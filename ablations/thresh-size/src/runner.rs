//! 程序运行函数.

use crate::profile::Profile;
use crate::result::AblationResult;
use patch_berry::fold::ArtifactPaths;
use patch_berry::prelude::*;
use std::collections::HashMap;
use utils::loader;

/// 默认搜索网格, 阈值在外、尺寸在内.
const THRESHOLDS: [f32; 5] = [0.3, 0.4, 0.5, 0.6, 0.7];
const LESION_SIZES: [f64; 4] = [1.0, 3.0, 10.0, 30.0];

/// 实际运行.
pub fn run() -> AblationResult {
    let label_dir = loader::label_dir_from_env_or_home().expect("Cannot locate label directory");
    let results_dir =
        loader::results_dir_from_env_or_home().expect("Cannot locate results directory");
    assert!(label_dir.is_dir(), "{} is not a directory", label_dir.display());
    assert!(results_dir.is_dir(), "{} is not a directory", results_dir.display());

    let samples = loader::label_loader(&label_dir)
        .expect("Loading dataset config error")
        .ground_truths();
    let paths = ArtifactPaths::new("", "", &results_dir);

    // 缺少概率图的样本不放入映射, 由搜索自行跳过.
    let results: HashMap<String, _> = samples
        .iter()
        .filter_map(|s| match load_probs(paths.probs(s.id())) {
            Ok(p) => Some((s.id().to_string(), p)),
            Err(e) => {
                log::warn!("no probabilities for `{}`: {e}", s.id());
                None
            }
        })
        .collect();
    log::info!(
        "{} ground truths, {} probability volumes, {} cpus",
        samples.len(),
        results.len(),
        utils::cpus()
    );

    let grid = SearchGrid::new(THRESHOLDS.to_vec(), LESION_SIZES.to_vec())
        .expect("Invalid search grid")
        .with_lesion_metrics(true);
    let metrics = OverlapMetrics::default();

    println!("Running ablation studies...");
    let run_one = |strategy: Strategy| {
        let profile = Profile::start(results.len(), grid.len());
        let res = thresh_size_search(&results, &samples, &grid, &metrics, &LogProgress, strategy);
        (profile.finish(), res)
    };

    // 两种策略依次运行, 都独占 rayon 线程池.
    let naive = run_one(Strategy::Naive);
    let optimized = run_one(Strategy::Optimized);

    AblationResult::new([("naive", naive), ("optimized", optimized)])
}
