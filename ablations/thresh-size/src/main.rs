//! 比较阈值 × 最小病灶尺寸搜索的两种策略: 运行时间与结果一致性.
//!
//! 真值目录由 `$PATCH_BERRY_LABEL_DIR` 指定, 概率图目录由 `$PATCH_BERRY_RESULTS_DIR` 指定,
//! 未设置时分别使用 `$HOME/dataset/train/label` 与 `$HOME/dataset/results`.

mod profile;
mod result;
mod runner;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("Logger initialization error");

    let res = runner::run();
    res.analyze();
    assert!(res.consistent(), "Search strategies disagree");
}
