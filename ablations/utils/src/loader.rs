//! 对 `patch-berry::io` 的更一层封装. 提供更直接的样本加载器.

use patch_berry::binarize::GroundTruth;
use patch_berry::{io, IoError, LabelVolume};
use std::env;
use std::path::{Path, PathBuf};

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 1. 若环境变量 `var` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/{fallback}`.
fn dir_from_env_or_home(var: &str, fallback: &[&str]) -> Option<PathBuf> {
    match env::var(var) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(fallback),
    }
}

/// 获取真值标签目录.
///
/// 1. 若环境变量 `$PATCH_BERRY_LABEL_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/train/label`.
#[inline]
pub fn label_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("PATCH_BERRY_LABEL_DIR", &["train", "label"])
}

/// 获取概率图结果目录.
///
/// 1. 若环境变量 `$PATCH_BERRY_RESULTS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/results`.
#[inline]
pub fn results_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("PATCH_BERRY_RESULTS_DIR", &["results"])
}

/// 去掉 `.nii` 或 `.nii.gz` 后缀得到样本 id. 其他文件返回 `None`.
fn sample_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))?;
    Some(id.to_string())
}

/// 真值标签加载器. 按文件名顺序迭代目录下所有 nifti 文件, 文件名 (去掉后缀) 即样本 id.
#[derive(Debug)]
pub struct LabelLoader {
    data_rev: Vec<(String, PathBuf)>,
}

/// 创建 `path` 目录下的真值标签加载器.
///
/// 读取目录失败时返回 `Err`. 单个文件打开失败时, 加载器在迭代时返回 `Result::Err`.
pub fn label_loader<P: AsRef<Path>>(path: P) -> std::io::Result<LabelLoader> {
    let mut data: Vec<(String, PathBuf)> = std::fs::read_dir(path.as_ref())?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter_map(|p| sample_id(&p).map(|id| (id, p)))
        .collect();
    data.sort_unstable();
    data.reverse();
    Ok(LabelLoader { data_rev: data })
}

impl Iterator for LabelLoader {
    type Item = (String, Result<LabelVolume, IoError>);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, path) = self.data_rev.pop()?;
        log::debug!("loading ground truth `{id}`");
        Some((id, io::open_label(path)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data_rev.len(), Some(self.data_rev.len()))
    }
}

impl ExactSizeIterator for LabelLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}

impl LabelLoader {
    /// 加载全部样本, 打开失败的样本以 `log::warn!` 记录后跳过.
    pub fn ground_truths(self) -> Vec<GroundTruth> {
        self.filter_map(|(id, r)| match r {
            Ok(label) => Some(GroundTruth { id, label }),
            Err(e) => {
                log::warn!("skip ground truth `{id}`: {e}");
                None
            }
        })
        .collect()
    }
}
