//! 体数据读写.
//!
//! 图像与标签使用 nifti 格式, 每个通道一个文件; 概率图以 `.npy` 格式保存.

use std::ops::{Add, Mul};
use std::path::Path;

use ndarray::{Array3, ArrayD, ArrayView3, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::{IoError, LabelVolume, PatchError, Volume};

/// 读取 nifti 文件中的三维数据, 结果为 (X, Y, Z) 标准布局.
fn read_nifti3<T>(path: &Path) -> Result<Array3<T>, IoError>
where
    T: nifti::DataElement + Clone + Mul<Output = T> + Add<Output = T>,
{
    let obj = ReaderOptions::new().read_file(path)?;
    let data: ArrayD<T> = obj.into_volume().into_ndarray::<T>()?;
    let ndim = data.ndim();
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| PatchError::RankMismatch(3, ndim))?;

    // nifti 数据按列优先存储, 这里转换为行优先.
    Ok(data.as_standard_layout().into_owned())
}

/// 打开多通道图像, `channels` 中每个路径对应一个通道.
///
/// 各通道空间形状必须一致, 否则返回 `Err`.
pub fn open_volume<P: AsRef<Path>>(channels: &[P]) -> Result<Volume, IoError> {
    let data = channels
        .iter()
        .map(|p| read_nifti3::<f32>(p.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(first) = data.first() else {
        return Err(PatchError::LenMismatch {
            what: "channels",
            expected: 1,
            found: 0,
        }
        .into());
    };
    if let Some((c, ch)) = data.iter().enumerate().find(|(_, ch)| ch.dim() != first.dim()) {
        return Err(PatchError::ShapeMismatch {
            image: c,
            volume: first.dim(),
            label: ch.dim(),
        }
        .into());
    }

    let views: Vec<ArrayView3<f32>> = data.iter().map(|ch| ch.view()).collect();
    // 形状已检查, 这里只可能因为 `views` 为空而失败
    Volume::from_channels(&views).ok_or_else(|| {
        PatchError::LenMismatch {
            what: "channels",
            expected: 1,
            found: 0,
        }
        .into()
    })
}

/// 打开三维标签.
#[inline]
pub fn open_label<P: AsRef<Path>>(path: P) -> Result<LabelVolume, IoError> {
    read_nifti3::<u8>(path.as_ref()).map(LabelVolume::new)
}

/// 把概率图保存为 `.npy` 文件. 父目录不存在时会被创建.
pub fn save_probs<P: AsRef<Path>>(path: P, probs: ArrayView3<f32>) -> Result<(), IoError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    ndarray_npy::write_npy(path, &probs)?;
    Ok(())
}

/// 读取 `.npy` 格式的概率图.
#[inline]
pub fn load_probs<P: AsRef<Path>>(path: P) -> Result<Array3<f32>, IoError> {
    Ok(ndarray_npy::read_npy(path.as_ref())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;
    use tempfile::tempdir;

    #[test]
    fn test_probs_round_trip() {
        let probs = Array::from_shape_fn((3, 4, 5), |(x, y, z)| (x * 20 + y * 5 + z) as f32 / 60.0);
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("case_7_probs.npy");
        save_probs(&path, probs.view()).unwrap();
        assert_eq!(load_probs(&path).unwrap(), probs);
    }

    #[test]
    fn test_load_missing() {
        assert!(matches!(
            load_probs(tempdir().unwrap().path().join("missing_probs.npy")),
            Err(IoError::ReadNpy(_))
        ));
    }

    #[test]
    fn test_nifti_volume_and_label() {
        use nifti::writer::WriterOptions;

        let a = Array::from_shape_fn((4, 3, 2), |(x, y, z)| (x * 100 + y * 10 + z) as f32);
        let b = a.mapv(|v| -v);
        let l = Array::from_shape_fn((4, 3, 2), |(x, _, _)| x as u8);
        let dir = tempdir().unwrap();
        let (pa, pb, pl) = (
            dir.path().join("a.nii"),
            dir.path().join("b.nii"),
            dir.path().join("l.nii"),
        );
        WriterOptions::new(&pa).write_nifti(&a).unwrap();
        WriterOptions::new(&pb).write_nifti(&b).unwrap();
        WriterOptions::new(&pl).write_nifti(&l).unwrap();

        let v = open_volume(&[&pa, &pb]).unwrap();
        assert_eq!(v.channels(), 2);
        assert_eq!(v.spatial_shape(), (4, 3, 2));
        assert_eq!(v[(0, 3, 2, 1)], 321.0);
        assert_eq!(v[(1, 3, 2, 1)], -321.0);

        let label = open_label(&pl).unwrap();
        assert_eq!(label.shape(), (4, 3, 2));
        assert_eq!(label.unique_labels(), vec![0, 1, 2, 3]);

        assert!(open_volume::<&Path>(&[]).is_err());
    }
}
