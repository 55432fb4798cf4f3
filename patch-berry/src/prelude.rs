//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Center, Idx3d, PatchShape};
pub use crate::{ChannelStats, LabelVolume, Volume};
pub use crate::{IoError, MetricsError, PatchError, PatchResult};

pub use crate::augment::{Augment, Flip, SpatialAxis};
pub use crate::dataset::PatchSet;
pub use crate::instruction::{build_instructions, span, Normalization, PatchInstruction};
pub use crate::sampling::{resample_to_count, BalancedSampling, Sampling, UniformSampling};

pub use crate::binarize::{
    label_components, thresh_size_search, Connectivity, GroundTruth, LabeledSample, LesionMass,
    SearchGrid, SearchResult, Strategy, ThreshSizeBinarizer,
};
pub use crate::metrics::{AvgStdMetrics, MetricsRecord, OverlapMetrics, SegmentationMetrics};
pub use crate::progress::{LogProgress, NoProgress, Progress};

pub use crate::fold::{crossval_indexes, train_fold, ArtifactPaths, Predictor, Trainer};
pub use crate::io::{load_probs, open_label, open_volume, save_probs};

pub use either::Either;
