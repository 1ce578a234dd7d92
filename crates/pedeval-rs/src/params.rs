use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// The geometry used to compare detections with ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IouType {
    /// Bounding box IoU.
    Bbox,
    /// Segmentation mask IoU. Not evaluable here.
    Segm,
    /// Keypoint OKS. Not evaluable here.
    Keypoints,
}

impl FromStr for IouType {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bbox" => Ok(IouType::Bbox),
            "segm" => Ok(IouType::Segm),
            "keypoints" => Ok(IouType::Keypoints),
            other => Err(EvalError::InvalidParams(format!(
                "unknown iou type '{}', use bbox, segm or keypoints",
                other
            ))),
        }
    }
}

/// Which ground-truth flag the box pathway treats as "ignore".
///
/// The ignored ground truths are also the ones scored with the crowd IoU denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreMode {
    /// `iscrowd` only.
    #[default]
    Crowd,
    /// The filter-derived `ignore` flag only.
    Flag,
    /// Either flag.
    Either,
}

impl IgnoreMode {
    pub fn is_ignored(self, iscrowd: bool, ignore: bool) -> bool {
        match self {
            IgnoreMode::Crowd => iscrowd,
            IgnoreMode::Flag => ignore,
            IgnoreMode::Either => iscrowd || ignore,
        }
    }
}

impl FromStr for IgnoreMode {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "crowd" => Ok(IgnoreMode::Crowd),
            "flag" => Ok(IgnoreMode::Flag),
            "either" => Ok(IgnoreMode::Either),
            other => Err(EvalError::InvalidParams(format!(
                "unknown ignore mode '{}', use crowd, flag or either",
                other
            ))),
        }
    }
}

/// Evaluation parameters.
///
/// Defaults follow the pedestrian benchmark protocol: a single IoU threshold of 0.5,
/// 101 recall thresholds, the 9-point log-spaced FPPI grid from 10^-2 to 10^0 and up to
/// 1000 detections per image. A JSON config only needs to name the fields it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Params {
    /// IoU computation type. Only `bbox` is evaluable.
    pub iou_type: IouType,
    /// Image IDs to evaluate (empty = all images).
    pub img_ids: Vec<u64>,
    /// Category IDs to evaluate (empty = all categories).
    pub cat_ids: Vec<u64>,
    /// IoU thresholds for matching.
    pub iou_thrs: Vec<f64>,
    /// Recall grid for interpolated precision.
    pub rec_thrs: Vec<f64>,
    /// False-positives-per-image grid for the miss-rate curve.
    pub fppi_thrs: Vec<f64>,
    /// Detection caps per image, ascending.
    pub max_dets: Vec<usize>,
    /// Evaluate per category (true) or pool all categories (false).
    pub use_cats: bool,
    /// Which ground-truth flag counts as ignore in the box pathway.
    pub ignore_mode: IgnoreMode,
    /// IoU floor for Jaccard Index matching; edges must be strictly above it.
    pub bm_thr: f64,
    /// Worker count for sharded Jaccard Index evaluation.
    pub workers: usize,
    /// Capacity of the bounded result channel used by the shard workers.
    pub channel_capacity: usize,
}

impl Params {
    /// Create default parameters for the given evaluation type.
    pub fn new(iou_type: IouType) -> Self {
        let rec_thrs: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let fppi_thrs = vec![
            0.0100, 0.0178, 0.0316, 0.0562, 0.1000, 0.1778, 0.3162, 0.5623, 1.0000,
        ];

        Params {
            iou_type,
            img_ids: Vec::new(),
            cat_ids: Vec::new(),
            iou_thrs: vec![0.5],
            rec_thrs,
            fppi_thrs,
            max_dets: vec![1000],
            use_cats: true,
            ignore_mode: IgnoreMode::Crowd,
            bm_thr: 0.5,
            workers: 4,
            channel_capacity: 1000,
        }
    }

    /// Load parameters from a JSON config file, filling unnamed fields with defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let params: Params = serde_json::from_reader(reader)?;
        Ok(params)
    }

    /// Check every option and normalize `max_dets` (ascending, deduplicated).
    pub fn validate(&mut self) -> Result<()> {
        if self.iou_type != IouType::Bbox {
            return Err(EvalError::UnsupportedIouType(self.iou_type));
        }
        check_unit_grid("iou_thrs", &self.iou_thrs)?;
        check_unit_grid("rec_thrs", &self.rec_thrs)?;

        if self.fppi_thrs.is_empty() {
            return Err(EvalError::InvalidParams("fppi_thrs is empty".into()));
        }
        if self.fppi_thrs.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EvalError::InvalidParams(
                "fppi_thrs must be finite and non-negative".into(),
            ));
        }
        if self.fppi_thrs.windows(2).any(|w| w[0] > w[1]) {
            return Err(EvalError::InvalidParams(
                "fppi_thrs must be ascending".into(),
            ));
        }

        if self.max_dets.is_empty() || self.max_dets.contains(&0) {
            return Err(EvalError::InvalidParams(
                "max_dets must be non-empty and positive".into(),
            ));
        }
        self.max_dets.sort_unstable();
        self.max_dets.dedup();

        if !(0.0..1.0).contains(&self.bm_thr) {
            return Err(EvalError::InvalidParams(format!(
                "bm_thr must lie in [0, 1), got {}",
                self.bm_thr
            )));
        }
        if self.workers == 0 || self.channel_capacity == 0 {
            return Err(EvalError::InvalidParams(
                "workers and channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Index of an IoU threshold in `iou_thrs`, compared with a small tolerance.
    pub fn iou_thr_index(&self, thr: f64) -> Option<usize> {
        self.iou_thrs.iter().position(|&t| (t - thr).abs() < 1e-9)
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::new(IouType::Bbox)
    }
}

fn check_unit_grid(name: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(EvalError::InvalidParams(format!("{} is empty", name)));
    }
    if values.iter().any(|v| !(0.0..=1.0).contains(v)) {
        return Err(EvalError::InvalidParams(format!(
            "{} values must lie in [0, 1]",
            name
        )));
    }
    Ok(())
}
