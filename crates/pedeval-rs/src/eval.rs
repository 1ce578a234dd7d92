//! Per-image matching of detections to ground truth.
//!
//! `evaluate` runs [`evaluate_img`] for every (category, image) pair and keeps the results in
//! category-major order, which is the order [`crate::accumulate::accumulate`] consumes them in.

use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use crate::dataset::{DetectionSet, GroundTruthSet};
use crate::error::Result;
use crate::geometry;
use crate::params::Params;
use crate::types::{Annotation, BBox, Detection};

/// Category key used for every pair when categories are pooled.
pub const POOLED_CATEGORY: u64 = 0;

/// Match record for one image, one category and the largest detection cap.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalImg {
    pub image_id: u64,
    pub category_id: u64,
    pub max_det: usize,
    /// Detection ids in descending score order, truncated to `max_det`.
    pub dt_ids: Vec<u64>,
    /// Ground-truth ids, non-ignored first.
    pub gt_ids: Vec<u64>,
    /// Detection matches for each IoU threshold: dt_matches[t][d] = matched gt_id or 0
    pub dt_matches: Vec<Vec<u64>>,
    /// Ground truth matches for each IoU threshold: gt_matches[t][g] = matched dt_id or 0.
    /// Ignored ground truths are never marked, so they can absorb several detections.
    pub gt_matches: Vec<Vec<u64>>,
    /// Detection scores, aligned with `dt_ids`
    pub dt_scores: Vec<f64>,
    /// Whether each GT is ignored, aligned with `gt_ids`
    pub gt_ignore: Vec<bool>,
    /// Whether each detection is ignored per IoU threshold
    pub dt_ignore: Vec<Vec<bool>>,
}

/// Output of [`evaluate`]: the resolved evaluation context plus all match records.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Validated parameters the records were produced with.
    pub params: Params,
    /// Evaluated images, ascending.
    pub img_ids: Vec<u64>,
    /// Evaluated categories, ascending. With pooled categories this is the set that was pooled.
    pub cat_ids: Vec<u64>,
    eval_imgs: Vec<Option<EvalImg>>,
}

impl Evaluation {
    /// Number of category slots: one per category, or one when pooled.
    pub fn num_cat_slots(&self) -> usize {
        if self.params.use_cats {
            self.cat_ids.len()
        } else {
            1
        }
    }

    /// Match records in category-major order; `None` where an image had no boxes of a category.
    pub fn eval_imgs(&self) -> &[Option<EvalImg>] {
        &self.eval_imgs
    }

    /// Match record for a category slot and image position.
    pub fn eval_img(&self, k_idx: usize, img_idx: usize) -> Option<&EvalImg> {
        self.eval_imgs
            .get(k_idx * self.img_ids.len() + img_idx)
            .and_then(|e| e.as_ref())
    }
}

/// Run per-image evaluation over the whole dataset.
pub fn evaluate(gt: &GroundTruthSet, dt: &DetectionSet, params: &Params) -> Result<Evaluation> {
    let tic = Instant::now();
    let mut params = params.clone();
    params.validate()?;

    let img_ids = if params.img_ids.is_empty() {
        gt.img_ids()
    } else {
        sorted_unique(&params.img_ids)
    };
    let cat_ids = if params.cat_ids.is_empty() {
        gt.cat_ids()
    } else {
        sorted_unique(&params.cat_ids)
    };
    let cat_keys = if params.use_cats {
        cat_ids.clone()
    } else {
        vec![POOLED_CATEGORY]
    };
    let max_det = params.max_dets.last().copied().unwrap_or(1);

    let pairs: Vec<(u64, u64)> = cat_keys
        .iter()
        .flat_map(|&cat_id| img_ids.iter().map(move |&img_id| (cat_id, img_id)))
        .collect();
    debug!(
        "evaluating {} images x {} category slots",
        img_ids.len(),
        cat_keys.len()
    );

    let eval_imgs: Vec<Option<EvalImg>> = pairs
        .par_iter()
        .map(|&(cat_id, img_id)| {
            let (gts, dts) = gather(gt, dt, &params, &cat_ids, img_id, cat_id);
            evaluate_img(&gts, &dts, &params, img_id, cat_id, max_det)
        })
        .collect();

    info!(
        "per-image evaluation done (t={:.2}s)",
        tic.elapsed().as_secs_f64()
    );

    Ok(Evaluation {
        params,
        img_ids,
        cat_ids,
        eval_imgs,
    })
}

/// Ground truth and detections for one image, for one category or pooled over `cat_ids`.
fn gather<'a>(
    gt: &'a GroundTruthSet,
    dt: &'a DetectionSet,
    params: &Params,
    cat_ids: &[u64],
    img_id: u64,
    cat_id: u64,
) -> (Vec<&'a Annotation>, Vec<&'a Detection>) {
    let cats: &[u64] = if params.use_cats {
        std::slice::from_ref(&cat_id)
    } else {
        cat_ids
    };
    let gts = cats
        .iter()
        .flat_map(|&c| gt.ann_ids_for_img_cat(img_id, c))
        .filter_map(|&id| gt.get_ann(id))
        .collect();
    let dts = cats
        .iter()
        .flat_map(|&c| dt.det_ids_for_img_cat(img_id, c))
        .filter_map(|&id| dt.get_det(id))
        .collect();
    (gts, dts)
}

/// Match the detections of one image and category to its ground truth.
///
/// Returns `None` when both lists are empty; such pairs take no part in accumulation.
pub fn evaluate_img(
    gt: &[&Annotation],
    dt: &[&Detection],
    params: &Params,
    img_id: u64,
    cat_id: u64,
    max_det: usize,
) -> Option<EvalImg> {
    if gt.is_empty() && dt.is_empty() {
        return None;
    }

    // Sort GT: non-ignored first, then ignored. Stable, so file order holds within each group.
    let mut gt_sorted: Vec<(&Annotation, bool)> = gt
        .iter()
        .map(|&g| (g, params.ignore_mode.is_ignored(g.iscrowd, g.ignore)))
        .collect();
    gt_sorted.sort_by_key(|&(_, ignored)| ignored);

    // Sort DT by score descending (stable: ties keep input order), then cap.
    let mut dt_sorted: Vec<&Detection> = dt.to_vec();
    dt_sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    dt_sorted.truncate(max_det);

    let gt_ids: Vec<u64> = gt_sorted.iter().map(|(g, _)| g.id).collect();
    let gt_ignore: Vec<bool> = gt_sorted.iter().map(|&(_, ig)| ig).collect();
    let gt_boxes: Vec<BBox> = gt_sorted.iter().map(|(g, _)| g.bbox).collect();
    let dt_ids: Vec<u64> = dt_sorted.iter().map(|d| d.id).collect();
    let dt_scores: Vec<f64> = dt_sorted.iter().map(|d| d.score).collect();
    let dt_boxes: Vec<BBox> = dt_sorted.iter().map(|d| d.bbox).collect();

    let ious = geometry::iou_matrix(&dt_boxes, &gt_boxes, &gt_ignore);

    let num_iou_thrs = params.iou_thrs.len();
    let d = dt_ids.len();
    let g = gt_ids.len();
    let mut dt_matches = vec![vec![0u64; d]; num_iou_thrs];
    let mut gt_matches = vec![vec![0u64; g]; num_iou_thrs];
    let mut dt_ignore = vec![vec![false; d]; num_iou_thrs];

    for (t_idx, &iou_thr) in params.iou_thrs.iter().enumerate() {
        for di in 0..d {
            let mut best_iou = iou_thr.min(1.0 - 1e-10);
            let mut best_gi: Option<usize> = None;

            for gi in 0..g {
                // Already taken by an earlier detection (only non-ignored GTs get marked)
                if gt_matches[t_idx][gi] != 0 {
                    continue;
                }
                // A regular match is locked in; ignored GTs never override it. An ignored best
                // does not stop the scan, so the highest-IoU ignored GT is the one recorded.
                if gt_ignore[gi] && best_gi.is_some_and(|b| !gt_ignore[b]) {
                    break;
                }
                if ious[di][gi] < best_iou {
                    continue;
                }
                best_iou = ious[di][gi];
                best_gi = Some(gi);
            }

            if let Some(gi) = best_gi {
                dt_matches[t_idx][di] = gt_ids[gi];
                dt_ignore[t_idx][di] = gt_ignore[gi];
                if !gt_ignore[gi] {
                    gt_matches[t_idx][gi] = dt_ids[di];
                }
            }
        }
    }

    Some(EvalImg {
        image_id: img_id,
        category_id: cat_id,
        max_det,
        dt_ids,
        gt_ids,
        dt_matches,
        gt_matches,
        dt_scores,
        gt_ignore,
        dt_ignore,
    })
}

fn sorted_unique(ids: &[u64]) -> Vec<u64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
