//! Crowd Jaccard Index: per-image set agreement under optimal one-to-one matching.
//!
//! For each image, detections and non-ignored ground truth are joined by IoU edges strictly above
//! `bm_thr`, a maximum-weight matching picks the pairs, and the image scores
//! `k / (m + n - k)` for `k` pairs, `m` ground truths and `n` detections.

use std::fmt;
use std::time::Instant;

use crossbeam_channel::Receiver;
use log::{debug, info};
use serde::Serialize;

use crate::dataset::{DetectionSet, GroundTruthSet};
use crate::error::{EvalError, Result};
use crate::geometry;
use crate::matching::BipartiteGraph;
use crate::params::Params;
use crate::types::BBox;

const EPS: f64 = 1e-6;

/// Jaccard Index statistics for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JiResult {
    pub image_id: u64,
    /// k / (m + n - k)
    pub ratio: f64,
    /// k / m
    pub recall: f64,
    /// k / n
    pub cover: f64,
    /// 1 - cover
    pub noise: f64,
    /// k: matched pairs
    pub matched: usize,
    /// n: detections
    pub det_count: usize,
    /// m: non-ignored ground truths
    pub gt_count: usize,
}

impl JiResult {
    pub fn new(image_id: u64, matched: usize, gt_count: usize, det_count: usize) -> Self {
        let (k, m, n) = (matched as f64, gt_count as f64, det_count as f64);
        let cover = k / (n + EPS);
        JiResult {
            image_id,
            ratio: k / (m + n - k + EPS),
            recall: k / (m + EPS),
            cover,
            noise: 1.0 - cover,
            matched,
            det_count,
            gt_count,
        }
    }
}

/// Dataset-level Jaccard Index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JiReport {
    pub bm_thr: f64,
    /// Per-image results in image-id order; skipped images are absent.
    pub results: Vec<JiResult>,
    /// Unweighted mean of `ratio`, `-1` when no image contributed.
    pub mean_ratio: f64,
    pub mean_recall: f64,
    pub mean_cover: f64,
}

impl JiReport {
    pub fn from_results(results: Vec<JiResult>, bm_thr: f64) -> Self {
        let mean = |f: fn(&JiResult) -> f64| {
            if results.is_empty() {
                -1.0
            } else {
                results.iter().map(f).sum::<f64>() / results.len() as f64
            }
        };
        JiReport {
            bm_thr,
            mean_ratio: mean(|r| r.ratio),
            mean_recall: mean(|r| r.recall),
            mean_cover: mean(|r| r.cover),
            results,
        }
    }
}

impl fmt::Display for JiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mJI@{:.2} is {:.4}", self.bm_thr, self.mean_ratio)
    }
}

/// Matched `(detection, ground truth)` index pairs under maximum-weight matching.
pub fn compute_jc(dets: &[BBox], gts: &[BBox], bm_thr: f64) -> Vec<(usize, usize)> {
    if dets.is_empty() || gts.is_empty() {
        return Vec::new();
    }
    let ious = geometry::iou_matrix(dets, gts, &vec![false; gts.len()]);
    BipartiteGraph::from_weights(&ious, gts.len(), bm_thr)
        .max_weight_matching()
        .pairs()
}

/// Jaccard Index for one image, or `None` when the image has no detections or no ground-truth
/// record.
///
/// Ground truths carrying the filter-derived `ignore` flag are dropped. Boxes are clipped to the
/// image when its size is known.
pub fn evaluate_ji_image(
    gt: &GroundTruthSet,
    dt: &DetectionSet,
    params: &Params,
    img_id: u64,
) -> Option<JiResult> {
    let keep_cat = |cat_id: u64| params.cat_ids.is_empty() || params.cat_ids.contains(&cat_id);

    let mut dets: Vec<BBox> = dt
        .det_ids_for_img(img_id)
        .iter()
        .filter_map(|&id| dt.get_det(id))
        .filter(|d| keep_cat(d.category_id))
        .map(|d| d.bbox)
        .collect();
    if dets.is_empty() || !gt.has_image(img_id) {
        return None;
    }

    let mut gts: Vec<BBox> = gt
        .ann_ids_for_img(img_id)
        .iter()
        .filter_map(|&id| gt.get_ann(id))
        .filter(|a| !a.ignore && keep_cat(a.category_id))
        .map(|a| a.bbox)
        .collect();

    if let Some(img) = gt.get_img(img_id).filter(|i| i.height > 0 && i.width > 0) {
        for bb in dets.iter_mut().chain(gts.iter_mut()) {
            *bb = geometry::clip_to_image(bb, img.height, img.width);
        }
    }

    let matches = compute_jc(&dets, &gts, params.bm_thr);
    Some(JiResult::new(img_id, matches.len(), gts.len(), dets.len()))
}

/// Jaccard Index over the dataset, sharded across `params.workers` threads.
///
/// Images are the sorted union of ground-truth and detection image ids, or `params.img_ids`.
pub fn evaluate_ji(gt: &GroundTruthSet, dt: &DetectionSet, params: &Params) -> Result<JiReport> {
    let tic = Instant::now();
    let mut params = params.clone();
    params.validate()?;

    let mut img_ids = if params.img_ids.is_empty() {
        let mut ids = gt.img_ids();
        ids.extend(dt.img_ids());
        ids
    } else {
        params.img_ids.clone()
    };
    img_ids.sort_unstable();
    img_ids.dedup();

    let results = run_sharded(
        &img_ids,
        params.workers,
        params.channel_capacity,
        |&img_id| evaluate_ji_image(gt, dt, &params, img_id),
    )?;
    debug!(
        "{} of {} images contributed to the Jaccard Index",
        results.len(),
        img_ids.len()
    );

    let report = JiReport::from_results(results, params.bm_thr);
    info!(
        "Jaccard Index evaluation done (t={:.2}s)",
        tic.elapsed().as_secs_f64()
    );
    Ok(report)
}

/// Apply `f` to every item on a fixed pool of workers over contiguous, near-equal ranges.
///
/// Each worker sends one message per item through a bounded channel: `Some(result)` or `None`
/// for "no contribution". The collector counts every message, then joins all workers. A panicked
/// worker or a message count short of `items.len()` is an error. Results come back in item order.
pub fn run_sharded<T, R, F>(items: &[T], workers: usize, capacity: usize, f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Option<R> + Sync,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let stride = total.div_ceil(workers.max(1));
    let (tx, rx) = crossbeam_channel::bounded::<(usize, Option<R>)>(capacity.max(1));
    let f = &f;

    std::thread::scope(|s| {
        let handles: Vec<_> = items
            .chunks(stride)
            .enumerate()
            .map(|(shard, chunk)| {
                let tx = tx.clone();
                s.spawn(move || {
                    for (offset, item) in chunk.iter().enumerate() {
                        if tx.send((shard * stride + offset, f(item))).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let collected = collect_shards(rx, total);

        let mut failed = None;
        for (shard, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() && failed.is_none() {
                failed = Some(shard);
            }
        }
        match failed {
            Some(shard) => Err(EvalError::WorkerFailed(shard)),
            None => collected,
        }
    })
}

/// Drain `(item index, message)` pairs until every sender is gone, counting skips and results
/// alike. Fewer than `total` messages is `IncompleteShards`; results are returned in item order.
fn collect_shards<R>(rx: Receiver<(usize, Option<R>)>, total: usize) -> Result<Vec<R>> {
    let mut results: Vec<(usize, R)> = Vec::new();
    let mut received = 0usize;
    for (idx, msg) in rx.iter() {
        received += 1;
        if received % 1000 == 0 {
            debug!("progress {}/{}", received, total);
        }
        if let Some(r) = msg {
            results.push((idx, r));
        }
    }
    if received != total {
        return Err(EvalError::IncompleteShards {
            expected: total,
            received,
        });
    }

    results.sort_unstable_by_key(|&(idx, _)| idx);
    Ok(results.into_iter().map(|(_, r)| r).collect())
}
