//! Dataset-level precision/recall and miss-rate curves.

use std::time::Instant;

use log::{debug, info};

use crate::eval::{EvalImg, Evaluation};
use crate::params::Params;

/// Sentinel for cells that were never computed (no non-ignored ground truth).
pub const NOT_COMPUTED: f64 = -1.0;

/// Accumulated evaluation results.
#[derive(Debug, Clone)]
pub struct AccumulatedEval {
    /// Parameters the arrays were accumulated with.
    pub params: Params,
    /// Precision: [T x R x K x M]
    pub precision: Vec<f64>,
    /// Recall: [T x K x M]
    pub recall: Vec<f64>,
    /// Scores at precision thresholds: [T x R x K x M]
    pub scores: Vec<f64>,
    /// Recall reached at each FPPI threshold: [T x F x K x M]
    pub miss_rate_tp: Vec<f64>,
    /// Shape parameters
    pub t: usize,
    pub r: usize,
    pub f: usize,
    pub k: usize,
    pub m: usize,
}

impl AccumulatedEval {
    fn new(params: &Params, k: usize) -> Self {
        let t = params.iou_thrs.len();
        let r = params.rec_thrs.len();
        let f = params.fppi_thrs.len();
        let m = params.max_dets.len();
        AccumulatedEval {
            params: params.clone(),
            precision: vec![NOT_COMPUTED; t * r * k * m],
            recall: vec![NOT_COMPUTED; t * k * m],
            scores: vec![NOT_COMPUTED; t * r * k * m],
            miss_rate_tp: vec![NOT_COMPUTED; t * f * k * m],
            t,
            r,
            f,
            k,
            m,
        }
    }

    pub fn precision_idx(&self, t: usize, r: usize, k: usize, m: usize) -> usize {
        ((t * self.r + r) * self.k + k) * self.m + m
    }

    pub fn recall_idx(&self, t: usize, k: usize, m: usize) -> usize {
        (t * self.k + k) * self.m + m
    }

    pub fn fppi_idx(&self, t: usize, f: usize, k: usize, m: usize) -> usize {
        ((t * self.f + f) * self.k + k) * self.m + m
    }
}

/// Running operating points over detections in descending score order.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingCurve {
    pub recall: Vec<f64>,
    pub precision: Vec<f64>,
    pub fppi: Vec<f64>,
    pub scores: Vec<f64>,
}

impl OperatingCurve {
    /// Build from `(is_true_positive, score)` pairs of non-ignored detections, best first.
    pub fn new<I>(ranked: I, num_gt: usize, num_imgs: usize) -> Self
    where
        I: IntoIterator<Item = (bool, f64)>,
    {
        let mut curve = OperatingCurve {
            recall: Vec::new(),
            precision: Vec::new(),
            fppi: Vec::new(),
            scores: Vec::new(),
        };
        let (mut tp, mut fp) = (0.0f64, 0.0f64);
        let num_imgs = num_imgs.max(1) as f64;
        for (is_tp, score) in ranked {
            if is_tp {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            curve.recall.push(tp / num_gt as f64);
            curve.precision.push(tp / (tp + fp + f64::EPSILON));
            curve.fppi.push(fp / num_imgs);
            curve.scores.push(score);
        }
        curve
    }

    /// Make precision non-increasing and recall non-decreasing along the ranking.
    pub fn envelope(&mut self) {
        for i in (1..self.recall.len()).rev() {
            if self.recall[i] < self.recall[i - 1] {
                self.recall[i - 1] = self.recall[i];
            }
            if self.precision[i] > self.precision[i - 1] {
                self.precision[i - 1] = self.precision[i];
            }
        }
    }

    /// Precision and score at the first rank reaching each recall threshold.
    ///
    /// Thresholds beyond the final recall read 0.
    pub fn sample_precision(&self, rec_thrs: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut precision = vec![0.0; rec_thrs.len()];
        let mut scores = vec![0.0; rec_thrs.len()];
        for (ri, &thr) in rec_thrs.iter().enumerate() {
            let pos = self.recall.partition_point(|&rc| rc < thr);
            if pos >= self.recall.len() {
                break;
            }
            precision[ri] = self.precision[pos];
            scores[ri] = self.scores[pos];
        }
        (precision, scores)
    }

    /// Recall at the last rank whose FPPI does not exceed each threshold (0 if none does).
    pub fn sample_recall_at_fppi(&self, fppi_thrs: &[f64]) -> Vec<f64> {
        fppi_thrs
            .iter()
            .map(|&thr| match self.fppi.partition_point(|&v| v <= thr) {
                0 => 0.0,
                pos => self.recall[pos - 1],
            })
            .collect()
    }

    pub fn final_recall(&self) -> f64 {
        self.recall.last().copied().unwrap_or(0.0)
    }
}

/// Accumulate per-image match records into precision/recall/miss-rate arrays.
///
/// Runs sequentially in image-list order: ties in score keep that order, and the sampled curves
/// depend on it.
pub fn accumulate(eval: &Evaluation) -> AccumulatedEval {
    let tic = Instant::now();
    let p = &eval.params;
    let k = eval.num_cat_slots();
    let num_imgs = eval.img_ids.len();
    let mut acc = AccumulatedEval::new(p, k);

    for k_idx in 0..k {
        let records: Vec<&EvalImg> = (0..num_imgs)
            .filter_map(|i| eval.eval_img(k_idx, i))
            .collect();
        if records.is_empty() {
            continue;
        }
        let num_gt: usize = records
            .iter()
            .map(|e| e.gt_ignore.iter().filter(|&&ig| !ig).count())
            .sum();
        if num_gt == 0 {
            debug!("category slot {} has no non-ignored ground truth", k_idx);
            continue;
        }

        for (m_idx, &max_det) in p.max_dets.iter().enumerate() {
            let mut dt_scores: Vec<f64> = Vec::new();
            let mut dt_matches: Vec<Vec<u64>> = vec![Vec::new(); acc.t];
            let mut dt_ignore: Vec<Vec<bool>> = vec![Vec::new(); acc.t];
            for e in &records {
                let nd = e.dt_scores.len().min(max_det);
                dt_scores.extend_from_slice(&e.dt_scores[..nd]);
                for t_idx in 0..acc.t {
                    dt_matches[t_idx].extend_from_slice(&e.dt_matches[t_idx][..nd]);
                    dt_ignore[t_idx].extend_from_slice(&e.dt_ignore[t_idx][..nd]);
                }
            }

            // Stable: equal scores keep image-list order
            let mut inds: Vec<usize> = (0..dt_scores.len()).collect();
            inds.sort_by(|&a, &b| dt_scores[b].total_cmp(&dt_scores[a]));

            for t_idx in 0..acc.t {
                let ranked = inds
                    .iter()
                    .filter(|&&i| !dt_ignore[t_idx][i])
                    .map(|&i| (dt_matches[t_idx][i] != 0, dt_scores[i]));
                let mut curve = OperatingCurve::new(ranked, num_gt, num_imgs);

                let idx = acc.recall_idx(t_idx, k_idx, m_idx);
                acc.recall[idx] = curve.final_recall();

                curve.envelope();

                for (f_idx, q) in curve
                    .sample_recall_at_fppi(&p.fppi_thrs)
                    .into_iter()
                    .enumerate()
                {
                    let idx = acc.fppi_idx(t_idx, f_idx, k_idx, m_idx);
                    acc.miss_rate_tp[idx] = q;
                }

                let (precision, scores) = curve.sample_precision(&p.rec_thrs);
                for (r_idx, (pr, sc)) in precision.into_iter().zip(scores).enumerate() {
                    let idx = acc.precision_idx(t_idx, r_idx, k_idx, m_idx);
                    acc.precision[idx] = pr;
                    acc.scores[idx] = sc;
                }
            }
        }
    }

    info!("accumulation done (t={:.2}s)", tic.elapsed().as_secs_f64());
    acc
}
