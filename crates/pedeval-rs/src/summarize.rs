//! Scalar metrics over accumulated arrays.

use std::fmt;

use crate::accumulate::{AccumulatedEval, NOT_COMPUTED};
use crate::error::{EvalError, Result};

/// Log-average miss rate, mean precision and mean recall at one IoU selection and detection cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// IoU label as printed, e.g. `0.50` or `0.50:0.95`.
    pub iou_label: String,
    pub max_det: usize,
    pub log_avg_miss_rate: f64,
    pub ap: f64,
    pub ar: f64,
}

impl Summary {
    /// `[MR, AP, AR]`, each `-1` when nothing was computed.
    pub fn stats(&self) -> [f64; 3] {
        [self.log_avg_miss_rate, self.ap, self.ar]
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Average Miss Rate", "(MR)", self.log_avg_miss_rate),
            ("Average Precision", "(AP)", self.ap),
            ("Average Recall", "(AR)", self.ar),
        ];
        for (title, kind, val) in rows {
            writeln!(
                f,
                "{:<18} @ {} [ IoU={:<3} ] = {:0.2}%",
                title,
                kind,
                self.iou_label,
                val * 100.0
            )?;
        }
        Ok(())
    }
}

/// Resolved (threshold indices, cap index) for a summary query.
fn select(acc: &AccumulatedEval, iou_thr: Option<f64>, max_det: usize) -> Result<(Vec<usize>, usize)> {
    let p = &acc.params;
    let t_indices = match iou_thr {
        Some(thr) => match p.iou_thr_index(thr) {
            Some(t) => vec![t],
            None => {
                return Err(EvalError::InvalidParams(format!(
                    "iou threshold {} was not evaluated",
                    thr
                )))
            }
        },
        None => (0..acc.t).collect(),
    };
    let m_idx = p
        .max_dets
        .iter()
        .position(|&d| d == max_det)
        .ok_or_else(|| {
            EvalError::InvalidParams(format!("max_det {} was not evaluated", max_det))
        })?;
    Ok((t_indices, m_idx))
}

fn mean_or_sentinel(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        NOT_COMPUTED
    } else {
        vals.iter().sum::<f64>() / vals.len() as f64
    }
}

/// Geometric mean of the miss rate over the FPPI grid.
pub fn log_average_miss_rate(
    acc: &AccumulatedEval,
    iou_thr: Option<f64>,
    max_det: usize,
) -> Result<f64> {
    let (t_indices, m_idx) = select(acc, iou_thr, max_det)?;
    let mut logs = Vec::new();
    for &t_idx in &t_indices {
        for f_idx in 0..acc.f {
            for k_idx in 0..acc.k {
                let mr = 1.0 - acc.miss_rate_tp[acc.fppi_idx(t_idx, f_idx, k_idx, m_idx)];
                // Sentinel cells come out as 2
                if mr < 2.0 {
                    logs.push(mr.ln());
                }
            }
        }
    }
    if logs.is_empty() {
        return Ok(NOT_COMPUTED);
    }
    Ok(mean_or_sentinel(&logs).exp())
}

/// Mean interpolated precision over the recall grid and categories.
pub fn mean_precision(acc: &AccumulatedEval, iou_thr: Option<f64>, max_det: usize) -> Result<f64> {
    let (t_indices, m_idx) = select(acc, iou_thr, max_det)?;
    let mut vals = Vec::new();
    for &t_idx in &t_indices {
        for r_idx in 0..acc.r {
            for k_idx in 0..acc.k {
                let v = acc.precision[acc.precision_idx(t_idx, r_idx, k_idx, m_idx)];
                if v > NOT_COMPUTED {
                    vals.push(v);
                }
            }
        }
    }
    Ok(mean_or_sentinel(&vals))
}

/// Mean final recall over categories.
pub fn mean_recall(acc: &AccumulatedEval, iou_thr: Option<f64>, max_det: usize) -> Result<f64> {
    let (t_indices, m_idx) = select(acc, iou_thr, max_det)?;
    let mut vals = Vec::new();
    for &t_idx in &t_indices {
        for k_idx in 0..acc.k {
            let v = acc.recall[acc.recall_idx(t_idx, k_idx, m_idx)];
            if v > NOT_COMPUTED {
                vals.push(v);
            }
        }
    }
    Ok(mean_or_sentinel(&vals))
}

/// All three metrics for one IoU selection (`None` = every threshold) and detection cap.
pub fn summarize(acc: &AccumulatedEval, iou_thr: Option<f64>, max_det: usize) -> Result<Summary> {
    let iou_label = match iou_thr {
        Some(thr) => format!("{:0.2}", thr),
        None => {
            let thrs = &acc.params.iou_thrs;
            let first = thrs.first().copied().unwrap_or(0.0);
            let last = thrs.last().copied().unwrap_or(0.0);
            format!("{:0.2}:{:0.2}", first, last)
        }
    };
    Ok(Summary {
        iou_label,
        max_det,
        log_avg_miss_rate: log_average_miss_rate(acc, iou_thr, max_det)?,
        ap: mean_precision(acc, iou_thr, max_det)?,
        ar: mean_recall(acc, iou_thr, max_det)?,
    })
}

/// The standard report: IoU 0.5 at the smallest detection cap.
pub fn summarize_default(acc: &AccumulatedEval) -> Result<Summary> {
    let max_det = acc
        .params
        .max_dets
        .first()
        .copied()
        .ok_or_else(|| EvalError::InvalidParams("max_dets is empty".into()))?;
    summarize(acc, Some(0.5), max_det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::accumulate;
    use crate::dataset::{DetectionSet, GroundTruthSet};
    use crate::eval::evaluate;
    use crate::params::Params;
    use crate::types::{Annotation, Dataset, Detection};
    use approx::assert_relative_eq;

    fn gt(image_id: u64, bbox: [f64; 4], iscrowd: bool) -> Annotation {
        Annotation {
            id: 0,
            image_id,
            category_id: 1,
            bbox,
            iscrowd,
            ignore: false,
            height: None,
            vis_ratio: None,
        }
    }

    fn dt(image_id: u64, bbox: [f64; 4], score: f64) -> Detection {
        Detection {
            id: 0,
            image_id,
            category_id: 1,
            bbox,
            score,
        }
    }

    fn accumulated(anns: Vec<Annotation>, dets: Vec<Detection>, params: &Params) -> AccumulatedEval {
        let gt = GroundTruthSet::from_dataset(Dataset {
            annotations: anns,
            ..Dataset::default()
        })
        .unwrap();
        let dt = DetectionSet::from_detections(dets).unwrap();
        accumulate(&evaluate(&gt, &dt, params).unwrap())
    }

    #[test]
    fn test_perfect_match_summary() {
        let acc = accumulated(
            vec![gt(1, [0.0, 0.0, 10.0, 10.0], false)],
            vec![dt(1, [0.0, 0.0, 10.0, 10.0], 0.9)],
            &Params::default(),
        );
        let s = summarize_default(&acc).unwrap();
        assert_eq!(s.log_avg_miss_rate, 0.0);
        assert_relative_eq!(s.ap, 1.0, epsilon = 1e-12);
        assert_relative_eq!(s.ar, 1.0);
        assert_eq!(s.max_det, 1000);
    }

    #[test]
    fn test_all_missed() {
        let acc = accumulated(
            vec![gt(1, [0.0, 0.0, 10.0, 10.0], false)],
            vec![dt(1, [40.0, 40.0, 10.0, 10.0], 0.9)],
            &Params::default(),
        );
        let s = summarize_default(&acc).unwrap();
        assert_relative_eq!(s.log_avg_miss_rate, 1.0);
        assert_eq!(s.ap, 0.0);
        assert_eq!(s.ar, 0.0);
    }

    #[test]
    fn test_half_recall() {
        // One hit at FPPI 0 on image 1, one GT missed on image 2.
        let acc = accumulated(
            vec![
                gt(1, [0.0, 0.0, 10.0, 10.0], false),
                gt(2, [0.0, 0.0, 10.0, 10.0], false),
            ],
            vec![dt(1, [0.0, 0.0, 10.0, 10.0], 0.9)],
            &Params::default(),
        );
        let s = summarize_default(&acc).unwrap();
        assert_relative_eq!(s.log_avg_miss_rate, 0.5, epsilon = 1e-12);
        assert_relative_eq!(s.ar, 0.5);
        // Recall thresholds 0.00..=0.50 read precision 1, the rest 0
        assert_relative_eq!(s.ap, 51.0 / 101.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sentinel_when_nothing_computed() {
        let acc = accumulated(
            vec![gt(1, [0.0, 0.0, 10.0, 10.0], true)],
            vec![dt(1, [0.0, 0.0, 10.0, 10.0], 0.9)],
            &Params::default(),
        );
        let s = summarize_default(&acc).unwrap();
        assert_eq!(s.stats(), [NOT_COMPUTED; 3]);
    }

    #[test]
    fn test_unknown_selection_is_error() {
        let acc = accumulated(
            vec![gt(1, [0.0, 0.0, 10.0, 10.0], false)],
            vec![],
            &Params::default(),
        );
        assert!(summarize(&acc, Some(0.75), 1000).is_err());
        assert!(summarize(&acc, Some(0.5), 100).is_err());
        assert!(summarize(&acc, None, 1000).is_ok());
    }

    #[test]
    fn test_report_format() {
        let s = Summary {
            iou_label: "0.50".into(),
            max_det: 1000,
            log_avg_miss_rate: 0.1234,
            ap: 0.5,
            ar: 1.0,
        };
        let text = s.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Average Miss Rate  @ (MR) [ IoU=0.50 ] = 12.34%");
        assert_eq!(lines[1], "Average Precision  @ (AP) [ IoU=0.50 ] = 50.00%");
        assert_eq!(lines[2], "Average Recall     @ (AR) [ IoU=0.50 ] = 100.00%");
    }

    #[test]
    fn test_summary_does_not_mutate() {
        let acc = accumulated(
            vec![gt(1, [0.0, 0.0, 10.0, 10.0], false)],
            vec![dt(1, [0.0, 0.0, 10.0, 10.0], 0.9)],
            &Params::default(),
        );
        let before = acc.precision.clone();
        let first = summarize_default(&acc).unwrap();
        let second = summarize_default(&acc).unwrap();
        assert_eq!(first, second);
        assert_eq!(acc.precision, before);
    }
}
