use std::path::PathBuf;

use approx::assert_relative_eq;
use pedeval_rs::params::IgnoreMode;
use pedeval_rs::{
    accumulate, evaluate, evaluate_ji, summarize, summarize_default, DetectionSet, EvalError,
    GroundTruthSet, IouType, Params,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load() -> (GroundTruthSet, DetectionSet) {
    let gt = GroundTruthSet::new(&fixtures_dir().join("gt.json")).expect("Failed to load GT");
    let dt = gt
        .load_res(&fixtures_dir().join("dt.json"))
        .expect("Failed to load DT");
    (gt, dt)
}

#[test]
fn test_load_gt() {
    let (gt, _) = load();
    assert_eq!(gt.dataset.images.len(), 3);
    assert_eq!(gt.dataset.annotations.len(), 5);
    assert_eq!(gt.dataset.categories.len(), 1);
    assert_eq!(gt.img_ids(), vec![1, 2, 3]);
    assert_eq!(gt.cat_ids(), vec![1]);

    let crowd = gt.get_ann(3).unwrap();
    assert!(crowd.iscrowd && crowd.ignore);
    let filtered = gt.get_ann(5).unwrap();
    assert!(!filtered.iscrowd && filtered.ignore);
}

#[test]
fn test_load_res() {
    let (_, dt) = load();
    assert_eq!(dt.img_ids(), vec![1, 2]);
    // Ids are assigned in file order
    assert_eq!(dt.det_ids_for_img(1), &[1, 2, 3]);
    assert_eq!(dt.get_det(5).unwrap().score, 0.6);
}

#[test]
fn test_match_records() {
    let (gt, dt) = load();
    let evaluation = evaluate(&gt, &dt, &Params::default()).unwrap();
    assert_eq!(evaluation.img_ids, vec![1, 2, 3]);

    let e = evaluation.eval_img(0, 0).unwrap();
    assert_eq!(e.dt_ids, vec![1, 2, 3]);
    assert_eq!(e.gt_ids, vec![1, 2, 3]);
    assert_eq!(e.gt_ignore, vec![false, false, true]);
    // The detection inside the crowd region is absorbed, and the crowd box stays unmarked
    assert_eq!(e.dt_matches[0], vec![1, 2, 3]);
    assert_eq!(e.gt_matches[0], vec![1, 2, 0]);
    assert_eq!(e.dt_ignore[0], vec![false, false, true]);

    let e = evaluation.eval_img(0, 1).unwrap();
    assert_eq!(e.dt_ids, vec![4, 5]);
    assert_eq!(e.dt_matches[0], vec![0, 4]);

    // Image 3 has a ground truth and no detections
    let e = evaluation.eval_img(0, 2).unwrap();
    assert!(e.dt_ids.is_empty());
    assert_eq!(e.gt_matches[0], vec![0]);
}

#[test]
fn test_crowd_mode_summary() {
    let (gt, dt) = load();
    let acc = accumulate(&evaluate(&gt, &dt, &Params::default()).unwrap());
    let s = summarize_default(&acc).unwrap();

    // Ranked: TP, TP, FP, TP over 4 countable ground truths on 3 images
    assert_relative_eq!(s.ar, 0.75);
    assert_relative_eq!(s.ap, 69.75 / 101.0, epsilon = 1e-12);
    assert_relative_eq!(s.log_avg_miss_rate, 0.5f64.powf(11.0 / 9.0), epsilon = 1e-12);

    let text = s.to_string();
    assert!(text.starts_with("Average Miss Rate  @ (MR) [ IoU=0.50 ] = "));
    assert!(text.contains("Average Recall     @ (AR) [ IoU=0.50 ] = 75.00%"));
}

#[test]
fn test_flag_mode_ignores_filtered_boxes() {
    let (gt, dt) = load();
    let params = Params {
        ignore_mode: IgnoreMode::Flag,
        ..Params::default()
    };
    let acc = accumulate(&evaluate(&gt, &dt, &params).unwrap());
    let s = summarize_default(&acc).unwrap();

    assert_relative_eq!(s.ar, 1.0);
    assert_relative_eq!(s.ap, 92.5 / 101.0, epsilon = 1e-12);
    // Full recall at FPPI 1/3 drives the geometric mean to zero
    assert_eq!(s.log_avg_miss_rate, 0.0);
}

#[test]
fn test_image_and_category_filters() {
    let (gt, dt) = load();
    let params = Params {
        img_ids: vec![2],
        ..Params::default()
    };
    let acc = accumulate(&evaluate(&gt, &dt, &params).unwrap());
    let s = summarize_default(&acc).unwrap();
    assert_relative_eq!(s.ar, 1.0);
    // One false positive ranked first
    assert_relative_eq!(s.ap, 0.5, epsilon = 1e-6);

    let params = Params {
        cat_ids: vec![2],
        ..Params::default()
    };
    let acc = accumulate(&evaluate(&gt, &dt, &params).unwrap());
    assert_eq!(summarize_default(&acc).unwrap().stats(), [-1.0; 3]);
}

#[test]
fn test_pooled_categories_match_single_category() {
    let (gt, dt) = load();
    let per_cat = summarize_default(&accumulate(&evaluate(&gt, &dt, &Params::default()).unwrap()))
        .unwrap();
    let params = Params {
        use_cats: false,
        ..Params::default()
    };
    let pooled = summarize_default(&accumulate(&evaluate(&gt, &dt, &params).unwrap())).unwrap();
    assert_eq!(per_cat, pooled);
}

#[test]
fn test_multiple_thresholds_and_caps() {
    let (gt, dt) = load();
    let params = Params {
        iou_thrs: vec![0.5, 0.95],
        max_dets: vec![1, 1000],
        ..Params::default()
    };
    let acc = accumulate(&evaluate(&gt, &dt, &params).unwrap());
    assert_eq!((acc.t, acc.m), (2, 2));

    // At 0.95 the shifted box on image 1 no longer matches
    let strict = summarize(&acc, Some(0.95), 1000).unwrap();
    assert_relative_eq!(strict.ar, 0.5);

    // One detection per image: image 1 keeps its top box, image 2 keeps the false positive
    let capped = summarize(&acc, Some(0.5), 1).unwrap();
    assert_relative_eq!(capped.ar, 0.25);

    let all = summarize(&acc, None, 1000).unwrap();
    assert_eq!(all.iou_label, "0.50:0.95");
    assert_relative_eq!(all.ar, (0.75 + 0.5) / 2.0);
}

#[test]
fn test_non_bbox_is_fatal() {
    let (gt, dt) = load();
    let result = evaluate(&gt, &dt, &Params::new(IouType::Segm));
    assert!(matches!(result, Err(EvalError::UnsupportedIouType(IouType::Segm))));
}

#[test]
fn test_jaccard_index() {
    let (gt, dt) = load();
    let report = evaluate_ji(&gt, &dt, &Params::default()).unwrap();

    // Image 3 has no detections
    let ids: Vec<u64> = report.results.iter().map(|r| r.image_id).collect();
    assert_eq!(ids, vec![1, 2]);

    let r1 = &report.results[0];
    assert_eq!((r1.matched, r1.gt_count, r1.det_count), (2, 2, 3));
    let r2 = &report.results[1];
    assert_eq!((r2.matched, r2.gt_count, r2.det_count), (1, 1, 2));

    assert_relative_eq!(report.mean_ratio, 7.0 / 12.0, epsilon = 1e-5);
    assert_relative_eq!(report.mean_recall, 1.0, epsilon = 1e-5);
    assert_relative_eq!(report.mean_cover, (2.0 / 3.0 + 0.5) / 2.0, epsilon = 1e-5);
    assert_eq!(report.to_string(), "mJI@0.50 is 0.5833");
}

#[test]
fn test_params_from_file() {
    let mut params = Params::from_file(&fixtures_dir().join("params.json")).unwrap();
    params.validate().unwrap();
    assert_eq!(params.ignore_mode, IgnoreMode::Flag);
    assert_eq!(params.max_dets, vec![100, 1000]);
    assert_eq!(params.iou_thrs, vec![0.5]);
    assert_eq!(params.workers, 2);

    let (gt, dt) = load();
    let acc = accumulate(&evaluate(&gt, &dt, &params).unwrap());
    assert_eq!(summarize_default(&acc).unwrap().max_det, 100);

    let report = evaluate_ji(&gt, &dt, &params).unwrap();
    assert!(report.to_string().starts_with("mJI@0.60 is "));
}
