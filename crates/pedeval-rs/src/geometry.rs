//! Box overlap primitives on `[x, y, w, h]` boxes.

use crate::types::BBox;

/// Area of a box; negative extents count as empty.
pub fn area(bb: &BBox) -> f64 {
    bb[2].max(0.0) * bb[3].max(0.0)
}

/// Intersection area of two boxes.
pub fn intersection(a: &BBox, b: &BBox) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    let iw = x2 - x1;
    let ih = y2 - y1;
    if iw <= 0.0 || ih <= 0.0 {
        return 0.0;
    }
    iw * ih
}

/// IoU of a detection against a ground-truth box.
///
/// For a crowd ground truth the denominator is the detection area, so the value measures how much
/// of the detection lies inside the crowd region. Empty boxes and disjoint boxes give 0.
pub fn iou(dt: &BBox, gt: &BBox, gt_is_crowd: bool) -> f64 {
    let inter = intersection(dt, gt);
    if inter == 0.0 {
        return 0.0;
    }
    let da = area(dt);
    let denom = if gt_is_crowd {
        da
    } else {
        da + area(gt) - inter
    };
    if denom <= 0.0 {
        0.0
    } else {
        (inter / denom).clamp(0.0, 1.0)
    }
}

/// Compute IoU between sets of boxes. Returns a D×G matrix.
pub fn iou_matrix(dt: &[BBox], gt: &[BBox], iscrowd: &[bool]) -> Vec<Vec<f64>> {
    dt.iter()
        .map(|d| {
            gt.iter()
                .zip(iscrowd)
                .map(|(g, &crowd)| iou(d, g, crowd))
                .collect()
        })
        .collect()
}

/// Best plain IoU of each proposal against any ground truth (0 when there is none).
pub fn max_iou_per_box(proposals: &[BBox], gt: &[BBox]) -> Vec<f64> {
    proposals
        .iter()
        .map(|p| gt.iter().map(|g| iou(p, g, false)).fold(0.0, f64::max))
        .collect()
}

/// Clip a box to the `width × height` image rectangle.
pub fn clip_to_image(bb: &BBox, height: u32, width: u32) -> BBox {
    let (w, h) = (width as f64, height as f64);
    let x1 = bb[0].max(0.0);
    let y1 = bb[1].max(0.0);
    let x2 = (bb[0] + bb[2]).min(w);
    let y2 = (bb[1] + bb[3]).min(h);
    [x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0)]
}
