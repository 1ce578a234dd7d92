//! Indexed ground-truth and detection record sets.

use std::collections::HashMap;
use std::path::Path;

use log::warn;
use serde::Deserialize;

use crate::error::{EvalError, Result};
use crate::types::{Annotation, Dataset, Detection, Image};

/// Ground-truth records with lookup indices.
pub struct GroundTruthSet {
    pub dataset: Dataset,
    /// ann_id -> index into dataset.annotations
    anns: HashMap<u64, usize>,
    /// img_id -> index into dataset.images
    imgs: HashMap<u64, usize>,
    /// img_id -> [ann_id, ...]
    img_to_anns: HashMap<u64, Vec<u64>>,
    /// (img_id, cat_id) -> [ann_id, ...] in file order
    img_cat_to_anns: HashMap<(u64, u64), Vec<u64>>,
}

impl GroundTruthSet {
    /// Load a ground-truth JSON file and build indices.
    pub fn new(annotation_file: &Path) -> Result<Self> {
        let file = std::fs::File::open(annotation_file)?;
        let reader = std::io::BufReader::new(file);
        let dataset: Dataset = serde_json::from_reader(reader)?;
        Self::from_dataset(dataset)
    }

    /// Build from an already-loaded dataset.
    ///
    /// Annotations without an id receive fresh ids above the largest one present, since id 0
    /// means "unmatched" in match records. Duplicate ids are rejected.
    pub fn from_dataset(mut dataset: Dataset) -> Result<Self> {
        for ann in &dataset.annotations {
            check_bbox(&ann.bbox, ann.image_id)?;
        }

        let mut next_id = dataset.annotations.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        let mut reassigned = 0usize;
        for ann in &mut dataset.annotations {
            if ann.id == 0 {
                ann.id = next_id;
                next_id += 1;
                reassigned += 1;
            }
        }
        if reassigned > 0 {
            warn!("assigned ids to {} ground-truth annotations without one", reassigned);
        }

        let mut anns = HashMap::with_capacity(dataset.annotations.len());
        let mut img_to_anns: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut img_cat_to_anns: HashMap<(u64, u64), Vec<u64>> = HashMap::new();
        for (i, ann) in dataset.annotations.iter().enumerate() {
            if anns.insert(ann.id, i).is_some() {
                return Err(EvalError::InvalidAnnotation(format!(
                    "duplicate ground-truth id {}",
                    ann.id
                )));
            }
            img_to_anns.entry(ann.image_id).or_default().push(ann.id);
            img_cat_to_anns
                .entry((ann.image_id, ann.category_id))
                .or_default()
                .push(ann.id);
        }

        let imgs = dataset
            .images
            .iter()
            .enumerate()
            .map(|(i, img)| (img.id, i))
            .collect();

        Ok(GroundTruthSet {
            dataset,
            anns,
            imgs,
            img_to_anns,
            img_cat_to_anns,
        })
    }

    /// Get a single annotation by ID.
    pub fn get_ann(&self, id: u64) -> Option<&Annotation> {
        self.anns.get(&id).map(|&i| &self.dataset.annotations[i])
    }

    /// Get a single image by ID.
    pub fn get_img(&self, id: u64) -> Option<&Image> {
        self.imgs.get(&id).map(|&i| &self.dataset.images[i])
    }

    /// Whether the ground truth has a record for this image (an image entry or any annotation).
    pub fn has_image(&self, id: u64) -> bool {
        self.imgs.contains_key(&id) || self.img_to_anns.contains_key(&id)
    }

    /// Annotation IDs for a specific (image, category) pair.
    pub fn ann_ids_for_img_cat(&self, img_id: u64, cat_id: u64) -> &[u64] {
        self.img_cat_to_anns
            .get(&(img_id, cat_id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Annotation IDs for a specific image, in file order.
    pub fn ann_ids_for_img(&self, img_id: u64) -> &[u64] {
        self.img_to_anns
            .get(&img_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Sorted unique image IDs over image entries and annotations.
    pub fn img_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .dataset
            .images
            .iter()
            .map(|img| img.id)
            .chain(self.img_to_anns.keys().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sorted unique category IDs over category entries and annotations.
    pub fn cat_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .dataset
            .categories
            .iter()
            .map(|c| c.id)
            .chain(self.dataset.annotations.iter().map(|a| a.category_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Load a detection file against this ground truth.
    ///
    /// The file can be a JSON array of detections, or a JSON object with an `annotations` field.
    pub fn load_res(&self, res_file: &Path) -> Result<DetectionSet> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ResFile {
            List(Vec<Detection>),
            Wrapped { annotations: Vec<Detection> },
        }

        let file = std::fs::File::open(res_file)?;
        let reader = std::io::BufReader::new(file);
        let dets = match serde_json::from_reader::<_, ResFile>(reader)? {
            ResFile::List(d) => d,
            ResFile::Wrapped { annotations } => annotations,
        };

        let unknown = dets.iter().filter(|d| !self.has_image(d.image_id)).count();
        if unknown > 0 {
            warn!(
                "{} detections reference images absent from the ground truth",
                unknown
            );
        }
        DetectionSet::from_detections(dets)
    }
}

/// Detection records with lookup indices.
pub struct DetectionSet {
    pub detections: Vec<Detection>,
    /// det_id -> index into detections
    dets: HashMap<u64, usize>,
    /// img_id -> [det_id, ...]
    img_to_dets: HashMap<u64, Vec<u64>>,
    /// (img_id, cat_id) -> [det_id, ...] in file order
    img_cat_to_dets: HashMap<(u64, u64), Vec<u64>>,
}

impl DetectionSet {
    /// Build from detection records.
    ///
    /// Detections without an id receive fresh ids above the largest one present, in file order;
    /// when none carries an id this is `1..=N`. Duplicate ids are rejected.
    pub fn from_detections(mut detections: Vec<Detection>) -> Result<Self> {
        let mut next_id = detections.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        for det in &mut detections {
            check_bbox(&det.bbox, det.image_id)?;
            if !det.score.is_finite() {
                return Err(EvalError::InvalidAnnotation(format!(
                    "detection on image {} has non-finite score",
                    det.image_id
                )));
            }
            if det.id == 0 {
                det.id = next_id;
                next_id += 1;
            }
        }

        let mut dets = HashMap::with_capacity(detections.len());
        let mut img_to_dets: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut img_cat_to_dets: HashMap<(u64, u64), Vec<u64>> = HashMap::new();
        for (i, det) in detections.iter().enumerate() {
            if dets.insert(det.id, i).is_some() {
                return Err(EvalError::InvalidAnnotation(format!(
                    "duplicate detection id {}",
                    det.id
                )));
            }
            img_to_dets.entry(det.image_id).or_default().push(det.id);
            img_cat_to_dets
                .entry((det.image_id, det.category_id))
                .or_default()
                .push(det.id);
        }

        Ok(DetectionSet {
            detections,
            dets,
            img_to_dets,
            img_cat_to_dets,
        })
    }

    pub fn get_det(&self, id: u64) -> Option<&Detection> {
        self.dets.get(&id).map(|&i| &self.detections[i])
    }

    pub fn det_ids_for_img_cat(&self, img_id: u64, cat_id: u64) -> &[u64] {
        self.img_cat_to_dets
            .get(&(img_id, cat_id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn det_ids_for_img(&self, img_id: u64) -> &[u64] {
        self.img_to_dets
            .get(&img_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Sorted unique image IDs that carry at least one detection.
    pub fn img_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.img_to_dets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn check_bbox(bbox: &[f64; 4], image_id: u64) -> Result<()> {
    if bbox.iter().any(|v| !v.is_finite()) || bbox[2] < 0.0 || bbox[3] < 0.0 {
        return Err(EvalError::InvalidAnnotation(format!(
            "box {:?} on image {} must be finite with non-negative size",
            bbox, image_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn make_test_dataset() -> Dataset {
        Dataset {
            images: vec![
                Image {
                    id: 1,
                    file_name: "set00/V000/I00029.jpg".into(),
                    height: 480,
                    width: 640,
                },
                Image {
                    id: 2,
                    file_name: "set00/V000/I00059.jpg".into(),
                    height: 480,
                    width: 640,
                },
            ],
            annotations: vec![
                Annotation {
                    id: 1,
                    image_id: 1,
                    category_id: 1,
                    bbox: [10.0, 10.0, 20.0, 50.0],
                    iscrowd: false,
                    ignore: false,
                    height: Some(50.0),
                    vis_ratio: None,
                },
                Annotation {
                    id: 0,
                    image_id: 1,
                    category_id: 2,
                    bbox: [30.0, 30.0, 10.0, 10.0],
                    iscrowd: false,
                    ignore: true,
                    height: None,
                    vis_ratio: None,
                },
                Annotation {
                    id: 3,
                    image_id: 3,
                    category_id: 1,
                    bbox: [0.0, 0.0, 50.0, 50.0],
                    iscrowd: true,
                    ignore: false,
                    height: None,
                    vis_ratio: None,
                },
            ],
            categories: vec![
                Category {
                    id: 1,
                    name: "person".into(),
                },
                Category {
                    id: 2,
                    name: "people".into(),
                },
            ],
        }
    }

    fn det(image_id: u64, category_id: u64, score: f64) -> Detection {
        Detection {
            id: 0,
            image_id,
            category_id,
            bbox: [0.0, 0.0, 10.0, 10.0],
            score,
        }
    }

    #[test]
    fn test_missing_ids_are_assigned() {
        let gt = GroundTruthSet::from_dataset(make_test_dataset()).unwrap();
        assert_eq!(gt.ann_ids_for_img(1), &[1, 4]);
        assert_eq!(gt.get_ann(4).unwrap().category_id, 2);
    }

    #[test]
    fn test_indices() {
        let gt = GroundTruthSet::from_dataset(make_test_dataset()).unwrap();
        assert_eq!(gt.img_ids(), vec![1, 2, 3]);
        assert_eq!(gt.cat_ids(), vec![1, 2]);
        assert_eq!(gt.ann_ids_for_img_cat(1, 1), &[1]);
        assert!(gt.ann_ids_for_img_cat(2, 1).is_empty());
        assert!(gt.has_image(2));
        assert!(gt.has_image(3));
        assert!(!gt.has_image(9));
        assert_eq!(gt.get_img(2).unwrap().width, 640);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut ds = make_test_dataset();
        ds.annotations[1].id = 1;
        assert!(matches!(
            GroundTruthSet::from_dataset(ds),
            Err(EvalError::InvalidAnnotation(_))
        ));
    }

    #[test]
    fn test_negative_size_rejected() {
        let mut ds = make_test_dataset();
        ds.annotations[0].bbox = [0.0, 0.0, -1.0, 5.0];
        assert!(GroundTruthSet::from_dataset(ds).is_err());
    }

    #[test]
    fn test_detection_set() {
        let dt = DetectionSet::from_detections(vec![det(1, 1, 0.9), det(1, 2, 0.8), det(2, 1, 0.1)])
            .unwrap();
        assert_eq!(dt.det_ids_for_img(1), &[1, 2]);
        assert_eq!(dt.det_ids_for_img_cat(2, 1), &[3]);
        assert_eq!(dt.img_ids(), vec![1, 2]);
        assert_eq!(dt.get_det(2).unwrap().score, 0.8);
    }

    #[test]
    fn test_lists_keep_file_order() {
        let mut ds = make_test_dataset();
        ds.annotations[1].category_id = 1;
        ds.annotations.insert(0, ds.annotations[1].clone());
        ds.annotations[0].id = 0;
        ds.annotations[2].id = 5;
        // File order on image 1: [no id, id 1, id 5]
        let gt = GroundTruthSet::from_dataset(ds).unwrap();
        assert_eq!(gt.ann_ids_for_img_cat(1, 1), &[6, 1, 5]);
        assert_eq!(gt.ann_ids_for_img(1), &[6, 1, 5]);

        let mut dets = vec![det(1, 1, 0.5), det(1, 1, 0.5)];
        dets[0].id = 2;
        dets[1].id = 1;
        let dt = DetectionSet::from_detections(dets).unwrap();
        assert_eq!(dt.det_ids_for_img_cat(1, 1), &[2, 1]);
    }

    #[test]
    fn test_missing_detection_ids_avoid_explicit_ones() {
        let mut dets = vec![det(1, 1, 0.9), det(1, 1, 0.8), det(2, 1, 0.7)];
        dets[1].id = 1;
        let dt = DetectionSet::from_detections(dets).unwrap();
        assert_eq!(dt.det_ids_for_img(1), &[2, 1]);
        assert_eq!(dt.det_ids_for_img(2), &[3]);
        assert_eq!(dt.get_det(1).unwrap().score, 0.8);
    }

    #[test]
    fn test_nan_score_rejected() {
        assert!(DetectionSet::from_detections(vec![det(1, 1, f64::NAN)]).is_err());
    }
}
