//! Pedestrian detection evaluation.
//!
//! Two pathways over the same ground-truth and detection records:
//! - box evaluation: greedy IoU matching per image, accumulated into precision/recall and
//!   miss-rate-vs-FPPI arrays, summarized as log-average miss rate, AP and AR;
//! - crowd Jaccard Index: optimal one-to-one matching per image, averaged over the dataset.

pub mod accumulate;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod geometry;
pub mod ji;
pub mod matching;
pub mod params;
pub mod summarize;
pub mod types;

pub use accumulate::{accumulate, AccumulatedEval};
pub use dataset::{DetectionSet, GroundTruthSet};
pub use error::{EvalError, Result};
pub use eval::{evaluate, EvalImg, Evaluation};
pub use ji::{evaluate_ji, JiReport, JiResult};
pub use matching::{BipartiteGraph, Matching};
pub use params::{IgnoreMode, IouType, Params};
pub use summarize::{summarize, summarize_default, Summary};
pub use types::{Annotation, BBox, Category, Dataset, Detection, Image};
